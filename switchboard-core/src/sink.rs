use crate::pipeline::MessageHandler;
use anyhow::Result;
use switchboard_common::Message;

/// Storage sink that records every processed message in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    pub fn render(msg: &Message) -> String {
        format!(
            "[{}:{}] {} {}: {}",
            msg.platform, msg.source_id, msg.channel_id, msg.id, msg.content
        )
    }
}

#[async_trait::async_trait]
impl MessageHandler for LogSink {
    async fn handle(&self, msg: &Message) -> Result<()> {
        tracing::info!(target: "switchboard::sink", "{}", Self::render(msg));
        Ok(())
    }
}
