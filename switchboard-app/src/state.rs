use std::sync::Arc;
use switchboard_core::{BroadcastHub, Runner};
use tokio::sync::Mutex;

/// Process-scoped state shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<Runner>,
    pub hub: BroadcastHub,
    running: Arc<Mutex<bool>>,
}

impl AppState {
    /// Registers the broadcast hub as the runner's last handler.
    pub fn new(runner: Arc<Runner>) -> Self {
        let hub = BroadcastHub::default();
        runner.add_handler(Arc::new(hub.clone()));
        Self {
            runner,
            hub,
            running: Arc::new(Mutex::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Start every connector unless already started. Returns the new flag.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if !*running {
            self.runner.start().await;
            *running = true;
        }
        *running
    }

    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        if *running {
            self.runner.stop().await;
            *running = false;
        }
        *running
    }

    /// Stop connectors and disconnect subscribers.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.runner.flush().await;
        self.hub.clear();
    }
}
