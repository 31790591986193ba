//! Platform connectors: Telegram (long-poll or webhook) and Mastodon
//! (timeline polling or webhook).
//!
//! [`register_builtin`] installs both into a [`ConnectorRegistry`] under their
//! platform tags.
use std::sync::Arc;
use switchboard_core::{Connector, ConnectorRegistry};

pub mod ids;
pub mod mastodon;
pub mod telegram;

pub use mastodon::MastodonConnector;
pub use telegram::TelegramConnector;

pub fn register_builtin(registry: &mut ConnectorRegistry) {
    registry.register(telegram::PLATFORM, |cfg| {
        Ok(Arc::new(TelegramConnector::from_config(cfg)?) as Arc<dyn Connector>)
    });
    registry.register(mastodon::PLATFORM, |cfg| {
        Ok(Arc::new(MastodonConnector::from_config(cfg)?) as Arc<dyn Connector>)
    });
}

/// Registry with every built-in platform.
pub fn default_registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    register_builtin(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_config::ConnectorConfig;

    #[test]
    fn builtin_platforms_are_registered() {
        let registry = default_registry();
        assert_eq!(registry.platforms(), vec!["mastodon", "telegram"]);

        let tg = registry.build(&ConnectorConfig::new("telegram-1", "telegram")).unwrap();
        assert_eq!(tg.platform(), "telegram");
        assert_eq!(tg.id(), "telegram-1");
    }

    #[test]
    fn bad_options_surface_as_errors() {
        let registry = default_registry();
        let cfg = ConnectorConfig::new("m", "mastodon").with_option("timeline", "firehose");
        assert!(registry.build(&cfg).is_err());
    }
}
