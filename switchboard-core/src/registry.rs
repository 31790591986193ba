use crate::connector::Connector;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_common::{Result, SwitchboardError};
use switchboard_config::ConnectorConfig;

/// Builds a connector from its configuration entry.
pub type ConnectorFactory =
    Arc<dyn Fn(&ConnectorConfig) -> Result<Arc<dyn Connector>> + Send + Sync>;

/// Platform tag → connector constructor.
///
/// Adding a platform means registering one factory; the runner never matches
/// on tags itself.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, platform: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectorConfig) -> Result<Arc<dyn Connector>> + Send + Sync + 'static,
    {
        self.factories.insert(platform.into(), Arc::new(factory));
    }

    /// Registered platform tags, sorted.
    pub fn platforms(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn build(&self, config: &ConnectorConfig) -> Result<Arc<dyn Connector>> {
        let factory = self
            .factories
            .get(&config.platform)
            .ok_or_else(|| SwitchboardError::UnknownPlatform(config.platform.clone()))?;
        factory(config)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connector::{ConnectorState, ConnectorStatus, MessageCallback};

    /// Connector that only tracks lifecycle; tests push messages through
    /// its state directly.
    pub(crate) struct StubConnector {
        pub(crate) state: ConnectorState,
    }

    impl StubConnector {
        pub(crate) fn new(id: &str, platform: &str) -> Arc<Self> {
            Arc::new(Self {
                state: ConnectorState::new(id, platform),
            })
        }
    }

    #[async_trait::async_trait]
    impl Connector for StubConnector {
        fn id(&self) -> &str {
            self.state.id()
        }
        fn platform(&self) -> &str {
            self.state.platform()
        }
        async fn start(&self) {
            self.state.set_running(true);
        }
        async fn stop(&self) {
            self.state.set_running(false);
        }
        fn on_message(&self, callback: MessageCallback) {
            self.state.set_callback(callback);
        }
        fn status(&self) -> ConnectorStatus {
            self.state.status()
        }
    }

    #[test]
    fn builds_registered_platform() {
        let mut registry = ConnectorRegistry::new();
        registry.register("stub", |cfg: &ConnectorConfig| {
            Ok(StubConnector::new(&cfg.id, &cfg.platform) as Arc<dyn Connector>)
        });

        let connector = registry.build(&ConnectorConfig::new("s-1", "stub")).unwrap();
        assert_eq!(connector.id(), "s-1");
        assert_eq!(registry.platforms(), vec!["stub"]);
    }

    #[test]
    fn unknown_platform_is_an_error() {
        let registry = ConnectorRegistry::new();
        let err = registry
            .build(&ConnectorConfig::new("x", "irc"))
            .err()
            .unwrap();
        assert!(matches!(err, SwitchboardError::UnknownPlatform(p) if p == "irc"));
    }
}
