//! Command-line overrides layered on top of the file config.

use crate::config::schema::RuntimeConfig;

/// Settings given on the command line. Each `Some` wins over the file,
/// both at startup and on every reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub transport: Option<String>,
    pub http_addr: Option<String>,
    pub session_ttl_secs: Option<u64>,
    pub max_sessions: Option<usize>,
    pub log_level: Option<String>,
    pub metrics: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(kind) = &self.transport {
            config.transport.kind = kind.clone();
        }
        if let Some(addr) = &self.http_addr {
            config.transport.http.bind_address = addr.clone();
        }
        if let Some(ttl) = self.session_ttl_secs {
            config.session.ttl_secs = ttl;
        }
        if let Some(max) = self.max_sessions {
            config.session.max_sessions = max;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if self.metrics {
            config.observability.metrics_enabled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_fields_replace_file_values() {
        let overrides = Overrides {
            transport: Some("http".into()),
            max_sessions: Some(5),
            ..Overrides::default()
        };
        let mut config = RuntimeConfig::default();
        overrides.apply(&mut config);

        assert_eq!(config.transport.kind, "http");
        assert_eq!(config.session.max_sessions, 5);
        assert_eq!(config.session.ttl_secs, RuntimeConfig::default().session.ttl_secs);
        assert!(!config.observability.metrics_enabled);
    }
}
