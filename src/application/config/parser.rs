use crate::application::config::models::Config;
use crate::common::error::{ListenerError, Result};
use std::fs;
use std::path::Path;

/// Parse configuration from TOML file
pub fn parse_config_file(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        ListenerError::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&content)
}

/// Parse configuration from TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content)
        .map_err(|e| ListenerError::Config(format!("Failed to parse TOML config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::listener::BackendKind;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [[listeners]]
            address = "127.0.0.1:8080"
        "#;

        let config = parse_config(toml).unwrap();
        assert_eq!(config.listeners.len(), 1);
        let listener = &config.listeners[0];
        assert_eq!(listener.address.port(), 8080);
        assert_eq!(listener.backlog, -1);
        assert_eq!(listener.backend, BackendKind::Auto);
        assert_eq!(listener.slots, 1);
        assert!(listener.flags().is_empty());
    }

    #[test]
    fn test_parse_full_listener() {
        let toml = r#"
            event_capacity = 64

            [[listeners]]
            address = "[::1]:9000"
            backlog = 32
            backend = "completion"
            slots = 4
            close_on_free = true
            reuseable = true
            rearm_backoff_ms = 50
            max_rearm_attempts = 3
        "#;

        let config = parse_config(toml).unwrap();
        assert_eq!(config.event_capacity, 64);
        let listener = &config.listeners[0];
        assert!(listener.address.is_ipv6());
        assert_eq!(listener.backend, BackendKind::Completion);
        assert_eq!(listener.slots, 4);
        assert_eq!(listener.max_rearm_attempts, 3);
    }

    #[test]
    fn test_unknown_backend_is_a_parse_error() {
        let toml = r#"
            [[listeners]]
            address = "127.0.0.1:8080"
            backend = "epoll"
        "#;

        let err = parse_config(toml).unwrap_err();
        assert!(matches!(err, ListenerError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = parse_config_file("/nonexistent/connlistener.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
