use crate::application::config::models::{Config, ListenerConfig};
use crate::common::constants::MAX_ACCEPTING_SLOTS;
use crate::common::error::{ListenerError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Validate configuration for correctness and consistency
pub fn validate_config(config: &Config) -> Result<()> {
    if config.event_capacity == 0 {
        return Err(ListenerError::Config(
            "event_capacity must be greater than 0".to_string(),
        ));
    }

    if config.listeners.is_empty() {
        return Err(ListenerError::Config(
            "At least one listener must be configured".to_string(),
        ));
    }

    validate_address_conflicts(config)?;

    for (idx, listener) in config.listeners.iter().enumerate() {
        validate_listener(listener, idx)?;
    }

    Ok(())
}

/// Two listeners on the same fixed address would fail at bind time anyway;
/// port 0 entries never conflict.
fn validate_address_conflicts(config: &Config) -> Result<()> {
    let mut seen: HashMap<SocketAddr, usize> = HashMap::new();

    for (idx, listener) in config.listeners.iter().enumerate() {
        if listener.address.port() == 0 {
            continue;
        }
        if let Some(first) = seen.insert(listener.address, idx) {
            return Err(ListenerError::Config(format!(
                "Address conflict: {} is used by listeners {} and {}",
                listener.address, first, idx
            )));
        }
    }

    Ok(())
}

fn validate_listener(listener: &ListenerConfig, index: usize) -> Result<()> {
    if listener.backlog == 0 {
        return Err(ListenerError::Config(format!(
            "Listener {}: backlog cannot be 0",
            index
        )));
    }

    if listener.slots == 0 || listener.slots > MAX_ACCEPTING_SLOTS {
        return Err(ListenerError::Config(format!(
            "Listener {}: slots must be between 1 and {}",
            index, MAX_ACCEPTING_SLOTS
        )));
    }

    if listener.max_rearm_attempts == 0 {
        return Err(ListenerError::Config(format!(
            "Listener {}: max_rearm_attempts must be at least 1",
            index
        )));
    }

    Ok(())
}
