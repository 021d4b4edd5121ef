use std::time::Duration;

use crate::error::Error;
use crate::operation::Protocol;

/// Configuration for a [`ContextQueue`](crate::ContextQueue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Wire framing of the connection. Decides positional vs. id matching.
    pub protocol: Protocol,
    /// Initial number of request slots. The queue grows past this on demand.
    /// Also the most initializers an out-of-order queue keeps for requests
    /// that left before their reply arrived.
    pub capacity: usize,
    /// Timeout used by [`ReplyHandle::wait`](crate::ReplyHandle::wait).
    /// Default: 1s.
    pub default_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Ascii,
            capacity: 256,
            default_timeout: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Configuration for `protocol` with default values otherwise.
    pub fn for_protocol(protocol: Protocol) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("capacity must be non-zero".into()));
        }
        if self.default_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "default_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol, Protocol::Ascii);
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = QueueConfig {
            default_timeout: Duration::ZERO,
            ..QueueConfig::for_protocol(Protocol::Binary)
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = QueueConfig {
            capacity: 0,
            ..QueueConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
