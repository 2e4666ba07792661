//! Defaults applied to every connection opened through [`Services`](crate::Services).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::path::DEFAULT_PORT;
use super::types::DataConnectionMode;

/// Connection settings. Missing fields take their default when deserialized.
///
/// ```
/// use ftp_bridge::ClientConfig;
///
/// let config = ClientConfig {
///     connect_timeout_ms: Some(5_000),
///     ..ClientConfig::default()
/// };
/// assert_eq!(config.default_port, 21);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Port used when `connect` is called without one.
    pub default_port: u16,
    /// Interval between `NOOP`s on the control channel during uploads. 0 disables them.
    pub control_keep_alive_ms: u64,
    /// Limit on opening the control connection. `None` leaves it to the OS.
    pub connect_timeout_ms: Option<u64>,
    /// Switch the control channel to UTF-8 when the server advertises it and
    /// the caller named no encoding.
    pub autodetect_utf8: bool,
    pub data_connection_mode: DataConnectionMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            default_port: DEFAULT_PORT,
            control_keep_alive_ms: 300,
            connect_timeout_ms: None,
            autodetect_utf8: true,
            data_connection_mode: DataConnectionMode::Passive,
        }
    }
}

impl ClientConfig {
    pub fn control_keep_alive(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.control_keep_alive_ms)).filter(|d| !d.is_zero())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms
            .map(Duration::from_millis)
            .filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.default_port, 21);
        assert_eq!(config.control_keep_alive(), Some(Duration::from_millis(300)));
        assert_eq!(config.connect_timeout(), None);
        assert!(config.autodetect_utf8);
        assert_eq!(config.data_connection_mode, DataConnectionMode::Passive);
    }

    #[test]
    fn zero_disables_keep_alive() {
        let config = ClientConfig {
            control_keep_alive_ms: 0,
            connect_timeout_ms: Some(0),
            ..ClientConfig::default()
        };
        assert_eq!(config.control_keep_alive(), None);
        assert_eq!(config.connect_timeout(), None);
    }
}
