//! Client Configuration
//!
//! Device selection and the timing knobs of the dispatcher. Configuration
//! is loaded with figment, layering defaults, an optional TOML file and
//! `ZNP_`-prefixed environment variables (later layers win).

use core::time::Duration;
use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::{ZnpError, ZnpResult};

/// Default serial speed of Z-Stack coprocessors
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// ----------------------------------------------------------------------------
// Device Configuration
// ----------------------------------------------------------------------------

/// Which device to open and at what speed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path or transport-specific address
    pub path: String,
    pub baudrate: u32,
}

impl DeviceConfig {
    pub fn new<P: Into<String>>(path: P) -> Self {
        Self {
            path: path.into(),
            baudrate: DEFAULT_BAUDRATE,
        }
    }

    pub fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0")
    }
}

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Configuration for the ZNP dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZnpConfig {
    pub device: DeviceConfig,
    /// Reopen the device after the link drops
    pub auto_reconnect: bool,
    /// Pause between failed reconnect attempts
    pub auto_reconnect_retry_delay: Duration,
    /// Bound on the liveness ping sent while connecting
    pub connect_ping_timeout: Duration,
    /// Default bound for synchronous requests
    pub sreq_timeout: Duration,
    /// Default bound for asynchronous callbacks
    pub arsp_timeout: Duration,
}

impl Default for ZnpConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            auto_reconnect: true,
            auto_reconnect_retry_delay: Duration::from_secs(5),
            connect_ping_timeout: Duration::from_millis(500),
            sreq_timeout: Duration::from_secs(15),
            arsp_timeout: Duration::from_secs(30),
        }
    }
}

impl ZnpConfig {
    pub fn new(device: DeviceConfig) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }

    /// Load from defaults, then `path` if it exists, then `ZNP_*` variables
    ///
    /// Nested keys use a double underscore, e.g. `ZNP_DEVICE__PATH`.
    pub fn load<P: AsRef<Path>>(path: P) -> ZnpResult<Self> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(|e| ZnpError::config_error(e.to_string()))
    }

    /// The layered figment behind [`ZnpConfig::load`]
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ZNP_").split("__"))
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_auto_reconnect_retry_delay(mut self, delay: Duration) -> Self {
        self.auto_reconnect_retry_delay = delay;
        self
    }

    pub fn with_connect_ping_timeout(mut self, timeout: Duration) -> Self {
        self.connect_ping_timeout = timeout;
        self
    }

    pub fn with_sreq_timeout(mut self, timeout: Duration) -> Self {
        self.sreq_timeout = timeout;
        self
    }

    pub fn with_arsp_timeout(mut self, timeout: Duration) -> Self {
        self.arsp_timeout = timeout;
        self
    }

    /// Short timings for tests against a mock device
    pub fn testing() -> Self {
        Self {
            device: DeviceConfig::new("mock://znp"),
            auto_reconnect: true,
            auto_reconnect_retry_delay: Duration::from_millis(50),
            connect_ping_timeout: Duration::from_millis(100),
            sreq_timeout: Duration::from_millis(500),
            arsp_timeout: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ZnpConfig::default();
        assert_eq!(config.device.baudrate, DEFAULT_BAUDRATE);
        assert!(config.auto_reconnect);
        assert_eq!(config.auto_reconnect_retry_delay, Duration::from_secs(5));
        assert_eq!(config.connect_ping_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_builder_methods() {
        let config = ZnpConfig::new(DeviceConfig::new("/dev/ttyACM0").with_baudrate(230_400))
            .with_auto_reconnect(false)
            .with_sreq_timeout(Duration::from_secs(2));

        assert_eq!(config.device.path, "/dev/ttyACM0");
        assert_eq!(config.device.baudrate, 230_400);
        assert!(!config.auto_reconnect);
        assert_eq!(config.sreq_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("znp-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "auto_reconnect = false").unwrap();
        writeln!(file, "[device]").unwrap();
        writeln!(file, "path = \"/dev/ttyZNP\"").unwrap();
        writeln!(file, "baudrate = 57600").unwrap();
        drop(file);

        let config = ZnpConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.device, DeviceConfig::new("/dev/ttyZNP").with_baudrate(57_600));
        assert!(!config.auto_reconnect);
        assert_eq!(config.sreq_timeout, ZnpConfig::default().sreq_timeout);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ZnpConfig::load("/nonexistent/znp.toml").unwrap();
        assert_eq!(config.device, DeviceConfig::default());
    }
}
