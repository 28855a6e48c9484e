//! vmlet configuration.
//!
//! Settings that used to be process-wide knobs (storage pool name, where
//! boot-config images are written, allowed raw devices, shutdown cadence)
//! live here and are handed to the lifecycle manager at construction.

use crate::error::{Error, Result};
use crate::virt::DomainType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name for config file storage.
const APP_NAME: &str = "vmlet";

/// Config file name inside the application config directory.
const CONFIG_FILENAME: &str = "config.toml";

/// Lifecycle manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Configuration format version.
    pub version: u8,

    /// Storage pool holding root and qcow2 volumes.
    pub storage_pool: String,

    /// Logical size of root volumes, e.g. `10GiB`.
    pub root_volume_capacity: String,

    /// Directory holding per-pod volume directories (`<uid>/volumes/...`).
    pub kubelet_root_dir: PathBuf,

    /// Glob patterns (relative to `/dev/`) of devices raw volumes may use.
    pub raw_devices: Vec<String>,

    /// Directory with locally available VM images.
    pub images_dir: PathBuf,

    /// Directory where boot-config images are staged.
    pub boot_config_dir: PathBuf,

    /// ISO builder used for boot-config images. An empty string in the file
    /// (`None` here) keeps the staging directory as the image.
    #[serde(with = "optional_tool")]
    pub iso_tool: Option<String>,

    /// Hypervisor domain type.
    pub domain_type: DomainType,

    /// libvirt connection URI for the virsh backend.
    pub libvirt_uri: String,

    /// Path of the redb metadata database.
    pub metadata_path: PathBuf,

    /// Stop timeout used when the caller does not pass one.
    #[serde(with = "humantime_duration")]
    pub default_stop_timeout: Duration,

    /// Shutdown escalation cadence.
    pub shutdown: ShutdownConfig,
}

/// Shutdown escalation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time between domain state polls during graceful shutdown.
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,

    /// Number of forced-terminate attempts before giving up.
    pub terminate_retries: u32,

    /// Pause between failed terminate attempts.
    #[serde(with = "humantime_duration")]
    pub terminate_retry_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            terminate_retries: 3,
            terminate_retry_interval: Duration::from_secs(1),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let state_dir = default_state_dir();
        Self {
            version: 1,
            storage_pool: "volumes".to_string(),
            root_volume_capacity: "10GiB".to_string(),
            kubelet_root_dir: PathBuf::from("/var/lib/kubelet/pods"),
            raw_devices: vec!["loop*".to_string()],
            images_dir: state_dir.join("images"),
            boot_config_dir: state_dir.join("config"),
            iso_tool: Some("genisoimage".to_string()),
            domain_type: DomainType::Kvm,
            libvirt_uri: "qemu:///system".to_string(),
            metadata_path: state_dir.join("metadata.redb"),
            default_stop_timeout: Duration::from_secs(30),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Default config file location.
    ///
    /// On Linux: `~/.config/vmlet/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::ConfigLoad("could not determine config directory".into()))?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILENAME))
    }

    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`, falling back to defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::ConfigLoad(format!("{}: {}", path.display(), e))),
        };

        Self::parse(&content).map_err(|e| match e {
            Error::ConfigLoad(msg) => Error::ConfigLoad(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse TOML configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::ConfigLoad(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::ConfigSave(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| Error::ConfigSave(e.to_string()))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ConfigSave(e.to_string()))
    }

    /// Root volume size in bytes.
    pub fn root_volume_bytes(&self) -> Result<u64> {
        vmlet_flexvolume::parse_capacity(&self.root_volume_capacity)
            .map_err(|e| Error::ConfigLoad(format!("root_volume_capacity: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        if self.storage_pool.is_empty() {
            return Err(Error::ConfigLoad("storage_pool must not be empty".into()));
        }
        self.root_volume_bytes()?;
        if self.shutdown.poll_interval.is_zero() {
            return Err(Error::ConfigLoad("shutdown.poll_interval must be positive".into()));
        }
        if self.shutdown.terminate_retries == 0 {
            return Err(Error::ConfigLoad("shutdown.terminate_retries must be at least 1".into()));
        }
        Ok(())
    }
}

/// State directory for images, boot configs and metadata.
///
/// On Linux: `~/.local/share/vmlet`
fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join(APP_NAME)
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// `None` is written as `""` so an unset tool survives a save/load cycle.
mod optional_tool {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(tool: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tool.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        Ok(if s.is_empty() { None } else { Some(s.to_string()) })
    }
}
