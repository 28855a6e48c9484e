//! Flexvolume driver protocol for vmlet.
//!
//! The orchestrator invokes the driver as a command with an operation name,
//! a target mount directory and a JSON-encoded definition map. The driver
//! answers with a JSON object carrying a `status` field and an optional
//! `message`.
//!
//! ```text
//! vmlet flexvolume init
//! vmlet flexvolume mount <target-dir> '{"type":"qcow2","capacity":"2MB"}'
//! vmlet flexvolume unmount <target-dir>
//! ```
//!
//! A successful `mount` leaves a [`DEFINITION_FILE`] in the target
//! directory. The host-side volume translator reads it back with
//! [`StoredVolume::load`] when the VM for the owning sandbox is defined.

#![deny(missing_docs)]

mod definition;

pub use definition::{parse_capacity, CephVolume, Qcow2Volume, RawVolume, VolumeDefinition};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the file holding a volume definition inside a mount directory.
pub const DEFINITION_FILE: &str = "vmlet-flexvolume.json";

/// Directory name the orchestrator uses for volumes served by this driver.
pub const DRIVER_DIR_NAME: &str = "vmlet~flexvolume_driver";

/// Key prefix the orchestrator adds to every definition map.
const ORCHESTRATOR_KEY_PREFIX: &str = "kubernetes.io/";

/// Key holding the generated volume UUID in a stored definition.
const UUID_KEY: &str = "uuid";

/// Result type for flexvolume operations.
pub type Result<T> = std::result::Result<T, FlexVolumeError>;

/// Errors produced while handling a flexvolume definition.
#[derive(Error, Debug)]
pub enum FlexVolumeError {
    /// The JSON definition could not be decoded.
    #[error("malformed volume definition: {0}")]
    Malformed(String),

    /// The definition names a volume type this driver does not handle.
    #[error("unsupported volume type: {0}")]
    UnsupportedType(String),

    /// A field of the definition has an invalid value.
    #[error("invalid volume field {field}: {message}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// No definition file exists in the directory.
    #[error("no volume definition in {}", path.display())]
    MissingDefinition {
        /// Directory that was searched.
        path: PathBuf,
    },

    /// The operation was invoked with the wrong arguments.
    #[error("bad driver arguments: {0}")]
    Usage(String),

    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlexVolumeError {
    /// Create an invalid field error.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for FlexVolumeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

// ============================================================================
// Driver responses
// ============================================================================

/// Status reported back to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    /// The operation succeeded.
    Success,
    /// The operation failed; `message` explains why.
    Failure,
    /// The driver does not implement the operation.
    #[serde(rename = "Not supported")]
    NotSupported,
}

/// Driver capabilities reported by `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether the driver implements attach/detach.
    pub attach: bool,
}

/// JSON object printed by the driver for every invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverResponse {
    /// Outcome of the operation.
    pub status: DriverStatus,

    /// Human-readable detail, set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Capabilities, set by `init` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl DriverResponse {
    /// Plain success.
    pub fn success() -> Self {
        Self {
            status: DriverStatus::Success,
            message: None,
            capabilities: None,
        }
    }

    /// Failure with a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: DriverStatus::Failure,
            message: Some(message.into()),
            capabilities: None,
        }
    }

    /// Operation not implemented by this driver.
    pub fn not_supported() -> Self {
        Self {
            status: DriverStatus::NotSupported,
            message: None,
            capabilities: None,
        }
    }

    /// Encode as the JSON line printed to stdout.
    pub fn to_json(&self) -> String {
        // Serializing this struct cannot fail: every field is a plain value.
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"status":"Failure","message":"encode error"}"#.to_string())
    }
}

// ============================================================================
// Stored definitions
// ============================================================================

/// A volume definition as persisted in a mount directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVolume {
    /// Volume UUID generated at mount time.
    pub uuid: String,
    /// Validated volume definition.
    pub definition: VolumeDefinition,
}

impl StoredVolume {
    /// Load and validate the definition stored in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(DEFINITION_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlexVolumeError::MissingDefinition {
                    path: dir.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut map: Map<String, Value> = serde_json::from_str(&content)?;
        let uuid = match map.remove(UUID_KEY) {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => return Err(FlexVolumeError::invalid_field("uuid", "missing or empty")),
        };

        Ok(Self {
            uuid,
            definition: VolumeDefinition::from_map(map)?,
        })
    }
}

/// Drop keys the orchestrator injects (`kubernetes.io/fsType` and friends).
fn strip_orchestrator_keys(map: &mut Map<String, Value>) {
    map.retain(|k, _| !k.starts_with(ORCHESTRATOR_KEY_PREFIX));
}

// ============================================================================
// Driver
// ============================================================================

/// Flexvolume driver.
///
/// The UUID source is injectable so callers can produce stable volume
/// names.
pub struct FlexVolumeDriver {
    uuid_gen: Box<dyn Fn() -> String + Send + Sync>,
}

impl Default for FlexVolumeDriver {
    fn default() -> Self {
        Self::new(|| uuid::Uuid::new_v4().to_string())
    }
}

impl FlexVolumeDriver {
    /// Create a driver with a custom UUID source.
    pub fn new(uuid_gen: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            uuid_gen: Box::new(uuid_gen),
        }
    }

    /// Run one driver invocation and return the JSON response.
    ///
    /// `args[0]` is the operation name.
    pub fn run(&self, args: &[String]) -> String {
        self.dispatch(args).to_json()
    }

    /// Run one driver invocation and return the structured response.
    pub fn dispatch(&self, args: &[String]) -> DriverResponse {
        let Some((op, rest)) = args.split_first() else {
            return DriverResponse::failure("no operation given");
        };

        let result = match op.as_str() {
            "init" => {
                return DriverResponse {
                    capabilities: Some(Capabilities { attach: false }),
                    ..DriverResponse::success()
                }
            }
            "mount" => match rest {
                [dir, json] => self.mount(Path::new(dir), json),
                _ => Err(FlexVolumeError::Usage(
                    "mount expects <target-dir> <json-options>".into(),
                )),
            },
            "unmount" => match rest {
                [dir] => self.unmount(Path::new(dir)),
                _ => Err(FlexVolumeError::Usage("unmount expects <target-dir>".into())),
            },
            other => {
                tracing::debug!(op = %other, "unsupported flexvolume operation");
                return DriverResponse::not_supported();
            }
        };

        match result {
            Ok(()) => DriverResponse::success(),
            Err(e) => {
                tracing::warn!(op = %op, error = %e, "flexvolume operation failed");
                DriverResponse::failure(e.to_string())
            }
        }
    }

    /// Validate `json` and store it with a fresh UUID in `target_dir`.
    pub fn mount(&self, target_dir: &Path, json: &str) -> Result<()> {
        let mut map: Map<String, Value> = serde_json::from_str(json)?;

        // Validate before touching the filesystem.
        let mut check = map.clone();
        strip_orchestrator_keys(&mut check);
        check.remove(UUID_KEY);
        let definition = VolumeDefinition::from_map(check)?;

        let uuid = (self.uuid_gen)();
        map.insert(UUID_KEY.to_string(), Value::String(uuid.clone()));

        std::fs::create_dir_all(target_dir)?;
        let content = serde_json::to_string_pretty(&map)?;
        std::fs::write(target_dir.join(DEFINITION_FILE), content)?;

        tracing::info!(
            dir = %target_dir.display(),
            volume_type = definition.type_name(),
            uuid = %uuid,
            "stored flexvolume definition"
        );
        Ok(())
    }

    /// Remove a mount directory created by [`FlexVolumeDriver::mount`].
    pub fn unmount(&self, target_dir: &Path) -> Result<()> {
        match std::fs::remove_dir_all(target_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn fixed_driver() -> FlexVolumeDriver {
        FlexVolumeDriver::new(|| "abb67e3c-71b3-4ddd-5505-8c4215d5c4eb".to_string())
    }

    #[test]
    fn test_init_reports_no_attach() {
        let out = fixed_driver().run(&args(&["init"]));
        assert_eq!(out, r#"{"status":"Success","capabilities":{"attach":false}}"#);
    }

    #[test]
    fn test_unknown_operation_not_supported() {
        let out = fixed_driver().run(&args(&["attach", "x"]));
        assert_eq!(out, r#"{"status":"Not supported"}"#);
    }

    #[test]
    fn test_mount_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("vol2");
        let json = r#"{"type":"qcow2","capacity":"2MB","kubernetes.io/fsType":"ext4"}"#;

        let resp = fixed_driver().dispatch(&args(&["mount", dir.to_str().unwrap(), json]));
        assert_eq!(resp.status, DriverStatus::Success, "{:?}", resp.message);

        let stored = StoredVolume::load(&dir).unwrap();
        assert_eq!(stored.uuid, "abb67e3c-71b3-4ddd-5505-8c4215d5c4eb");
        assert_eq!(
            stored.definition,
            VolumeDefinition::Qcow2(Qcow2Volume {
                capacity: Some("2MB".to_string())
            })
        );
    }

    #[test]
    fn test_mount_rejects_unknown_field() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bad");
        let json = r#"{"type":"qcow2","size":"2MB"}"#;

        let resp = fixed_driver().dispatch(&args(&["mount", dir.to_str().unwrap(), json]));
        assert_eq!(resp.status, DriverStatus::Failure);
        assert!(resp.message.unwrap().contains("size"));
        assert!(!dir.exists(), "nothing should be written on failure");
    }

    #[test]
    fn test_mount_usage_error() {
        let resp = fixed_driver().dispatch(&args(&["mount", "/tmp/only-dir"]));
        assert_eq!(resp.status, DriverStatus::Failure);
    }

    #[test]
    fn test_unmount_removes_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("raw");
        let driver = fixed_driver();
        driver
            .mount(&dir, r#"{"type":"raw","path":"/dev/loop0"}"#)
            .unwrap();
        assert!(dir.join(DEFINITION_FILE).exists());

        let resp = driver.dispatch(&args(&["unmount", dir.to_str().unwrap()]));
        assert_eq!(resp.status, DriverStatus::Success);
        assert!(!dir.exists());
    }

    #[test]
    fn test_load_missing_definition() {
        let tmp = tempfile::tempdir().unwrap();
        let err = StoredVolume::load(tmp.path()).unwrap_err();
        assert!(matches!(err, FlexVolumeError::MissingDefinition { .. }));
    }
}
