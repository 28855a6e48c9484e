//! Typed volume definitions.

use crate::{strip_orchestrator_keys, FlexVolumeError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default qcow2 capacity when the definition does not set one.
pub const DEFAULT_QCOW2_CAPACITY: &str = "1024MB";

/// A volume served by the driver, one variant per supported `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VolumeDefinition {
    /// Host block device passed through to the guest.
    Raw(RawVolume),
    /// Fresh qcow2 volume allocated in the storage pool.
    Qcow2(Qcow2Volume),
    /// Ceph RBD image accessed over the network.
    Ceph(CephVolume),
}

/// `type: raw`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawVolume {
    /// Device path on the host, e.g. `/dev/loop0`.
    pub path: String,
}

/// `type: qcow2`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Qcow2Volume {
    /// Logical size such as `2MB` or `10GiB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
}

/// `type: ceph`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CephVolume {
    /// Monitor address as `host:port`.
    pub monitor: String,
    /// RBD pool name.
    pub pool: String,
    /// RBD image name.
    pub volume: String,
    /// Base64-encoded cephx key.
    pub secret: String,
    /// cephx user.
    pub user: String,
}

impl VolumeDefinition {
    /// Decode and validate a definition map.
    ///
    /// The map must carry a `type` key. Orchestrator-injected keys are
    /// ignored; any other unknown key is rejected.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self> {
        strip_orchestrator_keys(&mut map);

        let ty = match map.remove("type") {
            Some(Value::String(s)) => s,
            Some(_) => return Err(FlexVolumeError::invalid_field("type", "must be a string")),
            None => return Err(FlexVolumeError::Malformed("missing `type`".into())),
        };

        let rest = Value::Object(map);
        let def = match ty.as_str() {
            "raw" => VolumeDefinition::Raw(serde_json::from_value(rest)?),
            "qcow2" => VolumeDefinition::Qcow2(serde_json::from_value(rest)?),
            "ceph" => VolumeDefinition::Ceph(serde_json::from_value(rest)?),
            other => return Err(FlexVolumeError::UnsupportedType(other.to_string())),
        };
        def.validate()?;
        Ok(def)
    }

    /// The `type` string for this definition.
    pub fn type_name(&self) -> &'static str {
        match self {
            VolumeDefinition::Raw(_) => "raw",
            VolumeDefinition::Qcow2(_) => "qcow2",
            VolumeDefinition::Ceph(_) => "ceph",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            VolumeDefinition::Raw(raw) => {
                if !raw.path.starts_with("/dev/") {
                    return Err(FlexVolumeError::invalid_field(
                        "path",
                        format!("{} is not under /dev", raw.path),
                    ));
                }
            }
            VolumeDefinition::Qcow2(q) => {
                q.capacity_bytes()?;
            }
            VolumeDefinition::Ceph(ceph) => {
                ceph.monitor_addr()?;
                for (field, value) in [("pool", &ceph.pool), ("volume", &ceph.volume), ("user", &ceph.user)] {
                    if value.is_empty() {
                        return Err(FlexVolumeError::invalid_field(field, "must not be empty"));
                    }
                }
                base64::engine::general_purpose::STANDARD
                    .decode(ceph.secret.trim())
                    .map_err(|e| FlexVolumeError::invalid_field("secret", e.to_string()))?;
            }
        }
        Ok(())
    }
}

impl Qcow2Volume {
    /// Capacity in bytes, defaulting to [`DEFAULT_QCOW2_CAPACITY`].
    pub fn capacity_bytes(&self) -> Result<u64> {
        parse_capacity(self.capacity.as_deref().unwrap_or(DEFAULT_QCOW2_CAPACITY))
    }
}

impl CephVolume {
    /// Split `monitor` into host and port.
    pub fn monitor_addr(&self) -> Result<(String, u16)> {
        let (host, port) = self
            .monitor
            .rsplit_once(':')
            .ok_or_else(|| FlexVolumeError::invalid_field("monitor", "expected host:port"))?;
        if host.is_empty() {
            return Err(FlexVolumeError::invalid_field("monitor", "empty host"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| FlexVolumeError::invalid_field("monitor", format!("invalid port: {}", port)))?;
        Ok((host.to_string(), port))
    }
}

/// Parse a capacity string like `2MB`, `512MiB`, `10G` or `4096` into bytes.
///
/// Decimal units (`KB`, `MB`, ...) are powers of 1000, binary units and bare
/// letters (`K`, `KiB`, ...) are powers of 1024. No unit means bytes.
pub fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);

    let value: u64 = num
        .parse()
        .map_err(|_| FlexVolumeError::invalid_field("capacity", format!("invalid number in {:?}", s)))?;
    if value == 0 {
        return Err(FlexVolumeError::invalid_field("capacity", "must be positive"));
    }

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KiB" => 1 << 10,
        "KB" => 1_000,
        "M" | "MiB" => 1 << 20,
        "MB" => 1_000_000,
        "G" | "GiB" => 1 << 30,
        "GB" => 1_000_000_000,
        "T" | "TiB" => 1 << 40,
        "TB" => 1_000_000_000_000,
        other => {
            return Err(FlexVolumeError::invalid_field(
                "capacity",
                format!("unknown unit {:?}", other),
            ))
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| FlexVolumeError::invalid_field("capacity", "overflow"))
}
