//! VM-specific annotations.
//!
//! | key | value |
//! |-----|-------|
//! | `VmletVCPUCount` | positive integer |
//! | `VmletSSHKeys` | authorized keys, one per line |
//! | `VmletCloudInitUserData` | YAML mapping merged into cloud-init user-data |
//! | `VmletDiskDriver` | `scsi` (default) or `virtio` |

use crate::error::{Error, Result};
use crate::virt::DiskBus;
use std::collections::BTreeMap;

/// vCPU count override.
pub const VCPU_COUNT: &str = "VmletVCPUCount";

/// SSH authorized keys.
pub const SSH_KEYS: &str = "VmletSSHKeys";

/// cloud-init user-data document.
pub const CLOUD_INIT_USER_DATA: &str = "VmletCloudInitUserData";

/// Disk bus selector.
pub const DISK_DRIVER: &str = "VmletDiskDriver";

/// Parsed VM annotations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmAnnotations {
    /// vCPU count override.
    pub vcpu_count: Option<u32>,
    /// SSH authorized keys.
    pub ssh_keys: Vec<String>,
    /// Extra cloud-init user-data.
    pub user_data: Option<serde_yaml::Mapping>,
    /// Bus used for all disks.
    pub disk_driver: DiskBus,
}

impl VmAnnotations {
    /// Parse and validate the VM annotations in `annotations`. Unrelated
    /// keys are ignored.
    pub fn parse(annotations: &BTreeMap<String, String>) -> Result<Self> {
        let vcpu_count = parse_vcpu_count(annotations)?;

        let ssh_keys = annotations
            .get(SSH_KEYS)
            .map(|keys| {
                keys.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let user_data = match annotations.get(CLOUD_INIT_USER_DATA) {
            Some(doc) if !doc.trim().is_empty() => {
                let value: serde_yaml::Value = serde_yaml::from_str(doc)
                    .map_err(|e| Error::invalid_annotation(CLOUD_INIT_USER_DATA, e.to_string()))?;
                match value {
                    serde_yaml::Value::Mapping(m) => Some(m),
                    _ => {
                        return Err(Error::invalid_annotation(
                            CLOUD_INIT_USER_DATA,
                            "must be a YAML mapping",
                        ))
                    }
                }
            }
            _ => None,
        };

        let disk_driver = match annotations.get(DISK_DRIVER) {
            Some(d) => DiskBus::parse(d.trim()).ok_or_else(|| {
                Error::invalid_annotation(DISK_DRIVER, format!("unknown disk driver {:?}", d))
            })?,
            None => DiskBus::default(),
        };

        Ok(Self {
            vcpu_count,
            ssh_keys,
            user_data,
            disk_driver,
        })
    }

    /// Whether a boot-config volume has to be attached.
    pub fn needs_boot_config(&self) -> bool {
        !self.ssh_keys.is_empty() || self.user_data.is_some()
    }
}

/// Parse the vCPU count annotation. Absent means `None`.
pub fn parse_vcpu_count(annotations: &BTreeMap<String, String>) -> Result<Option<u32>> {
    let Some(raw) = annotations.get(VCPU_COUNT) else {
        return Ok(None);
    };
    let count: u32 = raw
        .trim()
        .parse()
        .map_err(|_| Error::invalid_annotation(VCPU_COUNT, format!("{:?} is not a positive integer", raw)))?;
    if count == 0 {
        return Err(Error::invalid_annotation(VCPU_COUNT, "must be at least 1"));
    }
    Ok(Some(count))
}

/// Sandbox annotations overlaid with container annotations.
pub fn effective(
    sandbox: &BTreeMap<String, String>,
    container: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = sandbox.clone();
    merged.extend(container.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_empty_annotations() {
        let parsed = VmAnnotations::parse(&BTreeMap::new()).unwrap();
        assert_eq!(parsed, VmAnnotations::default());
        assert!(!parsed.needs_boot_config());
    }

    #[test]
    fn test_vcpu_count() {
        assert_eq!(parse_vcpu_count(&map(&[(VCPU_COUNT, "4")])).unwrap(), Some(4));
        assert_eq!(parse_vcpu_count(&map(&[(VCPU_COUNT, " 2 ")])).unwrap(), Some(2));
        for bad in ["abc", "-1", "0", ""] {
            let err = parse_vcpu_count(&map(&[(VCPU_COUNT, bad)])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{:?}", bad);
        }
    }

    #[test]
    fn test_ssh_keys_split_lines() {
        let parsed = VmAnnotations::parse(&map(&[(SSH_KEYS, "key1\n\n  key2  \n")])).unwrap();
        assert_eq!(parsed.ssh_keys, vec!["key1", "key2"]);
        assert!(parsed.needs_boot_config());
    }

    #[test]
    fn test_user_data_must_be_mapping() {
        let parsed =
            VmAnnotations::parse(&map(&[(CLOUD_INIT_USER_DATA, "users:\n- name: cloudy\n")])).unwrap();
        assert!(parsed.user_data.unwrap().contains_key("users"));

        let err = VmAnnotations::parse(&map(&[(CLOUD_INIT_USER_DATA, "- a\n- b\n")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_disk_driver() {
        let parsed = VmAnnotations::parse(&map(&[(DISK_DRIVER, "virtio")])).unwrap();
        assert_eq!(parsed.disk_driver, DiskBus::Virtio);
        assert!(VmAnnotations::parse(&map(&[(DISK_DRIVER, "ide")])).is_err());
    }

    #[test]
    fn test_container_overrides_sandbox() {
        let merged = effective(
            &map(&[(VCPU_COUNT, "2"), (DISK_DRIVER, "virtio")]),
            &map(&[(VCPU_COUNT, "3")]),
        );
        assert_eq!(merged[VCPU_COUNT], "3");
        assert_eq!(merged[DISK_DRIVER], "virtio");
    }
}
