//! Discovery of flexvolume-backed secondary volumes.
//!
//! The volume driver leaves one directory per volume under
//! `<kubelet root>/<pod uid>/volumes/vmlet~flexvolume_driver/`, each holding
//! the definition written at mount time.

use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use vmlet_flexvolume::{StoredVolume, DRIVER_DIR_NAME};

/// Directory holding a pod's flexvolume mounts.
pub fn volume_root(kubelet_root: &Path, pod_uid: &str) -> PathBuf {
    kubelet_root.join(pod_uid).join("volumes").join(DRIVER_DIR_NAME)
}

/// A volume found in the pod's flexvolume directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredVolume {
    /// Directory name, used as the volume name.
    pub name: String,
    /// Mount directory.
    pub dir: PathBuf,
    /// Stored definition.
    pub stored: StoredVolume,
}

/// Load every volume under `root`, sorted by name. A missing root means no
/// volumes; a directory without a valid definition is an error.
pub fn discover(root: &Path) -> Result<Vec<DiscoveredVolume>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut volumes = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let stored = StoredVolume::load(&dir).map_err(|e| Error::invalid_mount(&dir, e.to_string()))?;
        tracing::debug!(volume = %name, kind = stored.definition.type_name(), "found flexvolume");
        volumes.push(DiscoveredVolume { name, dir, stored });
    }
    volumes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(volumes)
}

/// Which host block devices raw volumes may use.
#[derive(Debug, Clone)]
pub struct RawDevicePolicy {
    patterns: Vec<Regex>,
}

impl RawDevicePolicy {
    /// Build from glob patterns relative to `/dev/`, e.g. `loop*`.
    pub fn new(globs: &[String]) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|g| {
                Regex::new(&glob_to_regex(g))
                    .map_err(|e| Error::ConfigLoad(format!("raw_devices pattern {:?}: {}", g, e)))
            })
            .collect::<Result<_>>()?;
        Ok(Self { patterns })
    }

    /// Whether `path` (an absolute `/dev/...` path) is allowed.
    pub fn allows(&self, path: &str) -> bool {
        let Some(dev) = path.strip_prefix("/dev/") else {
            return false;
        };
        self.patterns.iter().any(|p| p.is_match(dev))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut re = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    re
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_volume(root: &Path, name: &str, json: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(vmlet_flexvolume::DEFINITION_FILE), json).unwrap();
        dir
    }

    #[test]
    fn test_volume_root_layout() {
        assert_eq!(
            volume_root(Path::new("/var/lib/kubelet/pods"), "uid-1"),
            PathBuf::from("/var/lib/kubelet/pods/uid-1/volumes/vmlet~flexvolume_driver")
        );
    }

    #[test]
    fn test_discover_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        write_volume(tmp.path(), "vol2", r#"{"type":"qcow2","uuid":"u2"}"#);
        write_volume(tmp.path(), "vol1", r#"{"type":"raw","path":"/dev/loop0","uuid":"u1"}"#);

        let found = discover(tmp.path()).unwrap();
        let names: Vec<&str> = found.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["vol1", "vol2"]);
        assert_eq!(found[0].stored.uuid, "u1");
    }

    #[test]
    fn test_discover_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover(&tmp.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_discover_rejects_broken_definition() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();
        let err = discover(tmp.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_raw_device_policy() {
        let policy = RawDevicePolicy::new(&["loop*".to_string(), "sd?".to_string()]).unwrap();
        assert!(policy.allows("/dev/loop0"));
        assert!(policy.allows("/dev/loop12"));
        assert!(policy.allows("/dev/sdb"));
        assert!(!policy.allows("/dev/sdb1"));
        assert!(!policy.allows("/dev/nvme0n1"));
        assert!(!policy.allows("/tmp/loop0"));
        assert!(!policy.allows("/dev/mapper/loop0"));
    }
}
