//! First-boot configuration images.
//!
//! [`NoCloudProvider`] writes a cloud-init NoCloud data source: a `meta-data`
//! and a `user-data` file, optionally packed into an ISO labelled `cidata`.

use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::process::Command;

/// User-data key for authorized keys.
const SSH_AUTHORIZED_KEYS: &str = "ssh_authorized_keys";

/// Volume label cloud-init looks for.
const NOCLOUD_LABEL: &str = "cidata";

/// 9p share the guest should mount at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestMount {
    /// Share tag.
    pub tag: String,
    /// Mount point inside the guest.
    pub path: PathBuf,
    /// Read-only mount.
    pub read_only: bool,
}

/// Inputs for a boot-config image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootConfig {
    /// Guest host name.
    pub hostname: String,
    /// SSH authorized keys.
    pub ssh_keys: Vec<String>,
    /// Extra user-data.
    pub user_data: Option<Mapping>,
    /// Shares to mount.
    pub mounts: Vec<GuestMount>,
}

/// Layout of a produced image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootImageKind {
    /// ISO 9660 file.
    Iso,
    /// Plain directory.
    Directory,
}

/// A produced boot-config image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    /// Image path.
    pub path: PathBuf,
    /// Image layout.
    pub kind: BootImageKind,
}

/// Produces and removes boot-config images.
pub trait BootConfigProvider: Send + Sync {
    /// Build the image for `container_id`.
    fn prepare(&self, container_id: &str, config: &BootConfig) -> Result<BootImage>;

    /// Remove everything `prepare` produced. Missing files are not an error.
    fn cleanup(&self, container_id: &str) -> Result<()>;
}

/// cloud-init NoCloud provider.
#[derive(Debug, Clone)]
pub struct NoCloudProvider {
    dir: PathBuf,
    iso_tool: Option<String>,
}

impl NoCloudProvider {
    /// Stage images under `dir`. Without `iso_tool` the staging directory is
    /// the image.
    pub fn new(dir: impl Into<PathBuf>, iso_tool: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            iso_tool,
        }
    }

    fn staging_dir(&self, container_id: &str) -> PathBuf {
        self.dir.join(container_id)
    }

    fn iso_path(&self, container_id: &str) -> PathBuf {
        self.dir.join(format!("{}.iso", container_id))
    }

    fn build_iso(&self, tool: &str, staging: &Path, iso: &Path) -> Result<()> {
        tracing::debug!(tool = %tool, iso = %iso.display(), "building boot-config iso");
        let output = Command::new(tool)
            .arg("-o")
            .arg(iso)
            .args(["-V", NOCLOUD_LABEL, "-r", "-J"])
            .arg(staging)
            .output()
            .map_err(|e| Error::command_failed(tool, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::BootConfig(format!(
                "{} failed for {}: {}",
                tool,
                iso.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl BootConfigProvider for NoCloudProvider {
    fn prepare(&self, container_id: &str, config: &BootConfig) -> Result<BootImage> {
        let staging = self.staging_dir(container_id);
        std::fs::create_dir_all(&staging)?;

        std::fs::write(staging.join("meta-data"), meta_data(container_id, config)?)?;
        std::fs::write(staging.join("user-data"), user_data(config)?)?;

        let image = match &self.iso_tool {
            Some(tool) => {
                let iso = self.iso_path(container_id);
                self.build_iso(tool, &staging, &iso)?;
                BootImage {
                    path: iso,
                    kind: BootImageKind::Iso,
                }
            }
            None => BootImage {
                path: staging,
                kind: BootImageKind::Directory,
            },
        };
        tracing::info!(container_id = %container_id, path = %image.path.display(), "prepared boot config");
        Ok(image)
    }

    fn cleanup(&self, container_id: &str) -> Result<()> {
        match std::fs::remove_dir_all(self.staging_dir(container_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        match std::fs::remove_file(self.iso_path(container_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn yaml_err(e: serde_yaml::Error) -> Error {
    Error::BootConfig(e.to_string())
}

fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Render `meta-data`.
fn meta_data(container_id: &str, config: &BootConfig) -> Result<String> {
    let mut doc = Mapping::new();
    doc.insert(string("instance-id"), string(container_id));
    doc.insert(string("local-hostname"), string(&config.hostname));
    if !config.ssh_keys.is_empty() {
        let keys = config.ssh_keys.iter().map(|k| string(k)).collect();
        doc.insert(string("public-keys"), Value::Sequence(keys));
    }
    serde_yaml::to_string(&doc).map_err(yaml_err)
}

/// Render `user-data`: the requested document plus keys and share mounts.
fn user_data(config: &BootConfig) -> Result<String> {
    let mut doc = config.user_data.clone().unwrap_or_default();

    if !config.ssh_keys.is_empty() {
        let key = string(SSH_AUTHORIZED_KEYS);
        let mut keys = match doc.remove(&key) {
            Some(Value::Sequence(existing)) => existing,
            Some(other) => vec![other],
            None => Vec::new(),
        };
        keys.extend(config.ssh_keys.iter().map(|k| string(k)));
        doc.insert(key, Value::Sequence(keys));
    }

    if !config.mounts.is_empty() {
        let key = string("mounts");
        let mut mounts = match doc.remove(&key) {
            Some(Value::Sequence(existing)) => existing,
            _ => Vec::new(),
        };
        for m in &config.mounts {
            let opts = if m.read_only {
                "trans=virtio,version=9p2000.L,ro"
            } else {
                "trans=virtio,version=9p2000.L,rw"
            };
            mounts.push(Value::Sequence(vec![
                string(&m.tag),
                string(&m.path.to_string_lossy()),
                string("9p"),
                string(opts),
                string("0"),
                string("0"),
            ]));
        }
        doc.insert(key, Value::Sequence(mounts));
    }

    let body = serde_yaml::to_string(&doc).map_err(yaml_err)?;
    Ok(format!("#cloud-config\n{}", body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BootConfig {
        BootConfig {
            hostname: "web".to_string(),
            ssh_keys: vec!["ssh-rsa AAAA user@host".to_string()],
            user_data: None,
            mounts: vec![],
        }
    }

    #[test]
    fn test_prepare_directory_image() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = NoCloudProvider::new(tmp.path(), None);
        let image = provider.prepare("c1", &config()).unwrap();

        assert_eq!(image.kind, BootImageKind::Directory);
        assert_eq!(image.path, tmp.path().join("c1"));
        let meta = std::fs::read_to_string(image.path.join("meta-data")).unwrap();
        assert!(meta.contains("instance-id: c1"));
        assert!(meta.contains("local-hostname: web"));
        let user = std::fs::read_to_string(image.path.join("user-data")).unwrap();
        assert!(user.starts_with("#cloud-config\n"));
        assert!(user.contains("ssh-rsa AAAA user@host"));
    }

    #[test]
    fn test_user_data_merges_keys_and_mounts() {
        let mut cfg = config();
        let mut extra = Mapping::new();
        extra.insert(
            string(SSH_AUTHORIZED_KEYS),
            Value::Sequence(vec![string("ssh-ed25519 BBBB")]),
        );
        extra.insert(string("runcmd"), Value::Sequence(vec![string("echo hi")]));
        cfg.user_data = Some(extra);
        cfg.mounts.push(GuestMount {
            tag: "vmlet0".to_string(),
            path: "/data".into(),
            read_only: false,
        });

        let text = user_data(&cfg).unwrap();
        let parsed: Mapping = serde_yaml::from_str(text.trim_start_matches("#cloud-config\n")).unwrap();
        let keys = parsed[SSH_AUTHORIZED_KEYS].as_sequence().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(parsed.contains_key("runcmd"));
        let mounts = parsed["mounts"].as_sequence().unwrap();
        assert_eq!(mounts[0][0], string("vmlet0"));
        assert_eq!(mounts[0][2], string("9p"));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = NoCloudProvider::new(tmp.path(), None);
        provider.prepare("c1", &config()).unwrap();
        provider.cleanup("c1").unwrap();
        assert!(!tmp.path().join("c1").exists());
        provider.cleanup("c1").unwrap();
    }

    #[test]
    fn test_missing_iso_tool_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = NoCloudProvider::new(tmp.path(), Some("/nonexistent/genisoimage".to_string()));
        let err = provider.prepare("c1", &config()).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }
}
