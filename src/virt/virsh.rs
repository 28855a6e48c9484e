//! libvirt backend built on the `virsh` command line tool.
//!
//! Every operation is a single `virsh --connect <uri> ...` invocation. Domain
//! definitions are rendered to XML and passed through a temporary file.

use super::{
    xml, Domain, DomainConnection, DomainDefinition, DomainState, DiskSource, StorageConnection,
    StoragePool, StorageVolume, VolumeSpec,
};
use crate::error::{Error, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

/// What a command operates on, used to turn "not found" failures into
/// typed errors.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Domain(&'a str),
    Pool(&'a str),
    Volume(&'a str),
    Other,
}

/// `virsh` invocation settings.
#[derive(Debug, Clone)]
pub struct Virsh {
    uri: String,
    binary: String,
}

impl Virsh {
    /// Use the `virsh` binary from `PATH` against `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            binary: "virsh".to_string(),
        }
    }

    /// Override the binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn run(&self, target: Target<'_>, args: &[&str]) -> Result<String> {
        let op = args.first().copied().unwrap_or_default();
        tracing::debug!(uri = %self.uri, args = ?args, "running virsh");

        let output = Command::new(&self.binary)
            .arg("--connect")
            .arg(&self.uri)
            .args(args)
            .output()
            .map_err(|e| Error::command_failed(format!("virsh {}", op), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(op, target, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Pass an XML document to `virsh <op> <file>`.
    fn run_with_xml(&self, op: &str, document: &str) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("vmlet-")
            .suffix(".xml")
            .tempfile()?;
        file.write_all(document.as_bytes())?;
        file.flush()?;
        let path = file.path().to_string_lossy().into_owned();
        self.run(Target::Other, &[op, &path])
    }

    /// Define the ceph secrets a domain's disks reference and return their
    /// UUIDs. Nothing stays defined when this fails.
    fn define_secrets(&self, definition: &DomainDefinition) -> Result<Vec<String>> {
        let mut defined = Vec::new();
        for disk in &definition.disks {
            let DiskSource::Network { auth: Some(auth), .. } = &disk.source else {
                continue;
            };
            tracing::debug!(secret = %auth.secret_uuid, user = %auth.username, "defining ceph secret");
            let result = self
                .run_with_xml(
                    "secret-define",
                    &xml::render_ceph_secret(&auth.secret_uuid, &auth.username),
                )
                .and_then(|_| {
                    defined.push(auth.secret_uuid.clone());
                    self.set_secret_value(&auth.secret_uuid, &auth.secret_value)
                });
            if let Err(e) = result {
                self.undefine_secrets(&defined);
                return Err(e);
            }
        }
        Ok(defined)
    }

    /// Store a base64 key through a private temporary file so it never
    /// appears on a command line.
    fn set_secret_value(&self, uuid: &str, value: &str) -> Result<()> {
        let mut file = tempfile::Builder::new().prefix("vmlet-secret-").tempfile()?;
        file.write_all(value.as_bytes())?;
        file.flush()?;
        let path = file.path().to_string_lossy().into_owned();
        self.run(Target::Other, &secret_value_args(uuid, &path)).map(|_| ())
    }

    /// Best effort: secrets may already be gone.
    fn undefine_secrets(&self, uuids: &[String]) {
        for uuid in uuids {
            if let Err(e) = self.run(Target::Other, &["secret-undefine", uuid]) {
                tracing::warn!(secret = %uuid, error = %e, "secret undefine failed");
            }
        }
    }
}

fn secret_value_args<'a>(uuid: &'a str, path: &'a str) -> [&'a str; 5] {
    ["secret-set-value", "--secret", uuid, "--file", path]
}

fn classify_failure(op: &str, target: Target<'_>, stderr: &str) -> Error {
    let lower = stderr.to_ascii_lowercase();
    match target {
        Target::Domain(name)
            if lower.contains("domain not found") || lower.contains("failed to get domain") =>
        {
            Error::DomainNotFound(name.to_string())
        }
        Target::Pool(name)
            if lower.contains("storage pool not found") || lower.contains("failed to get pool") =>
        {
            Error::pool_not_found(name)
        }
        Target::Volume(name)
            if lower.contains("storage volume not found") || lower.contains("failed to get vol") =>
        {
            Error::volume_not_found(name)
        }
        _ => Error::command_failed(format!("virsh {}", op), stderr),
    }
}

/// Extract volume names from `virsh vol-list` table output.
fn parse_vol_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.trim_start().starts_with('-'))
        .skip(1)
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Extract the byte count from `virsh vol-info --bytes` output.
fn parse_vol_capacity(output: &str) -> Option<u64> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Capacity:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}

/// Production domain and storage connection.
#[derive(Debug, Clone)]
pub struct VirshConnection {
    virsh: Arc<Virsh>,
}

impl VirshConnection {
    /// Connect to `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self::with_virsh(Virsh::new(uri))
    }

    /// Use custom invocation settings.
    pub fn with_virsh(virsh: Virsh) -> Self {
        Self {
            virsh: Arc::new(virsh),
        }
    }

    fn domain(&self, name: String, uuid: String) -> Box<dyn Domain> {
        Box::new(VirshDomain {
            virsh: Arc::clone(&self.virsh),
            name,
            uuid,
        })
    }
}

impl DomainConnection for VirshConnection {
    fn define_domain(&self, definition: &DomainDefinition) -> Result<Box<dyn Domain>> {
        tracing::info!(domain = %definition.name, uuid = %definition.uuid, "defining domain");
        let secrets = self.virsh.define_secrets(definition)?;
        if let Err(e) = self.virsh.run_with_xml("define", &definition.to_xml()) {
            self.virsh.undefine_secrets(&secrets);
            return Err(Error::hypervisor(format!("define {}: {}", definition.name, e)));
        }
        Ok(self.domain(definition.name.clone(), definition.uuid.clone()))
    }

    fn lookup_domain_by_uuid(&self, uuid: &str) -> Result<Box<dyn Domain>> {
        let name = self.virsh.run(Target::Domain(uuid), &["domname", uuid])?;
        Ok(self.domain(name, uuid.to_string()))
    }

    fn lookup_domain_by_name(&self, name: &str) -> Result<Box<dyn Domain>> {
        let uuid = self.virsh.run(Target::Domain(name), &["domuuid", name])?;
        Ok(self.domain(name.to_string(), uuid))
    }
}

impl StorageConnection for VirshConnection {
    fn lookup_pool_by_name(&self, name: &str) -> Result<Arc<dyn StoragePool>> {
        self.virsh.run(Target::Pool(name), &["pool-info", name])?;
        Ok(Arc::new(VirshPool {
            virsh: Arc::clone(&self.virsh),
            name: name.to_string(),
        }))
    }
}

struct VirshDomain {
    virsh: Arc<Virsh>,
    name: String,
    uuid: String,
}

impl VirshDomain {
    fn run(&self, op: &str) -> Result<String> {
        self.virsh.run(Target::Domain(&self.name), &[op, &self.name])
    }
}

impl Domain for VirshDomain {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Result<()> {
        self.run("start").map(|_| ())
    }

    fn shutdown(&self) -> Result<()> {
        self.run("shutdown").map(|_| ())
    }

    fn destroy(&self) -> Result<()> {
        self.run("destroy").map(|_| ())
    }

    fn undefine(&self) -> Result<()> {
        let secrets = match self.run("dumpxml") {
            Ok(document) => xml::ceph_secret_uuids(&document),
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => {
                tracing::warn!(domain = %self.name, error = %e, "cannot read domain secrets");
                Vec::new()
            }
        };
        self.run("undefine")?;
        self.virsh.undefine_secrets(&secrets);
        Ok(())
    }

    fn state(&self) -> Result<DomainState> {
        let out = self.run("domstate")?;
        DomainState::from_virsh(&out)
            .ok_or_else(|| Error::hypervisor(format!("unknown domain state {:?} for {}", out, self.name)))
    }
}

struct VirshPool {
    virsh: Arc<Virsh>,
    name: String,
}

impl VirshPool {
    fn volume(&self, name: &str) -> Box<dyn StorageVolume> {
        Box::new(VirshVolume {
            virsh: Arc::clone(&self.virsh),
            pool: self.name.clone(),
            name: name.to_string(),
        })
    }
}

impl StoragePool for VirshPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_volume(&self, spec: &VolumeSpec) -> Result<Box<dyn StorageVolume>> {
        tracing::info!(pool = %self.name, volume = %spec.name, capacity = spec.capacity, "creating volume");
        let capacity = format!("{}B", spec.capacity);
        let backing = spec
            .backing_store
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let mut args = vec![
            "vol-create-as",
            "--pool",
            self.name.as_str(),
            "--name",
            spec.name.as_str(),
            "--capacity",
            capacity.as_str(),
            "--format",
            spec.format.as_str(),
        ];
        if let Some(backing) = &backing {
            args.extend(["--backing-vol", backing.as_str(), "--backing-vol-format", "qcow2"]);
        }

        self.virsh
            .run(Target::Pool(&self.name), &args)
            .map_err(|e| Error::storage(format!("create volume {}: {}", spec.name, e)))?;
        Ok(self.volume(&spec.name))
    }

    fn lookup_volume_by_name(&self, name: &str) -> Result<Box<dyn StorageVolume>> {
        self.virsh
            .run(Target::Volume(name), &["vol-path", "--pool", &self.name, name])?;
        Ok(self.volume(name))
    }

    fn list_volumes(&self) -> Result<Vec<String>> {
        let out = self.virsh.run(Target::Pool(&self.name), &["vol-list", &self.name])?;
        Ok(parse_vol_list(&out))
    }
}

struct VirshVolume {
    virsh: Arc<Virsh>,
    pool: String,
    name: String,
}

impl VirshVolume {
    fn run(&self, op: &str, extra: &[&str]) -> Result<String> {
        let mut args = vec![op, "--pool", self.pool.as_str(), self.name.as_str()];
        args.extend_from_slice(extra);
        self.virsh.run(Target::Volume(&self.name), &args)
    }
}

impl StorageVolume for VirshVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> Result<PathBuf> {
        self.run("vol-path", &[]).map(PathBuf::from)
    }

    fn capacity(&self) -> Result<u64> {
        let out = self.run("vol-info", &["--bytes"])?;
        parse_vol_capacity(&out)
            .ok_or_else(|| Error::storage(format!("cannot parse capacity of {}: {:?}", self.name, out)))
    }

    fn delete(&self) -> Result<()> {
        tracing::info!(pool = %self.pool, volume = %self.name, "deleting volume");
        self.run("vol-delete", &[]).map(|_| ())
    }
}
