//! libvirt XML rendering.

use super::definition::{DiskBus, DiskDevice, DiskSource, DomainDefinition, DomainDisk};
use std::fmt::Write;

/// XML namespace for the container metadata element.
const METADATA_NS: &str = "urn:vmlet:container:1";

/// Escape text for use in element content and attribute values.
pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

// Writing to a String never fails, so the fmt results below are ignored.
pub(crate) fn render_domain(def: &DomainDefinition) -> String {
    let mut x = String::new();
    let _ = writeln!(x, "<domain type='{}'>", def.domain_type.as_str());
    let _ = writeln!(x, "  <name>{}</name>", escape(&def.name));
    let _ = writeln!(x, "  <uuid>{}</uuid>", escape(&def.uuid));
    let _ = writeln!(x, "  <metadata>");
    let _ = writeln!(
        x,
        "    <vmlet:container xmlns:vmlet='{}' id='{}' netns='{}'/>",
        METADATA_NS,
        escape(&def.container_id),
        escape(&def.network_namespace)
    );
    let _ = writeln!(x, "  </metadata>");
    let _ = writeln!(x, "  <memory unit='b'>{}</memory>", def.effective_memory_bytes());
    let _ = writeln!(x, "  <vcpu>{}</vcpu>", def.vcpus);

    if !def.cpu_tune.is_empty() {
        let _ = writeln!(x, "  <cputune>");
        if let Some(shares) = def.cpu_tune.shares {
            let _ = writeln!(x, "    <shares>{}</shares>", shares);
        }
        if let Some(period) = def.cpu_tune.period {
            let _ = writeln!(x, "    <period>{}</period>", period);
        }
        if let Some(quota) = def.cpu_tune.quota {
            let _ = writeln!(x, "    <quota>{}</quota>", quota);
        }
        let _ = writeln!(x, "  </cputune>");
    }

    let _ = writeln!(x, "  <os>");
    let _ = writeln!(x, "    <type>hvm</type>");
    let _ = writeln!(x, "    <boot dev='hd'/>");
    let _ = writeln!(x, "  </os>");
    let _ = writeln!(x, "  <features><acpi/><apic/></features>");
    let _ = writeln!(x, "  <on_poweroff>destroy</on_poweroff>");
    let _ = writeln!(x, "  <on_reboot>restart</on_reboot>");
    let _ = writeln!(x, "  <on_crash>destroy</on_crash>");
    let _ = writeln!(x, "  <devices>");

    if def.disks.iter().any(|d| d.bus == DiskBus::Scsi) {
        let _ = writeln!(x, "    <controller type='scsi' index='0' model='virtio-scsi'/>");
    }
    for disk in &def.disks {
        render_disk(&mut x, disk);
    }
    for fs in &def.filesystems {
        let _ = writeln!(x, "    <filesystem type='mount' accessmode='squash'>");
        let _ = writeln!(x, "      <source dir='{}'/>", escape(&fs.source.to_string_lossy()));
        let _ = writeln!(x, "      <target dir='{}'/>", escape(&fs.target_tag));
        if fs.read_only {
            let _ = writeln!(x, "      <readonly/>");
        }
        let _ = writeln!(x, "    </filesystem>");
    }

    let _ = writeln!(x, "    <serial type='pty'><target port='0'/></serial>");
    let _ = writeln!(x, "    <console type='pty'><target type='serial' port='0'/></console>");
    let _ = writeln!(x, "  </devices>");
    let _ = writeln!(x, "</domain>");
    x
}

fn render_disk(x: &mut String, disk: &DomainDisk) {
    let device = match disk.device {
        DiskDevice::Disk => "disk",
        DiskDevice::Cdrom => "cdrom",
    };
    let driver_type = match disk.source {
        DiskSource::Dir { .. } => "fat",
        _ => disk.format.as_str(),
    };
    let _ = writeln!(x, "    <disk type='{}' device='{}'>", disk.source.kind(), device);
    let _ = writeln!(x, "      <driver name='qemu' type='{}'/>", driver_type);

    match &disk.source {
        DiskSource::File { path } => {
            let _ = writeln!(x, "      <source file='{}'/>", escape(&path.to_string_lossy()));
        }
        DiskSource::Block { path } => {
            let _ = writeln!(x, "      <source dev='{}'/>", escape(&path.to_string_lossy()));
        }
        DiskSource::Dir { path } => {
            let _ = writeln!(x, "      <source dir='{}'/>", escape(&path.to_string_lossy()));
        }
        DiskSource::Network {
            protocol,
            name,
            hosts,
            auth,
        } => {
            if let Some(auth) = auth {
                let _ = writeln!(x, "      <auth username='{}'>", escape(&auth.username));
                let _ = writeln!(
                    x,
                    "        <secret type='ceph' uuid='{}'/>",
                    escape(&auth.secret_uuid)
                );
                let _ = writeln!(x, "      </auth>");
            }
            let _ = writeln!(
                x,
                "      <source protocol='{}' name='{}'>",
                escape(protocol),
                escape(name)
            );
            for host in hosts {
                let _ = writeln!(x, "        <host name='{}' port='{}'/>", escape(&host.name), host.port);
            }
            let _ = writeln!(x, "      </source>");
        }
    }

    let _ = writeln!(
        x,
        "      <target dev='{}' bus='{}'/>",
        escape(&disk.target_dev),
        disk.bus.as_str()
    );
    if disk.read_only {
        let _ = writeln!(x, "      <readonly/>");
    }
    let _ = writeln!(x, "    </disk>");
}

/// Secret definition for a ceph key.
pub(crate) fn render_ceph_secret(uuid: &str, username: &str) -> String {
    format!(
        "<secret ephemeral='no' private='yes'>\n  <uuid>{}</uuid>\n  <usage type='ceph'>\n    <name>client.{} secret</name>\n  </usage>\n</secret>\n",
        escape(uuid),
        escape(username)
    )
}

/// UUIDs of the ceph secrets referenced by a domain XML document.
///
/// Accepts both quote styles since `virsh dumpxml` output differs from what
/// [`render_domain`] writes.
pub(crate) fn ceph_secret_uuids(document: &str) -> Vec<String> {
    let mut uuids = Vec::new();
    let mut rest = document;
    while let Some(start) = rest.find("<secret ") {
        let tail = &rest[start..];
        let Some(end) = tail.find('>') else { break };
        let tag = &tail[..end];
        if attribute(tag, "type") == Some("ceph") {
            if let Some(uuid) = attribute(tag, "uuid") {
                uuids.push(uuid.to_string());
            }
        }
        rest = &tail[end..];
    }
    uuids
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    ['\'', '"'].into_iter().find_map(|quote| {
        let prefix = format!(" {}={}", name, quote);
        let value = &tag[tag.find(&prefix)? + prefix.len()..];
        value.find(quote).map(|end| &value[..end])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virt::definition::*;

    fn definition() -> DomainDefinition {
        DomainDefinition {
            name: "vmlet-abc".to_string(),
            uuid: "abc".to_string(),
            domain_type: DomainType::Kvm,
            vcpus: 2,
            memory_bytes: None,
            cpu_tune: CpuTune::default(),
            disks: vec![DomainDisk {
                target_dev: "sda".to_string(),
                bus: DiskBus::Scsi,
                device: DiskDevice::Disk,
                format: DiskFormat::Qcow2,
                source: DiskSource::File {
                    path: "/var/lib/vmlet/volumes/vmlet_root_s1".into(),
                },
                read_only: false,
            }],
            filesystems: vec![],
            network_namespace: "/var/run/netns/a&b".to_string(),
            container_id: "abc".to_string(),
        }
    }

    #[test]
    fn test_render_basic_domain() {
        let xml = definition().to_xml();
        assert!(xml.contains("<domain type='kvm'>"));
        assert!(xml.contains("<name>vmlet-abc</name>"));
        assert!(xml.contains("<vcpu>2</vcpu>"));
        assert!(xml.contains(&format!("<memory unit='b'>{}</memory>", DEFAULT_MEMORY_BYTES)));
        assert!(xml.contains("model='virtio-scsi'"));
        assert!(xml.contains("<target dev='sda' bus='scsi'/>"));
        assert!(xml.contains("netns='/var/run/netns/a&amp;b'"));
        assert!(!xml.contains("<cputune>"));
    }

    #[test]
    fn test_render_cputune_only_set_fields() {
        let mut def = definition();
        def.cpu_tune.quota = Some(25000);
        let xml = def.to_xml();
        assert!(xml.contains("<quota>25000</quota>"));
        assert!(!xml.contains("<shares>"));
        assert!(!xml.contains("<period>"));
    }

    #[test]
    fn test_render_ceph_disk() {
        let mut def = definition();
        def.disks.push(DomainDisk {
            target_dev: "sdb".to_string(),
            bus: DiskBus::Scsi,
            device: DiskDevice::Disk,
            format: DiskFormat::Raw,
            source: DiskSource::Network {
                protocol: "rbd".to_string(),
                name: "libvirt-pool/rbd-test-image".to_string(),
                hosts: vec![NetworkHost {
                    name: "127.0.0.1".to_string(),
                    port: 6789,
                }],
                auth: Some(DiskAuth {
                    username: "libvirt".to_string(),
                    secret_uuid: "u-1".to_string(),
                    secret_value: "Zm9vYmFyCg==".to_string(),
                }),
            },
            read_only: false,
        });
        let xml = def.to_xml();
        assert!(xml.contains("<disk type='network' device='disk'>"));
        assert!(xml.contains("<source protocol='rbd' name='libvirt-pool/rbd-test-image'>"));
        assert!(xml.contains("<host name='127.0.0.1' port='6789'/>"));
        assert!(xml.contains("<secret type='ceph' uuid='u-1'/>"));
        assert!(!xml.contains("Zm9vYmFyCg=="), "key must not leak into the domain XML");
        assert_eq!(ceph_secret_uuids(&xml), vec!["u-1".to_string()]);
    }

    #[test]
    fn test_ceph_secret_uuids_from_dumpxml() {
        let dumped = r#"<disk type="network" device="disk">
          <auth username="libvirt">
            <secret type="ceph" uuid="c0ffee00-0000-4000-8000-000000000002"/>
          </auth>
        </disk>"#;
        assert_eq!(
            ceph_secret_uuids(dumped),
            vec!["c0ffee00-0000-4000-8000-000000000002".to_string()]
        );
        assert!(ceph_secret_uuids(&definition().to_xml()).is_empty());
    }

    #[test]
    fn test_ceph_secret_is_private() {
        let secret = render_ceph_secret("u-1", "libvirt");
        assert!(secret.contains("private='yes'"));
        assert!(secret.contains("<name>client.libvirt secret</name>"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b>'c'\"&"), "a&lt;b&gt;&apos;c&apos;&quot;&amp;");
    }
}
