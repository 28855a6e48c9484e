//! Guest device naming.

use crate::error::{Error, Result};
use crate::virt::DiskBus;

/// Devices a single bus letter range can name.
pub const MAX_DEVICES: usize = 26;

/// Hands out `sda, sdb, ...` or `vda, vdb, ...` in order.
#[derive(Debug, Clone)]
pub struct DeviceNamer {
    bus: DiskBus,
    next: usize,
}

impl DeviceNamer {
    /// Start naming devices on `bus`.
    pub fn new(bus: DiskBus) -> Self {
        Self { bus, next: 0 }
    }

    /// Bus the names belong to.
    pub fn bus(&self) -> DiskBus {
        self.bus
    }

    /// Next free device name.
    pub fn next_name(&mut self) -> Result<String> {
        if self.next >= MAX_DEVICES {
            return Err(Error::validation(format!(
                "too many disks: at most {} devices per container",
                MAX_DEVICES
            )));
        }
        let letter = char::from(b'a' + self.next as u8);
        self.next += 1;
        Ok(format!("{}{}", self.bus.device_prefix(), letter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scsi_names() {
        let mut namer = DeviceNamer::new(DiskBus::Scsi);
        assert_eq!(namer.next_name().unwrap(), "sda");
        assert_eq!(namer.next_name().unwrap(), "sdb");
    }

    #[test]
    fn test_virtio_names_and_limit() {
        let mut namer = DeviceNamer::new(DiskBus::Virtio);
        let names: Vec<String> = (0..MAX_DEVICES).map(|_| namer.next_name().unwrap()).collect();
        assert_eq!(names.first().map(String::as_str), Some("vda"));
        assert_eq!(names.last().map(String::as_str), Some("vdz"));
        assert!(namer.next_name().is_err());
    }
}
