//! Container resource limits to domain resource settings.

use crate::annotations;
use crate::container::ResourceSpec;
use crate::error::Result;
use crate::virt::CpuTune;
use std::collections::BTreeMap;

/// vCPUs given to a domain without a vCPU count annotation.
pub const DEFAULT_VCPUS: u32 = 1;

/// Domain-side resource settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainResources {
    /// Number of vCPUs.
    pub vcpus: u32,
    /// Memory limit in bytes, `None` for the hypervisor default.
    pub memory_bytes: Option<u64>,
    /// CPU scheduler limits.
    pub cpu_tune: CpuTune,
}

/// Translate `spec` and the vCPU annotation in `annotations`.
///
/// The annotation decides the vCPU count on its own; CPU shares and quota
/// never change it. Zero or negative limits are treated as unset.
pub fn translate(spec: &ResourceSpec, annotations: &BTreeMap<String, String>) -> Result<DomainResources> {
    let vcpus = annotations::parse_vcpu_count(annotations)?.unwrap_or(DEFAULT_VCPUS);

    Ok(DomainResources {
        vcpus,
        memory_bytes: positive(spec.memory_limit_bytes),
        cpu_tune: CpuTune {
            shares: positive(spec.cpu_shares),
            period: positive(spec.cpu_period),
            quota: (spec.cpu_quota > 0).then_some(spec.cpu_quota),
        },
    })
}

fn positive(v: i64) -> Option<u64> {
    u64::try_from(v).ok().filter(|v| *v > 0)
}
