#![cfg_attr(not(test), no_std)]

// Map and program ABI shared between the control plane and the cgroup_skb
// program. Keep this crate `no_std` friendly so it can be used from eBPF code.

/// Port the filter lets through for the tagged process (`Array<u32>`).
pub const MAP_PORT: &str = "port_map";
/// Process-name tag the filter applies to (`Array<ProcessName>`).
pub const MAP_PROCESS_NAME: &str = "process_name_map";
/// Number of packets dropped so far (`Array<u64>`).
pub const MAP_DROP_COUNTER: &str = "drop_counter";
/// Ingress program attached to the cgroup.
pub const PROGRAM_INGRESS: &str = "block_process_ports";

/// Every map above holds a single entry at this index.
pub const CONFIG_SLOT: u32 = 0;

/// Width of the kernel's task comm buffer.
pub const PROCESS_NAME_LEN: usize = 16;
/// Longest name the kernel stores in comm; the last byte is always NUL.
pub const COMM_NAME_MAX: usize = PROCESS_NAME_LEN - 1;

/// Fixed-width process name as compared by the kernel side.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ProcessName {
    pub bytes: [u8; PROCESS_NAME_LEN],
}

impl ProcessName {
    /// Copies at most `PROCESS_NAME_LEN` bytes of `name`, zero-filling the rest.
    pub fn from_bytes(name: &[u8]) -> Self {
        let mut bytes = [0u8; PROCESS_NAME_LEN];
        let len = name.len().min(PROCESS_NAME_LEN);
        bytes[..len].copy_from_slice(&name[..len]);
        Self { bytes }
    }

    /// Whether a task's comm can ever equal this name. A full 16-byte tag
    /// never does, since comm keeps its final byte for the NUL.
    pub fn fits_comm(&self) -> bool {
        self.bytes[COMM_NAME_MAX] == 0
    }

    /// The name without trailing padding.
    pub fn trimmed(&self) -> &[u8] {
        let mut end = PROCESS_NAME_LEN;
        while end > 0 && self.bytes[end - 1] == 0 {
            end -= 1;
        }
        &self.bytes[..end]
    }
}

// When compiled for userspace with the `user` feature enabled the crate
// exposes an implementation of `aya::Pod` so the name can be stored through
// aya's typed map APIs. The no_std eBPF side never pulls in aya.
#[cfg(feature = "user")]
mod user_impls {
    extern crate aya;

    use super::ProcessName;
    use aya::Pod;

    unsafe impl Pod for ProcessName {}
}
