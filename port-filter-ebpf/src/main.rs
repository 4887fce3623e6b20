#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::helpers::bpf_get_current_comm;
use aya_ebpf::macros::{cgroup_skb, map};
use aya_ebpf::maps::Array;
use aya_ebpf::programs::SkBuffContext;
use port_filter_common::{CONFIG_SLOT, PROCESS_NAME_LEN, ProcessName};

// cgroup_skb sees the packet from the network header onwards.
const IPV4_MIN_HEADER_BYTES: usize = 20;
const IPV6_HEADER_BYTES: usize = 40;
const IPV4_PROTO_OFFSET: usize = 9;
const IPV6_NEXT_HEADER_OFFSET: usize = 6;
const TCP_DST_PORT_OFFSET: usize = 2;
const PROTO_TCP: u8 = 6;

const SKB_DROP: i32 = 0;
const SKB_PASS: i32 = 1;

#[map(name = "port_map")]
static PORT_MAP: Array<u32> = Array::<u32>::with_max_entries(1, 0);

#[map(name = "process_name_map")]
static PROCESS_NAME_MAP: Array<ProcessName> = Array::<ProcessName>::with_max_entries(1, 0);

#[map(name = "drop_counter")]
static DROP_COUNTER: Array<u64> = Array::<u64>::with_max_entries(1, 0);

#[cgroup_skb]
pub fn block_process_ports(ctx: SkBuffContext) -> i32 {
    let Some(dst_port) = tcp_dst_port(&ctx) else {
        return SKB_PASS;
    };
    if !process_matches() {
        return SKB_PASS;
    }
    match PORT_MAP.get(CONFIG_SLOT) {
        Some(allowed) if *allowed == dst_port as u32 => SKB_PASS,
        Some(_) => {
            record_drop();
            SKB_DROP
        }
        None => SKB_PASS,
    }
}

fn tcp_dst_port(ctx: &SkBuffContext) -> Option<u16> {
    let version_ihl: u8 = ctx.load(0).ok()?;
    let l4_offset = match version_ihl >> 4 {
        4 => {
            let proto: u8 = ctx.load(IPV4_PROTO_OFFSET).ok()?;
            let header_len = (version_ihl & 0x0f) as usize * 4;
            if proto != PROTO_TCP || header_len < IPV4_MIN_HEADER_BYTES {
                return None;
            }
            header_len
        }
        6 => {
            let next_header: u8 = ctx.load(IPV6_NEXT_HEADER_OFFSET).ok()?;
            if next_header != PROTO_TCP {
                return None;
            }
            IPV6_HEADER_BYTES
        }
        _ => return None,
    };
    let port: u16 = ctx.load(l4_offset + TCP_DST_PORT_OFFSET).ok()?;
    Some(u16::from_be(port))
}

fn process_matches() -> bool {
    let Some(wanted) = PROCESS_NAME_MAP.get(CONFIG_SLOT) else {
        return false;
    };
    let Ok(comm) = bpf_get_current_comm() else {
        return false;
    };
    let mut i = 0;
    while i < PROCESS_NAME_LEN {
        if comm[i] != wanted.bytes[i] {
            return false;
        }
        if comm[i] == 0 {
            break;
        }
        i += 1;
    }
    true
}

fn record_drop() {
    if let Some(ptr) = DROP_COUNTER.get_ptr_mut(CONFIG_SLOT) {
        // Incremented concurrently from every CPU.
        let counter = unsafe { AtomicU64::from_ptr(ptr) };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
