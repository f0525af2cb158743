//! Local port generation.
//!
//! Ports combine the low 22 bits of the process id with a 10-bit counter in
//! the high bits, so sockets of one process get distinct ports and rarely
//! collide with other processes. A collision is still possible (another
//! library may pick the same scheme), so binding retries on `EADDRINUSE`.

use std::sync::atomic::{AtomicU32, Ordering};

/// How many generated ports `bind_auto` tries before giving up.
pub const MAX_BIND_ATTEMPTS: usize = 100;

const PID_MASK: u32 = 0x3F_FFFF;
const COUNTER_MASK: u32 = 0x3FF;

/// The first 32 counter values are left to libnl.
static PORT_COUNTER: AtomicU32 = AtomicU32::new(32);

/// Generate a local port that is probably not in use.
pub fn generate_local_port() -> u32 {
    let offset = next_counter();
    compose_port(offset, std::process::id())
}

fn next_counter() -> u32 {
    let mut current = PORT_COUNTER.load(Ordering::Relaxed);
    loop {
        let next = (current + 1) & COUNTER_MASK;
        match PORT_COUNTER.compare_exchange_weak(
            current,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return current,
            Err(actual) => current = actual,
        }
    }
}

fn compose_port(counter: u32, pid: u32) -> u32 {
    ((counter & COUNTER_MASK) << 22) | (pid & PID_MASK)
}
