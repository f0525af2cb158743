//! Print rtnetlink link and address notifications.
//!
//! Run with: cargo run -p horizon-netlink --example monitor
//!
//! Set `RUST_LOG=horizon_netlink=trace` to see the socket's own logging.

use horizon_netlink::{EventLoop, NetlinkSocket, Protocol, SocketConfig};
use tracing_subscriber::EnvFilter;

/// RTMGRP_LINK, RTMGRP_IPV4_IFADDR and RTMGRP_IPV6_IFADDR.
const GROUPS: u32 = 0x1 | 0x10 | 0x100;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let config = SocketConfig::new(Protocol::ROUTE).bind_auto(GROUPS);
    let socket = NetlinkSocket::with_handlers(
        &event_loop.handle(),
        config,
        |payload, info| {
            // nlmsg_type sits right after the 32-bit length.
            let kind = payload
                .get(4..6)
                .map(|raw| u16::from_ne_bytes([raw[0], raw[1]]));
            println!("{} bytes from {}, type {:?}", payload.len(), info.source, kind);
        },
        |err| eprintln!("socket error: {err}"),
    )
    .expect("Failed to create netlink socket");

    println!("listening on {}", socket.address().expect("Failed to read address"));
    event_loop.run().expect("Event loop error");
}
