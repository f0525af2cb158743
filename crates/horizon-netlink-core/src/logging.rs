//! Logging facilities for Horizon Netlink.
//!
//! Horizon Netlink uses the `tracing` crate for instrumentation. To see logs,
//! install a tracing subscriber in your application:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! Library code never installs a subscriber.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem, e.g.
/// `RUST_LOG=horizon_netlink_core::poll=trace`.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "horizon_netlink_core";
    /// Event loop iteration target.
    pub const EVENT_LOOP: &str = "horizon_netlink_core::event_loop";
    /// Timer system target.
    pub const TIMER: &str = "horizon_netlink_core::timer";
    /// Readiness watcher target.
    pub const POLL: &str = "horizon_netlink_core::poll";
    /// Cross-thread task queue target.
    pub const TASK: &str = "horizon_netlink_core::task";
}
