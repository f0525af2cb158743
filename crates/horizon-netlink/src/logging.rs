//! Logging targets for netlink sockets.
//!
//! Lifecycle events (create, bind, close) are logged at `debug`, individual
//! datagrams and requests at `trace`, and errors handed to an error handler
//! at `warn`.

/// Target names for log filtering, e.g. `RUST_LOG=horizon_netlink::recv=trace`.
pub mod targets {
    /// Socket lifecycle target.
    pub const SOCKET: &str = "horizon_netlink::socket";
    /// Send engine target.
    pub const SEND: &str = "horizon_netlink::send";
    /// Receive engine target.
    pub const RECV: &str = "horizon_netlink::recv";
}
