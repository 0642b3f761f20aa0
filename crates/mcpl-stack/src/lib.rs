//! One stack = gateway + front proxy + optional tunnel.
//!
//! This crate owns everything between "instance described" and "instance
//! serving": port reservation, the in-process reverse proxy, tunnel
//! processes, and the supervisor that starts, watches, and tears down the
//! lot.

mod ports;
mod proxy;
mod supervisor;
mod tunnel;

pub use ports::reserve_port;
pub use proxy::FrontProxy;
pub use supervisor::{RunningStack, StackOptions, shutdown_stacks, start_stack, supervise_all};
pub use tunnel::{QUICK_TUNNEL_WAIT, Tunnel, TunnelController, extract_public_url};
