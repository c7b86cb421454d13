//! The shield's dual proxy: outbound filtering and inbound isolation.
//!
//! The forward proxy admits registered agents, evaluates each request
//! against the rule engine and mode manager, tunnels CONNECT, and records
//! every decision. The reverse proxy terminates external requests, enforces
//! tenant scoping, and masks caller identity before forwarding to agent
//! webhooks.

pub mod forward;
pub mod inspect;
pub mod reverse;
pub mod traffic;

pub use forward::ForwardProxy;
pub use inspect::{Inspector, RequestVerdict};
pub use reverse::{ReverseProxy, DEFAULT_WEBHOOK_PORT};
pub use traffic::TrafficLog;
