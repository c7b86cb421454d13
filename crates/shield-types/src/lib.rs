//! Core types shared across all Plasma Shield crates.
//!
//! Defines the operating modes, fleet vocabulary (tenants, agents, tiers),
//! bastion grants and session events, traffic log records, and the error
//! type used by the rule engine, proxies, bastion, and management plane.

pub mod error;
pub mod fleet;
pub mod grant;
pub mod mode;
pub mod traffic;

pub use error::ShieldError;
pub use fleet::{Agent, FleetMode, Tenant, TIER_CAPTAIN, TIER_COMMODORE, TIER_CREW};
pub use grant::{Grant, SessionEvent, SessionEventKind};
pub use mode::Mode;
pub use traffic::{TrafficAction, TrafficEntry};
