//! SSH bastion: a single-hop jump host gated by short-lived certificates.
//!
//! The certificate authority signs user certificates against live grants,
//! the grant store persists time-limited access assertions, the session
//! logger records per-session audit events, and the server speaks SSH with
//! `direct-tcpip` as its only channel type.

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub mod ca;
pub mod grants;
pub mod logger;
pub mod server;

mod fsutil;

pub use ca::CertificateAuthority;
pub use grants::GrantStore;
pub use logger::{SessionLogStore, SessionLogger, DEFAULT_SESSION_LOG_LIMIT};
pub use server::{BastionConfig, BastionServer};

/// Injectable time source so expiry behavior is testable.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
