//! Tenant fleets: registry, isolation policy, and configuration loading.
//!
//! The registry is three indices over one logical set of agents (by tenant,
//! by agent id, by IP), kept consistent by wrapping every mutation in a
//! single critical section. Reads return copies, never references into the
//! registry's own state.

pub mod loader;
pub mod registry;

pub use loader::{FleetConfig, TokenConfig};
pub use registry::{AgentIdentity, FleetRegistry};
