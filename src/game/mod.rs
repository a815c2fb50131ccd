//! Race Simulation
//!
//! The authoritative hop model. All mutation happens inside the session's
//! single authoritative context; nothing here touches the network.
//!
//! ## Module Structure
//!
//! - `race`: per-lane cooldown/position model and hop policy
//! - `events`: events emitted by the simulation for broadcast

pub mod events;
pub mod race;

// Re-export key types
pub use events::RaceEvent;
pub use race::{Lane, RaceConfig, RaceSim, FINISH_LINE};
