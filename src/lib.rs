//! # Hopdash Session Server
//!
//! Authoritative backend for a real-time two-player hop race. A fleet
//! allocator places each connecting client into a session; the session host
//! runs the lock-step cooldown simulation and relays state to both clients
//! over an opcode-tagged message channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HOPDASH SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  dispatch.rs     - Ordered cross-thread event queue          │
//! │                                                              │
//! │  game/           - Race simulation (authoritative)           │
//! │  ├── race.rs     - Per-lane cooldown/position model          │
//! │  └── events.rs   - Simulation events                         │
//! │                                                              │
//! │  network/        - Allocation and transport                  │
//! │  ├── allocator.rs- Find-or-create session, slot reservation  │
//! │  ├── protocol.rs - Opcode table and text wire format         │
//! │  ├── session.rs  - Session state machine and lane slots      │
//! │  ├── server.rs   - WebSocket host and authoritative loop     │
//! │  └── client.rs   - Headless race client                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! All session and lane state is owned by a single authoritative task per
//! session. Network receipt happens on I/O tasks which enqueue events into a
//! [`dispatch::DispatchQueue`]; the authoritative loop drains the queue once
//! per tick, so handlers never race the simulation. The same discipline
//! applies on the client, where the consuming context is the per-frame
//! update step.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod dispatch;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use dispatch::DispatchQueue;
pub use game::events::RaceEvent;
pub use game::race::{Lane, RaceConfig, RaceSim, FINISH_LINE};
pub use network::allocator::{allocate, AllocationError, ConnectionDescriptor, LocalFleet};
pub use network::client::{ClientNotice, RaceClient};
pub use network::protocol::{ClientFrame, HostFrame, Opcode, ProtocolError};
pub use network::server::{EndReason, HostConfig, SessionHost};
pub use network::session::{RaceSession, SessionConfig, SessionStatus};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Authoritative simulation tick rate (Hz)
pub const TICK_RATE: u32 = 10;

/// Participant slots per session (the protocol is two-player only)
pub const MAX_PARTICIPANTS: usize = 2;
