//! Network Layer
//!
//! Session allocation, the wire protocol, and the WebSocket host and
//! client. Everything here is I/O; simulation authority lives in `game/`
//! and is only reached through the host's dispatch queue.

pub mod allocator;
pub mod client;
pub mod protocol;
pub mod server;
pub mod session;

pub use allocator::{
    allocate, AllocationError, AllocatorBackend, BackendError, ConnectionDescriptor, LocalFleet,
    OpenLedger, ParticipantId, ReservationLedger, SessionId, SlotLedger,
};
pub use client::{ClientError, ClientNotice, RaceClient};
pub use protocol::{ClientFrame, HostFrame, Opcode, ProtocolError};
pub use server::{EndReason, HostConfig, HostError, SessionEvent, SessionHost};
pub use session::{ConnId, RaceSession, SessionConfig, SessionError, SessionStatus};
