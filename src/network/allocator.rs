//! Session Allocation
//!
//! Places a player into a session: search the pool for a session with an
//! open slot, create one when none exists, then reserve a participant slot
//! and hand back the connection parameters. The compute backend that
//! actually hosts sessions is abstract; [`LocalFleet`] is the in-process
//! implementation used by tests and the demo binary.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Per-allocation participant identity, distinct from the lane index the
/// gateway later assigns.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ParticipantId(pub [u8; 16]);

impl ParticipantId {
    /// Mint a fresh random identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// A session known to the allocator backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRef {
    /// Session identifier.
    pub session_id: SessionId,
    /// Host endpoint serving the session.
    pub addr: SocketAddr,
    /// When the backend created the session.
    pub created_at: DateTime<Utc>,
    /// Participant slots still unreserved.
    pub open_slots: u32,
}

/// Connection parameters for one reserved participant slot.
///
/// Immutable once issued; the join token is consumed exactly once by the
/// session's connection gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Session host address.
    pub host: String,
    /// Session host port.
    pub port: u16,
    /// Session the slot belongs to.
    pub session_id: SessionId,
    /// Identity the slot was reserved for.
    pub participant_id: ParticipantId,
    /// One-time join token presented during the transport handshake.
    pub token: String,
    /// When the reservation was issued.
    pub created_at: DateTime<Utc>,
}

impl ConnectionDescriptor {
    /// Serialize to JSON, the shape the client service hands back.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a client service JSON response.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Failure of a single backend call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The backend could not serve the request (transport failure, no
    /// capacity left in the pool).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend understood the request and refused it.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Allocation failure, tagged with the remote call that failed.
///
/// The sequence is abandoned on first failure; retry policy, if any, is the
/// caller's concern. There is no local state to roll back.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The pool search failed.
    #[error("session search failed: {0}")]
    Search(#[source] BackendError),

    /// Creating a fresh session failed.
    #[error("session create failed: {0}")]
    Create(#[source] BackendError),

    /// Reserving the participant slot failed.
    #[error("slot reservation failed: {0}")]
    Reserve(#[source] BackendError),
}

// =============================================================================
// BACKEND SEAM
// =============================================================================

/// The abstract session-hosting backend.
///
/// Each operation is an independent remote call and may fail on its own.
pub trait AllocatorBackend {
    /// Sessions in `pool_id` with at least one open participant slot,
    /// earliest-created first.
    fn search(
        &self,
        pool_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<SessionRef>, BackendError>> + Send;

    /// Provision a new session bound to `pool_id`.
    fn create(
        &self,
        pool_id: &str,
        capacity: u32,
    ) -> impl std::future::Future<Output = Result<SessionRef, BackendError>> + Send;

    /// Reserve a slot in `session` for `participant`.
    fn reserve(
        &self,
        session: &SessionRef,
        participant: ParticipantId,
    ) -> impl std::future::Future<Output = Result<ConnectionDescriptor, BackendError>> + Send;
}

/// Find or create a session in `pool_id`, then reserve a slot in it for a
/// freshly generated participant identity.
///
/// Joins the earliest-created session that has an open slot; only an empty
/// search result triggers creation, so concurrent demand against a pool
/// converges on the existing session instead of fanning out new ones.
pub async fn allocate<B: AllocatorBackend>(
    backend: &B,
    pool_id: &str,
) -> Result<ConnectionDescriptor, AllocationError> {
    let sessions = backend
        .search(pool_id)
        .await
        .map_err(AllocationError::Search)?;

    let session = match sessions.into_iter().next() {
        Some(session) => {
            debug!(
                "joining session {} with {} open slot(s)",
                hex::encode(&session.session_id[..4]),
                session.open_slots
            );
            session
        }
        None => {
            debug!("no open session in pool {pool_id}, creating one");
            backend
                .create(pool_id, crate::MAX_PARTICIPANTS as u32)
                .await
                .map_err(AllocationError::Create)?
        }
    };

    backend
        .reserve(&session, ParticipantId::generate())
        .await
        .map_err(AllocationError::Reserve)
}

// =============================================================================
// RESERVATION LEDGER
// =============================================================================

/// The gateway's view of issued reservations.
///
/// `consume` redeems a join token at most once; a second presentation of
/// the same token returns `None`.
pub trait ReservationLedger: Send + Sync {
    /// Redeem `token`, returning the participant it was reserved for.
    fn consume(&self, token: &str) -> Option<ParticipantId>;
}

struct Reservation {
    token: String,
    participant: ParticipantId,
    consumed: bool,
}

/// Ledger backed by explicit reservations, shared between a [`LocalFleet`]
/// and the host it points players at.
#[derive(Default)]
pub struct SlotLedger {
    reservations: Mutex<Vec<Reservation>>,
}

impl SlotLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly issued reservation.
    pub fn register(&self, token: String, participant: ParticipantId) {
        self.lock().push(Reservation {
            token,
            participant,
            consumed: false,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Reservation>> {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReservationLedger for SlotLedger {
    fn consume(&self, token: &str) -> Option<ParticipantId> {
        let mut reservations = self.lock();
        let entry = reservations
            .iter_mut()
            .find(|r| r.token == token && !r.consumed)?;
        entry.consumed = true;
        Some(entry.participant)
    }
}

/// Ledger that admits any non-empty token, minting an identity on the spot.
///
/// Matches the local-server flow where clients connect with a self-picked
/// token and no backend reservation exists.
#[derive(Debug, Default)]
pub struct OpenLedger;

impl OpenLedger {
    /// Create the accept-all ledger.
    pub fn new() -> Self {
        Self
    }
}

impl ReservationLedger for OpenLedger {
    fn consume(&self, token: &str) -> Option<ParticipantId> {
        (!token.is_empty()).then(ParticipantId::generate)
    }
}

// =============================================================================
// IN-MEMORY FLEET
// =============================================================================

/// A registered, currently idle host endpoint.
pub struct HostEndpoint {
    /// Address the host listens on.
    pub addr: SocketAddr,
    /// Ledger the host validates join tokens against.
    pub ledger: Arc<SlotLedger>,
}

struct FleetSession {
    id: SessionId,
    addr: SocketAddr,
    ledger: Arc<SlotLedger>,
    capacity: u32,
    reserved: u32,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<HostEndpoint>,
    sessions: Vec<FleetSession>,
}

/// In-process allocator backend: named pools of registered host endpoints.
///
/// `create` assigns an idle endpoint to a new session; `reserve` issues a
/// token into that host's ledger, which the host's gateway later consumes.
#[derive(Default)]
pub struct LocalFleet {
    pools: Mutex<BTreeMap<String, PoolState>>,
}

impl LocalFleet {
    /// Create an empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an idle host endpoint under `pool_id`.
    pub fn add_host(&self, pool_id: &str, addr: SocketAddr, ledger: Arc<SlotLedger>) {
        self.lock()
            .entry(pool_id.to_string())
            .or_default()
            .idle
            .push(HostEndpoint { addr, ledger });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PoolState>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AllocatorBackend for LocalFleet {
    async fn search(&self, pool_id: &str) -> Result<Vec<SessionRef>, BackendError> {
        let pools = self.lock();
        let Some(pool) = pools.get(pool_id) else {
            return Ok(Vec::new());
        };
        // Sessions are stored in creation order, which is the tie-break.
        Ok(pool
            .sessions
            .iter()
            .filter(|s| s.reserved < s.capacity)
            .map(|s| SessionRef {
                session_id: s.id,
                addr: s.addr,
                created_at: s.created_at,
                open_slots: s.capacity - s.reserved,
            })
            .collect())
    }

    async fn create(&self, pool_id: &str, capacity: u32) -> Result<SessionRef, BackendError> {
        let mut pools = self.lock();
        let pool = pools
            .get_mut(pool_id)
            .ok_or_else(|| BackendError::Unavailable(format!("unknown pool {pool_id}")))?;
        if pool.idle.is_empty() {
            return Err(BackendError::Unavailable(format!(
                "no idle host capacity in pool {pool_id}"
            )));
        }
        let endpoint = pool.idle.remove(0);

        let session = FleetSession {
            id: uuid::Uuid::new_v4().into_bytes(),
            addr: endpoint.addr,
            ledger: endpoint.ledger,
            capacity,
            reserved: 0,
            created_at: Utc::now(),
        };
        let sref = SessionRef {
            session_id: session.id,
            addr: session.addr,
            created_at: session.created_at,
            open_slots: capacity,
        };
        pool.sessions.push(session);
        Ok(sref)
    }

    async fn reserve(
        &self,
        session: &SessionRef,
        participant: ParticipantId,
    ) -> Result<ConnectionDescriptor, BackendError> {
        let mut pools = self.lock();
        let found = pools
            .values_mut()
            .flat_map(|p| p.sessions.iter_mut())
            .find(|s| s.id == session.session_id)
            .ok_or_else(|| BackendError::Rejected("unknown session".to_string()))?;

        if found.reserved >= found.capacity {
            return Err(BackendError::Rejected("no open participant slot".to_string()));
        }

        let token = uuid::Uuid::new_v4().to_string();
        found.ledger.register(token.clone(), participant);
        found.reserved += 1;

        Ok(ConnectionDescriptor {
            host: found.addr.ip().to_string(),
            port: found.addr.port(),
            session_id: found.id,
            participant_id: participant,
            token,
            created_at: Utc::now(),
        })
    }
}
