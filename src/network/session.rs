//! Session Lifecycle
//!
//! The authoritative state machine for one two-player race: connection
//! acceptance and lane assignment, readiness gating, the running race, and
//! terminal teardown. A session and its lane slots are owned exclusively by
//! the host's authoritative task; every mutation here is invoked from that
//! single context.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::game::events::RaceEvent;
use crate::game::race::{Lane, RaceConfig, RaceSim};
use crate::network::allocator::{ParticipantId, SessionId};
use crate::network::protocol::HostFrame;
use crate::{MAX_PARTICIPANTS, TICK_RATE};

/// Transport-level connection identity, assigned at accept time.
///
/// Opaque and unrelated to the lane index; a rejected connection has one of
/// these but never gets a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Backend accepted the creation request; host not yet reachable.
    Allocating,
    /// Accepting connections until both lanes are filled.
    WaitingForPlayers,
    /// Both players ready; countdown broadcast to clients.
    Countdown,
    /// Race in progress.
    Running,
    /// Terminal. A session is never revived.
    Ended,
}

/// Configuration for a race session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an empty session may wait for its first player before the
    /// host reclaims it.
    pub idle_timeout: Duration,
    /// Authoritative loop rate (Hz).
    pub tick_rate: u32,
    /// Race tunables.
    pub race: RaceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            tick_rate: TICK_RATE,
            race: RaceConfig::default(),
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Both lanes are occupied.
    #[error("session is full")]
    CapacityExceeded,

    /// The session is not in a state that admits connections.
    #[error("session is not accepting connections")]
    NotAccepting,

    /// A transition was requested from the wrong state.
    #[error("invalid session state")]
    InvalidState,
}

/// One occupied lane: the participant behind it, its readiness, and the
/// outbound channel to its connection's writer task.
#[derive(Debug)]
pub struct ParticipantSlot {
    /// Lane this slot drives; immutable once assigned.
    pub lane: Lane,
    /// Transport connection occupying the slot.
    pub conn: ConnId,
    /// Allocation-scoped identity the join token was reserved for.
    pub participant: ParticipantId,
    /// Whether this player has signaled `SceneReady`.
    pub ready: bool,
    outbound: mpsc::Sender<HostFrame>,
}

/// A race session and everything it owns.
pub struct RaceSession {
    id: SessionId,
    pool_id: String,
    status: SessionStatus,
    slots: [Option<ParticipantSlot>; MAX_PARTICIPANTS],
    sim: RaceSim,
    config: SessionConfig,
    #[allow(dead_code)]
    created_at: Instant,
}

impl RaceSession {
    /// Create a session in `Allocating`, bound to its pool.
    pub fn new(id: SessionId, pool_id: String, config: SessionConfig) -> Self {
        let sim = RaceSim::new(config.race);
        Self {
            id,
            pool_id,
            status: SessionStatus::Allocating,
            slots: [None, None],
            sim,
            config,
            created_at: Instant::now(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Pool this session was allocated from.
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The authoritative simulation.
    pub fn sim(&self) -> &RaceSim {
        &self.sim
    }

    /// Number of occupied lanes.
    pub fn participant_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether a further connection could be admitted right now.
    pub fn can_accept(&self) -> bool {
        self.status == SessionStatus::WaitingForPlayers
            && self.participant_count() < MAX_PARTICIPANTS
    }

    /// The host is reachable; start admitting players.
    pub fn begin_waiting(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Allocating {
            return Err(SessionError::InvalidState);
        }
        self.status = SessionStatus::WaitingForPlayers;
        Ok(())
    }

    /// Admit a connection and assign it the next unused lane,
    /// first-accepted-first-assigned.
    pub fn accept_peer(
        &mut self,
        conn: ConnId,
        participant: ParticipantId,
        outbound: mpsc::Sender<HostFrame>,
    ) -> Result<Lane, SessionError> {
        if self.status != SessionStatus::WaitingForPlayers {
            return Err(SessionError::NotAccepting);
        }
        let index = self.participant_count();
        if index >= MAX_PARTICIPANTS {
            return Err(SessionError::CapacityExceeded);
        }

        // participant_count == occupied prefix length: lanes fill in order
        // and never free up short of full teardown.
        let lane = Lane::new(index as u8).ok_or(SessionError::CapacityExceeded)?;
        self.slots[lane.index()] = Some(ParticipantSlot {
            lane,
            conn,
            participant,
            ready: false,
            outbound,
        });

        info!(
            "session {}: {} assigned lane {}",
            hex::encode(&self.id[..4]),
            conn,
            lane
        );
        Ok(lane)
    }

    /// Lane occupied by `conn`, if it was accepted.
    pub fn lane_of(&self, conn: ConnId) -> Option<Lane> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.conn == conn)
            .map(|slot| slot.lane)
    }

    /// Record a `SceneReady` from `conn`. Returns whether both players are
    /// now ready; `None` when the connection holds no lane.
    pub fn mark_ready(&mut self, conn: ConnId) -> Option<bool> {
        let slot = self
            .slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.conn == conn)?;
        slot.ready = true;
        debug!("lane {} ready", slot.lane);
        Some(self.both_ready())
    }

    /// Both lanes occupied and both players ready, in any arrival order.
    pub fn both_ready(&self) -> bool {
        self.participant_count() == MAX_PARTICIPANTS
            && self.slots.iter().flatten().all(|slot| slot.ready)
    }

    /// Both players are ready; stop waiting and start the race sequence.
    pub fn start_countdown(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::WaitingForPlayers || !self.both_ready() {
            return Err(SessionError::InvalidState);
        }
        self.status = SessionStatus::Countdown;
        Ok(())
    }

    /// The countdown broadcast is queued; the race is authoritative now.
    /// The client-side countdown is presentation only and not awaited.
    pub fn begin_running(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Countdown {
            return Err(SessionError::InvalidState);
        }
        self.status = SessionStatus::Running;
        info!("session {}: running", hex::encode(&self.id[..4]));
        Ok(())
    }

    /// Advance the simulation clock by `dt` seconds. No-op unless running.
    pub fn advance(&mut self, dt: f32) {
        if self.status == SessionStatus::Running {
            self.sim.advance(dt);
        }
    }

    /// Process one hop request from `conn`. Returns the events to
    /// broadcast; empty when the session is not running or the connection
    /// holds no lane.
    pub fn process_hop(&mut self, conn: ConnId) -> Vec<RaceEvent> {
        if self.status != SessionStatus::Running {
            return Vec::new();
        }
        match self.lane_of(conn) {
            Some(lane) => self.sim.process_hop(lane),
            None => Vec::new(),
        }
    }

    /// Terminate the session: clear all per-participant simulation state
    /// and drop every outbound channel so writers flush and close.
    ///
    /// Single-fire: returns `false` when the session had already ended, so
    /// a timeout firing and a disconnect arriving in the same drain cannot
    /// both tear down.
    pub fn terminate(&mut self) -> bool {
        if self.status == SessionStatus::Ended {
            return false;
        }
        info!("session {}: ended", hex::encode(&self.id[..4]));
        self.status = SessionStatus::Ended;
        self.sim.reset();
        self.slots = [None, None];
        true
    }

    /// Send a frame to a single lane.
    pub async fn send_to(&self, lane: Lane, frame: HostFrame) {
        if let Some(slot) = &self.slots[lane.index()] {
            let _ = slot.outbound.send(frame).await;
        }
    }

    /// Send a frame to every connected lane, in lane order.
    pub async fn broadcast(&self, frame: HostFrame) {
        for slot in self.slots.iter().flatten() {
            let _ = slot.outbound.send(frame).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RaceSession {
        let mut session = RaceSession::new([0; 16], "fleet-A".to_string(), SessionConfig::default());
        session.begin_waiting().unwrap();
        session
    }

    fn outbound() -> (mpsc::Sender<HostFrame>, mpsc::Receiver<HostFrame>) {
        mpsc::channel(16)
    }

    fn join(session: &mut RaceSession, conn: u64) -> Lane {
        let (tx, _rx) = outbound();
        session
            .accept_peer(ConnId(conn), ParticipantId::generate(), tx)
            .unwrap()
    }

    #[test]
    fn test_lanes_assigned_in_acceptance_order() {
        let mut session = session();
        assert_eq!(join(&mut session, 10), Lane::FIRST);
        assert_eq!(join(&mut session, 20), Lane::SECOND);

        assert_eq!(session.lane_of(ConnId(10)), Some(Lane::FIRST));
        assert_eq!(session.lane_of(ConnId(20)), Some(Lane::SECOND));
        assert_eq!(session.lane_of(ConnId(30)), None);
    }

    #[test]
    fn test_third_connection_rejected() {
        let mut session = session();
        join(&mut session, 1);
        join(&mut session, 2);

        assert!(!session.can_accept());
        let (tx, _rx) = outbound();
        let err = session
            .accept_peer(ConnId(3), ParticipantId::generate(), tx)
            .unwrap_err();
        assert_eq!(err, SessionError::CapacityExceeded);
    }

    #[test]
    fn test_not_accepting_before_waiting_or_after_end() {
        let mut session =
            RaceSession::new([0; 16], "fleet-A".to_string(), SessionConfig::default());
        let (tx, _rx) = outbound();
        assert_eq!(
            session
                .accept_peer(ConnId(1), ParticipantId::generate(), tx)
                .unwrap_err(),
            SessionError::NotAccepting
        );

        session.begin_waiting().unwrap();
        session.terminate();
        let (tx, _rx) = outbound();
        assert_eq!(
            session
                .accept_peer(ConnId(1), ParticipantId::generate(), tx)
                .unwrap_err(),
            SessionError::NotAccepting
        );
    }

    #[test]
    fn test_readiness_is_order_independent() {
        // First-accepted readies last.
        let mut session1 = session();
        join(&mut session1, 1);
        join(&mut session1, 2);
        assert_eq!(session1.mark_ready(ConnId(2)), Some(false));
        assert_eq!(session1.mark_ready(ConnId(1)), Some(true));
        assert!(session1.both_ready());

        // First-accepted readies first.
        let mut session2 = session();
        join(&mut session2, 1);
        join(&mut session2, 2);
        assert_eq!(session2.mark_ready(ConnId(1)), Some(false));
        assert_eq!(session2.mark_ready(ConnId(2)), Some(true));
        assert!(session2.both_ready());
    }

    #[test]
    fn test_one_ready_player_does_not_start() {
        let mut session = session();
        join(&mut session, 1);
        // A lone player readying repeatedly never reports both-ready.
        assert_eq!(session.mark_ready(ConnId(1)), Some(false));
        assert_eq!(session.mark_ready(ConnId(1)), Some(false));
        assert!(session.start_countdown().is_err());
    }

    #[test]
    fn test_ready_from_unknown_connection_ignored() {
        let mut session = session();
        join(&mut session, 1);
        assert_eq!(session.mark_ready(ConnId(99)), None);
    }

    #[test]
    fn test_countdown_then_running_transitions() {
        let mut session = session();
        join(&mut session, 1);
        join(&mut session, 2);
        session.mark_ready(ConnId(1));
        session.mark_ready(ConnId(2));

        assert!(session.begin_running().is_err());
        session.start_countdown().unwrap();
        assert_eq!(session.status(), SessionStatus::Countdown);
        session.begin_running().unwrap();
        assert_eq!(session.status(), SessionStatus::Running);
    }

    #[test]
    fn test_hops_ignored_until_running() {
        let mut session = session();
        join(&mut session, 1);
        join(&mut session, 2);

        assert!(session.process_hop(ConnId(1)).is_empty());

        session.mark_ready(ConnId(1));
        session.mark_ready(ConnId(2));
        session.start_countdown().unwrap();
        session.begin_running().unwrap();

        let events = session.process_hop(ConnId(1));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            RaceEvent::PlayerMoved {
                lane: Lane::FIRST,
                ..
            }
        ));
    }

    #[test]
    fn test_terminate_fires_exactly_once() {
        let mut session = session();
        join(&mut session, 1);

        assert!(session.terminate());
        assert_eq!(session.status(), SessionStatus::Ended);
        // The disconnect/timeout loser of the race observes a no-op.
        assert!(!session.terminate());
    }

    #[test]
    fn test_terminate_clears_participant_state() {
        let mut session = session();
        join(&mut session, 1);
        join(&mut session, 2);
        session.mark_ready(ConnId(1));
        session.mark_ready(ConnId(2));
        session.start_countdown().unwrap();
        session.begin_running().unwrap();
        session.process_hop(ConnId(1));

        session.terminate();
        assert_eq!(session.participant_count(), 0);
        assert_eq!(session.sim().lane(Lane::FIRST).position, 0.0);
        assert!(session.process_hop(ConnId(1)).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_both_lanes_in_order() {
        let mut session = session();
        let (tx1, mut rx1) = outbound();
        let (tx2, mut rx2) = outbound();
        session
            .accept_peer(ConnId(1), ParticipantId::generate(), tx1)
            .unwrap();
        session
            .accept_peer(ConnId(2), ParticipantId::generate(), tx2)
            .unwrap();

        session
            .broadcast(HostFrame::StartCountdown { hop_time: 4.0 })
            .await;
        session
            .broadcast(HostFrame::PlayerMoved {
                lane: Lane::FIRST,
                position: 0.2,
            })
            .await;

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(
                rx.recv().await.unwrap(),
                HostFrame::StartCountdown { hop_time: 4.0 }
            );
            assert!(matches!(
                rx.recv().await.unwrap(),
                HostFrame::PlayerMoved { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_send_to_targets_single_lane() {
        let mut session = session();
        let (tx1, mut rx1) = outbound();
        let (tx2, mut rx2) = outbound();
        session
            .accept_peer(ConnId(1), ParticipantId::generate(), tx1)
            .unwrap();
        session
            .accept_peer(ConnId(2), ParticipantId::generate(), tx2)
            .unwrap();

        session
            .send_to(Lane::SECOND, HostFrame::LogicalPlayerAssigned { lane: Lane::SECOND })
            .await;

        assert_eq!(
            rx2.recv().await.unwrap(),
            HostFrame::LogicalPlayerAssigned { lane: Lane::SECOND }
        );
        assert!(rx1.try_recv().is_err());
    }
}
