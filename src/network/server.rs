//! WebSocket Session Host
//!
//! Hosts one race session: accepts connections, marshals network events
//! into the authoritative loop through the dispatch queue, steps the
//! simulation at a fixed rate, and broadcasts resulting frames.
//!
//! I/O tasks never touch session state. Readers enqueue
//! [`SessionEvent`]s; the authoritative loop drains them once per tick and
//! is the only context that mutates the session or its lane slots.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::dispatch::DispatchQueue;
use crate::game::events::RaceEvent;
use crate::game::race::Lane;
use crate::network::allocator::ReservationLedger;
use crate::network::protocol::{ClientFrame, HostFrame};
use crate::network::session::{
    ConnId, RaceSession, SessionConfig, SessionError, SessionStatus,
};

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Pool the hosted session belongs to.
    pub pool_id: String,
    /// Session and race parameters.
    pub session: SessionConfig,
    /// Server version string.
    pub version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".parse().unwrap(),
            pool_id: "local".to_string(),
            session: SessionConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl HostConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var("HOPDASH_BIND") {
            if let Ok(addr) = bind.parse() {
                config.bind_addr = addr;
            }
        }
        if let Ok(pool) = std::env::var("HOPDASH_POOL") {
            config.pool_id = pool;
        }
        if let Ok(secs) = std::env::var("HOPDASH_IDLE_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.session.idle_timeout = Duration::from_secs(secs);
            }
        }
        config
    }
}

/// Host errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Failed to bind the listener.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Session state machine refused a transition.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Why a hosted session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A lane crossed the finish line.
    Winner {
        /// The winning lane.
        lane: Lane,
    },
    /// Nobody connected within the idle window. A designed reclamation
    /// path, not an error.
    IdleTimeout,
    /// An accepted participant disconnected; the protocol cannot
    /// resynchronize a rejoining peer, so the session is unsalvageable.
    PeerDisconnected,
}

/// A network event deferred into the authoritative loop.
///
/// Produced by connection reader tasks, drained once per tick in arrival
/// order.
#[derive(Debug)]
pub enum SessionEvent {
    /// A connection completed the transport handshake with a join token.
    PeerJoined {
        /// Transport connection identity.
        conn: ConnId,
        /// Join token presented by the peer.
        token: String,
        /// Channel to the connection's writer task. Dropping it closes
        /// the connection.
        outbound: mpsc::Sender<HostFrame>,
    },
    /// A decoded protocol frame arrived.
    FrameReceived {
        /// Transport connection identity.
        conn: ConnId,
        /// The decoded frame.
        frame: ClientFrame,
    },
    /// The connection closed or errored.
    PeerClosed {
        /// Transport connection identity.
        conn: ConnId,
    },
}

/// A session host, ready to bind.
pub struct SessionHost {
    config: HostConfig,
    ledger: Arc<dyn ReservationLedger>,
}

impl SessionHost {
    /// Create a host that validates join tokens against `ledger`.
    pub fn new(config: HostConfig, ledger: Arc<dyn ReservationLedger>) -> Self {
        Self { config, ledger }
    }

    /// Bind the listener. The session counts as created once this returns,
    /// which is when its idle clock starts.
    pub async fn bind(self) -> Result<BoundHost, HostError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("session host listening on {}", local_addr);
        Ok(BoundHost {
            listener,
            local_addr,
            config: self.config,
            ledger: self.ledger,
        })
    }
}

/// A bound host, ready to run one session to completion.
pub struct BoundHost {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: HostConfig,
    ledger: Arc<dyn ReservationLedger>,
}

impl BoundHost {
    /// Address the host actually listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the session until it ends, then release all resources.
    #[instrument(skip(self), fields(pool = %self.config.pool_id))]
    pub async fn run(self) -> Result<EndReason, HostError> {
        let session_id = uuid::Uuid::new_v4().into_bytes();
        let mut session = RaceSession::new(
            session_id,
            self.config.pool_id.clone(),
            self.config.session.clone(),
        );

        let queue = Arc::new(DispatchQueue::new());
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let accept_handle = tokio::spawn(accept_loop(
            self.listener,
            queue.clone(),
            shutdown_tx.subscribe(),
        ));

        session.begin_waiting()?;
        info!(
            "session {}: waiting for players",
            hex::encode(&session_id[..4])
        );

        let reason = authoritative_loop(&mut session, queue.as_ref(), self.ledger.as_ref()).await;

        let _ = shutdown_tx.send(());
        accept_handle.abort();
        Ok(reason)
    }
}

/// Accept inbound connections and hand each to its own reader task.
async fn accept_loop(
    listener: TcpListener,
    queue: Arc<DispatchQueue<SessionEvent>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut next_conn = 0u64;
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let conn = ConnId(next_conn);
                        next_conn += 1;
                        debug!("{}: tcp connection from {}", conn, addr);
                        tokio::spawn(connection_task(stream, conn, queue.clone()));
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

/// Drive one connection: writer task for outbound frames, reader loop
/// translating inbound traffic into dispatch entries.
async fn connection_task(
    stream: TcpStream,
    conn: ConnId,
    queue: Arc<DispatchQueue<SessionEvent>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("{}: websocket handshake failed: {}", conn, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<HostFrame>(64);

    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if ws_sender.send(Message::Text(frame.encode())).await.is_err() {
                break;
            }
        }
        // Channel closed: the session dropped this peer, either at
        // rejection or at teardown. Close after flushing what was queued.
        let _ = ws_sender.close().await;
    });

    // The first text frame is the transport handshake carrying the join
    // token; everything after it is protocol traffic.
    let mut handshake = Some(frame_tx);
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(outbound) = handshake.take() {
                    queue.push(SessionEvent::PeerJoined {
                        conn,
                        token: text,
                        outbound,
                    });
                    continue;
                }
                decode_and_queue(conn, text.as_bytes(), &queue);
            }
            Ok(Message::Binary(data)) => {
                if handshake.is_some() {
                    warn!("{}: binary frame before handshake, dropping", conn);
                    continue;
                }
                decode_and_queue(conn, &data, &queue);
            }
            Ok(Message::Close(_)) => {
                debug!("{}: closed by peer", conn);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("{}: websocket error: {}", conn, e);
                break;
            }
        }
    }

    queue.push(SessionEvent::PeerClosed { conn });
}

/// Decode a protocol frame; malformed input is logged and dropped without
/// reaching the session.
fn decode_and_queue(conn: ConnId, bytes: &[u8], queue: &Arc<DispatchQueue<SessionEvent>>) {
    match ClientFrame::decode(bytes) {
        Ok(frame) => queue.push(SessionEvent::FrameReceived { conn, frame }),
        Err(e) => warn!("{}: dropping malformed frame: {}", conn, e),
    }
}

/// The single authoritative context.
///
/// Drains the dispatch queue once per tick, steps the simulation while
/// running, and owns the idle timer. Because timer expiry and event
/// handling are arms of the same `select!`, a timeout firing and a
/// disconnect-triggered teardown can never interleave.
async fn authoritative_loop(
    session: &mut RaceSession,
    queue: &DispatchQueue<SessionEvent>,
    ledger: &dyn ReservationLedger,
) -> EndReason {
    let tick_rate = session.config().tick_rate.max(1);
    let dt = 1.0 / tick_rate as f32;
    let mut ticker = interval(Duration::from_micros(1_000_000 / u64::from(tick_rate)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let idle = sleep(session.config().idle_timeout);
    tokio::pin!(idle);
    let mut idle_armed = true;

    loop {
        tokio::select! {
            _ = &mut idle, if idle_armed => {
                info!(
                    "session {}: idle timeout, reclaiming",
                    hex::encode(&session.id()[..4])
                );
                session.terminate();
                return EndReason::IdleTimeout;
            }
            _ = ticker.tick() => {
                for event in queue.drain_all() {
                    if let Some(reason) =
                        handle_event(session, ledger, &mut idle_armed, event).await
                    {
                        // Later entries in this drain are discarded: no
                        // event is processed after termination begins.
                        session.terminate();
                        return reason;
                    }
                }
                session.advance(dt);
            }
        }
    }
}

/// Apply one dispatched event to the session. Returns the end reason when
/// the event is fatal to the session.
async fn handle_event(
    session: &mut RaceSession,
    ledger: &dyn ReservationLedger,
    idle_armed: &mut bool,
    event: SessionEvent,
) -> Option<EndReason> {
    match event {
        SessionEvent::PeerJoined {
            conn,
            token,
            outbound,
        } => {
            if !session.can_accept() {
                // Silent at the protocol level: dropping the channel
                // closes the transport without admitting the peer.
                debug!("{}: not admitted, session full or not accepting", conn);
                return None;
            }
            let Some(participant) = ledger.consume(&token) else {
                warn!("{}: unknown or already consumed join token", conn);
                return None;
            };
            match session.accept_peer(conn, participant, outbound) {
                Ok(lane) => {
                    // An occupied session may persist indefinitely while
                    // waiting for its second player.
                    *idle_armed = false;
                    session
                        .send_to(lane, HostFrame::LogicalPlayerAssigned { lane })
                        .await;
                }
                Err(e) => warn!("{}: accept failed: {}", conn, e),
            }
            None
        }

        SessionEvent::FrameReceived {
            conn,
            frame: ClientFrame::SceneReady,
        } => {
            if session.mark_ready(conn) == Some(true)
                && session.status() == SessionStatus::WaitingForPlayers
                && session.start_countdown().is_ok()
            {
                let hop_time = session.config().race.hop_time;
                session
                    .broadcast(HostFrame::StartCountdown { hop_time })
                    .await;
                // The countdown is client presentation; authority does not
                // wait for it.
                let _ = session.begin_running();
            }
            None
        }

        SessionEvent::FrameReceived {
            conn,
            frame: ClientFrame::HopRequested,
        } => {
            let mut reason = None;
            for event in session.process_hop(conn) {
                session.broadcast(frame_for(event)).await;
                if let RaceEvent::WinnerDetermined { winner, .. } = event {
                    reason = Some(EndReason::Winner { lane: winner });
                }
            }
            reason
        }

        SessionEvent::PeerClosed { conn } => {
            if session.lane_of(conn).is_some() {
                info!("{}: participant disconnected, terminating session", conn);
                Some(EndReason::PeerDisconnected)
            } else {
                debug!("{}: unadmitted connection closed", conn);
                None
            }
        }
    }
}

/// Translate a simulation event into its broadcast frame.
fn frame_for(event: RaceEvent) -> HostFrame {
    match event {
        RaceEvent::PlayerMoved { lane, position } => HostFrame::PlayerMoved { lane, position },
        RaceEvent::WinnerDetermined { winner, loser } => {
            HostFrame::WinnerDetermined { winner, loser }
        }
    }
}
