//! Headless Race Client
//!
//! Protocol plumbing for the client side of a session: connect with a
//! [`ConnectionDescriptor`], present the join token, send readiness and hop
//! commands, and receive host frames. Inbound frames arrive on the socket's
//! reader task and are marshaled through a [`DispatchQueue`]; the embedding
//! game drains them once per frame from its own update step, so network
//! delivery never races rendering state. Presentation itself lives outside
//! this crate.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::dispatch::DispatchQueue;
use crate::game::race::Lane;
use crate::network::allocator::ConnectionDescriptor;
use crate::network::protocol::{ClientFrame, HostFrame};

/// A host-originated notification, drained by the per-frame update step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientNotice {
    /// The host assigned this connection its lane.
    LaneAssigned {
        /// Lane this client drives.
        lane: Lane,
    },
    /// Both players are ready; start the local countdown.
    CountdownStarted {
        /// Seconds one hop takes, for projecting movement.
        hop_time: f32,
    },
    /// A lane's authoritative position changed.
    PlayerMoved {
        /// Lane that moved.
        lane: Lane,
        /// New position.
        position: f32,
    },
    /// The race is decided.
    WinnerDetermined {
        /// Winning lane.
        winner: Lane,
        /// Losing lane.
        loser: Lane,
    },
    /// The transport closed; return to a pre-session state.
    Disconnected,
}

impl From<HostFrame> for ClientNotice {
    fn from(frame: HostFrame) -> Self {
        match frame {
            HostFrame::LogicalPlayerAssigned { lane } => ClientNotice::LaneAssigned { lane },
            HostFrame::StartCountdown { hop_time } => ClientNotice::CountdownStarted { hop_time },
            HostFrame::PlayerMoved { lane, position } => {
                ClientNotice::PlayerMoved { lane, position }
            }
            HostFrame::WinnerDetermined { winner, loser } => {
                ClientNotice::WinnerDetermined { winner, loser }
            }
        }
    }
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// WebSocket connect or handshake failure.
    #[error("connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection's writer has shut down.
    #[error("connection closed")]
    ConnectionClosed,
}

/// A connected race client.
///
/// Dropping the client closes the connection, which the host treats as
/// fatal to the session.
pub struct RaceClient {
    outbound: mpsc::Sender<ClientFrame>,
    notices: Arc<DispatchQueue<ClientNotice>>,
}

impl RaceClient {
    /// Connect to the session named by `descriptor` and present its join
    /// token as the transport handshake.
    ///
    /// A token the host refuses produces no protocol-level error; the
    /// connection is simply closed and a [`ClientNotice::Disconnected`]
    /// surfaces on the next drain.
    pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, ClientError> {
        let url = format!("ws://{}:{}", descriptor.host, descriptor.port);
        debug!("connecting to {}", url);
        let (ws_stream, _) = connect_async(&url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        ws_sender
            .send(Message::Text(descriptor.token.clone()))
            .await?;

        let (outbound, mut outbound_rx) = mpsc::channel::<ClientFrame>(32);
        let notices = Arc::new(DispatchQueue::new());

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if ws_sender.send(Message::Text(frame.encode())).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader_notices = notices.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        push_decoded(&reader_notices, text.as_bytes());
                    }
                    Ok(Message::Binary(data)) => {
                        push_decoded(&reader_notices, &data);
                    }
                    Ok(Message::Close(_)) => {
                        debug!("host closed connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("websocket error: {}", e);
                        break;
                    }
                }
            }
            reader_notices.push(ClientNotice::Disconnected);
        });

        Ok(Self { outbound, notices })
    }

    /// Tell the host the scene is loaded and this player is ready.
    pub async fn scene_ready(&self) -> Result<(), ClientError> {
        self.send(ClientFrame::SceneReady).await
    }

    /// Request a hop. The host commits or penalizes it; the result comes
    /// back as a [`ClientNotice::PlayerMoved`] or not at all.
    pub async fn request_hop(&self) -> Result<(), ClientError> {
        self.send(ClientFrame::HopRequested).await
    }

    /// Take every notice received so far, in arrival order. Call once per
    /// frame from the consuming update step.
    pub fn drain_notices(&self) -> Vec<ClientNotice> {
        self.notices.drain_all()
    }

    async fn send(&self, frame: ClientFrame) -> Result<(), ClientError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

/// Decode a host frame; malformed input is logged and dropped without
/// surfacing a notice.
fn push_decoded(notices: &Arc<DispatchQueue<ClientNotice>>, bytes: &[u8]) {
    match HostFrame::decode(bytes) {
        Ok(frame) => notices.push(frame.into()),
        Err(e) => warn!("dropping malformed frame from host: {}", e),
    }
}
