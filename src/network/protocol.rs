//! Protocol Messages
//!
//! Wire format for host-client communication. Frames are printable text:
//! the opcode, then payload fields, joined with `:`. The payload field
//! count and types are fixed per opcode. The underlying channel base64
//! encodes text payloads, so decoded fields may not contain `:`, `,` or
//! `"`.

use std::fmt::Write as _;

use crate::game::race::Lane;

// =============================================================================
// OPCODES
// =============================================================================

/// Message opcodes, stable across host and client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// host -> client: the logical player index for this connection.
    LogicalPlayerAssigned = 100,
    /// host -> client: both players are ready, start the countdown.
    StartCountdown = 101,
    /// host -> client: a lane's authoritative position changed.
    PlayerMoved = 102,
    /// host -> client: the race has a winner.
    WinnerDetermined = 103,
    /// client -> host: scene is loaded, the player is ready.
    SceneReady = 200,
    /// client -> host: the player pressed hop.
    HopRequested = 201,
}

impl Opcode {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            100 => Some(Opcode::LogicalPlayerAssigned),
            101 => Some(Opcode::StartCountdown),
            102 => Some(Opcode::PlayerMoved),
            103 => Some(Opcode::WinnerDetermined),
            200 => Some(Opcode::SceneReady),
            201 => Some(Opcode::HopRequested),
            _ => None,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// A frame that failed to decode. The caller logs it and drops the frame;
/// malformed input never reaches simulation state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// Frame contained no opcode.
    #[error("empty frame")]
    Empty,

    /// Frame bytes were not valid UTF-8 text.
    #[error("frame is not text: {0}")]
    NotText(String),

    /// Opcode is not in the fixed table.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    /// Opcode arrived with the wrong number of payload fields.
    #[error("{opcode:?} expects {expected} payload field(s), got {got}")]
    FieldCount {
        /// The decoded opcode.
        opcode: Opcode,
        /// Fields its schema requires.
        expected: usize,
        /// Fields actually present.
        got: usize,
    },

    /// A payload field failed to parse as its schema type.
    #[error("payload field {index} is not a valid {kind}: {value:?}")]
    BadField {
        /// Zero-based field position.
        index: usize,
        /// Expected primitive type.
        kind: &'static str,
        /// Offending raw text.
        value: String,
    },

    /// A payload field contained a character reserved by the transport.
    #[error("payload field contains reserved character: {0:?}")]
    ReservedField(String),

    /// A lane index outside the two-player range.
    #[error("lane index out of range: {0}")]
    LaneOutOfRange(u8),
}

// =============================================================================
// HOST -> CLIENT FRAMES
// =============================================================================

/// Frames sent from the session host to clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostFrame {
    /// Tell a newly accepted connection which lane it drives.
    LogicalPlayerAssigned {
        /// Assigned logical player index.
        lane: Lane,
    },

    /// Both players are ready; clients start their local countdown.
    StartCountdown {
        /// Seconds one hop takes, for client-side projection.
        hop_time: f32,
    },

    /// A hop committed and a lane moved.
    PlayerMoved {
        /// Lane that moved.
        lane: Lane,
        /// New authoritative position.
        position: f32,
    },

    /// The race is decided.
    WinnerDetermined {
        /// Winning lane.
        winner: Lane,
        /// Losing lane.
        loser: Lane,
    },
}

impl HostFrame {
    /// The opcode tagging this frame on the wire.
    pub fn opcode(&self) -> Opcode {
        match self {
            HostFrame::LogicalPlayerAssigned { .. } => Opcode::LogicalPlayerAssigned,
            HostFrame::StartCountdown { .. } => Opcode::StartCountdown,
            HostFrame::PlayerMoved { .. } => Opcode::PlayerMoved,
            HostFrame::WinnerDetermined { .. } => Opcode::WinnerDetermined,
        }
    }

    /// Encode to wire text. Infallible for in-range values: integer and
    /// float formatting cannot produce reserved characters.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}", self.opcode() as u16);
        match self {
            HostFrame::LogicalPlayerAssigned { lane } => {
                let _ = write!(out, ":{lane}");
            }
            HostFrame::StartCountdown { hop_time } => {
                let _ = write!(out, ":{hop_time}");
            }
            HostFrame::PlayerMoved { lane, position } => {
                let _ = write!(out, ":{lane}:{position}");
            }
            HostFrame::WinnerDetermined { winner, loser } => {
                let _ = write!(out, ":{winner}:{loser}");
            }
        }
        out
    }

    /// Decode a frame received from the host.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (opcode, fields) = split_frame(bytes)?;
        match opcode {
            Opcode::LogicalPlayerAssigned => {
                let [lane] = take_fields(opcode, &fields)?;
                Ok(HostFrame::LogicalPlayerAssigned {
                    lane: parse_lane(0, lane)?,
                })
            }
            Opcode::StartCountdown => {
                let [hop_time] = take_fields(opcode, &fields)?;
                Ok(HostFrame::StartCountdown {
                    hop_time: parse_f32(0, hop_time)?,
                })
            }
            Opcode::PlayerMoved => {
                let [lane, position] = take_fields(opcode, &fields)?;
                Ok(HostFrame::PlayerMoved {
                    lane: parse_lane(0, lane)?,
                    position: parse_f32(1, position)?,
                })
            }
            Opcode::WinnerDetermined => {
                let [winner, loser] = take_fields(opcode, &fields)?;
                Ok(HostFrame::WinnerDetermined {
                    winner: parse_lane(0, winner)?,
                    loser: parse_lane(1, loser)?,
                })
            }
            Opcode::SceneReady | Opcode::HopRequested => {
                Err(ProtocolError::UnknownOpcode(opcode as u16))
            }
        }
    }
}

// =============================================================================
// CLIENT -> HOST FRAMES
// =============================================================================

/// Frames sent from a client to the session host. Neither carries payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    /// The client's scene is loaded and it is ready to race.
    SceneReady,
    /// The player requested a hop.
    HopRequested,
}

impl ClientFrame {
    /// The opcode tagging this frame on the wire.
    pub fn opcode(&self) -> Opcode {
        match self {
            ClientFrame::SceneReady => Opcode::SceneReady,
            ClientFrame::HopRequested => Opcode::HopRequested,
        }
    }

    /// Encode to wire text.
    pub fn encode(&self) -> String {
        (self.opcode() as u16).to_string()
    }

    /// Decode a frame received from a client.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (opcode, fields) = split_frame(bytes)?;
        match opcode {
            Opcode::SceneReady => {
                let [] = take_fields(opcode, &fields)?;
                Ok(ClientFrame::SceneReady)
            }
            Opcode::HopRequested => {
                let [] = take_fields(opcode, &fields)?;
                Ok(ClientFrame::HopRequested)
            }
            _ => Err(ProtocolError::UnknownOpcode(opcode as u16)),
        }
    }
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

const RESERVED: [char; 2] = [',', '"'];

fn split_frame(bytes: &[u8]) -> Result<(Opcode, Vec<String>), ProtocolError> {
    let text =
        std::str::from_utf8(bytes).map_err(|e| ProtocolError::NotText(e.to_string()))?;
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let mut parts = text.split(':');
    let opcode_text = parts.next().unwrap_or_default();
    let raw = opcode_text
        .parse::<u16>()
        .map_err(|_| ProtocolError::BadField {
            index: 0,
            kind: "opcode",
            value: opcode_text.to_string(),
        })?;
    let opcode = Opcode::from_u16(raw).ok_or(ProtocolError::UnknownOpcode(raw))?;

    let fields: Vec<String> = parts.map(str::to_string).collect();
    for field in &fields {
        if field.contains(RESERVED) {
            return Err(ProtocolError::ReservedField(field.clone()));
        }
    }
    Ok((opcode, fields))
}

fn take_fields<'a, const N: usize>(
    opcode: Opcode,
    fields: &'a [String],
) -> Result<[&'a str; N], ProtocolError> {
    if fields.len() != N {
        return Err(ProtocolError::FieldCount {
            opcode,
            expected: N,
            got: fields.len(),
        });
    }
    let mut out = [""; N];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field.as_str();
    }
    Ok(out)
}

fn parse_lane(index: usize, value: &str) -> Result<Lane, ProtocolError> {
    let raw = value.parse::<u8>().map_err(|_| ProtocolError::BadField {
        index,
        kind: "lane",
        value: value.to_string(),
    })?;
    Lane::new(raw).ok_or(ProtocolError::LaneOutOfRange(raw))
}

fn parse_f32(index: usize, value: &str) -> Result<f32, ProtocolError> {
    value.parse::<f32>().map_err(|_| ProtocolError::BadField {
        index,
        kind: "float",
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_frame_wire_shape() {
        assert_eq!(
            HostFrame::LogicalPlayerAssigned { lane: Lane::SECOND }.encode(),
            "100:1"
        );
        assert_eq!(
            HostFrame::StartCountdown { hop_time: 4.0 }.encode(),
            "101:4"
        );
        assert_eq!(
            HostFrame::PlayerMoved {
                lane: Lane::FIRST,
                position: 0.2,
            }
            .encode(),
            "102:0:0.2"
        );
        assert_eq!(
            HostFrame::WinnerDetermined {
                winner: Lane::FIRST,
                loser: Lane::SECOND,
            }
            .encode(),
            "103:0:1"
        );
    }

    #[test]
    fn test_client_frame_wire_shape() {
        assert_eq!(ClientFrame::SceneReady.encode(), "200");
        assert_eq!(ClientFrame::HopRequested.encode(), "201");
    }

    #[test]
    fn test_host_frame_roundtrip() {
        let frames = [
            HostFrame::LogicalPlayerAssigned { lane: Lane::FIRST },
            HostFrame::StartCountdown { hop_time: 2.5 },
            HostFrame::PlayerMoved {
                lane: Lane::SECOND,
                position: 0.6,
            },
            HostFrame::WinnerDetermined {
                winner: Lane::SECOND,
                loser: Lane::FIRST,
            },
        ];
        for frame in frames {
            let decoded = HostFrame::decode(frame.encode().as_bytes()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_client_frame_roundtrip() {
        for frame in [ClientFrame::SceneReady, ClientFrame::HopRequested] {
            let decoded = ClientFrame::decode(frame.encode().as_bytes()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(matches!(
            HostFrame::decode(b"999:1"),
            Err(ProtocolError::UnknownOpcode(999))
        ));
        // Direction matters: a client opcode is not a host frame.
        assert!(matches!(
            HostFrame::decode(b"200"),
            Err(ProtocolError::UnknownOpcode(200))
        ));
        assert!(matches!(
            ClientFrame::decode(b"102:0:0.2"),
            Err(ProtocolError::UnknownOpcode(102))
        ));
    }

    #[test]
    fn test_field_count_must_match_schema() {
        assert!(matches!(
            HostFrame::decode(b"102:0"),
            Err(ProtocolError::FieldCount {
                opcode: Opcode::PlayerMoved,
                expected: 2,
                got: 1,
            })
        ));
        assert!(matches!(
            HostFrame::decode(b"100:0:7"),
            Err(ProtocolError::FieldCount { .. })
        ));
        assert!(matches!(
            ClientFrame::decode(b"200:1"),
            Err(ProtocolError::FieldCount { .. })
        ));
    }

    #[test]
    fn test_bad_field_types_rejected() {
        assert!(matches!(
            HostFrame::decode(b"100:two"),
            Err(ProtocolError::BadField { kind: "lane", .. })
        ));
        assert!(matches!(
            HostFrame::decode(b"101:fast"),
            Err(ProtocolError::BadField { kind: "float", .. })
        ));
    }

    #[test]
    fn test_lane_out_of_range_rejected() {
        assert!(matches!(
            HostFrame::decode(b"100:2"),
            Err(ProtocolError::LaneOutOfRange(2))
        ));
        assert!(matches!(
            HostFrame::decode(b"103:0:9"),
            Err(ProtocolError::LaneOutOfRange(9))
        ));
    }

    #[test]
    fn test_reserved_characters_rejected() {
        assert!(matches!(
            HostFrame::decode(b"102:0:0,2"),
            Err(ProtocolError::ReservedField(_))
        ));
        assert!(matches!(
            HostFrame::decode(b"101:\"4\""),
            Err(ProtocolError::ReservedField(_))
        ));
    }

    #[test]
    fn test_decode_rejects_noise_without_panicking() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let len = rng.gen_range(0..32);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen::<u8>()).collect();
            // Arbitrary bytes must come back as a typed error, never a panic.
            let _ = HostFrame::decode(&bytes);
            let _ = ClientFrame::decode(&bytes);
        }
    }

    #[test]
    fn test_empty_and_non_text_rejected() {
        assert!(matches!(HostFrame::decode(b""), Err(ProtocolError::Empty)));
        assert!(matches!(
            HostFrame::decode(&[0xff, 0xfe]),
            Err(ProtocolError::NotText(_))
        ));
    }
}
