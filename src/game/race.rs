//! Hop Simulation
//!
//! The per-lane cooldown/position model. A hop request commits only when the
//! lane's cooldown has expired; premature requests are penalized rather than
//! silently dropped, and the penalty accumulates with repeated attempts.
//!
//! Invoked only from the session's authoritative context, never concurrently
//! with itself or with [`RaceSim::advance`].

use crate::game::events::RaceEvent;
use crate::MAX_PARTICIPANTS;

/// Course position a lane must reach to win. Clients project sprite
/// positions from this, so it does not vary per session.
pub const FINISH_LINE: f32 = 1.0;

/// Logical player index within a session: lane 0 or lane 1.
///
/// Distinct from the transport-level peer identity; assigned by the gateway
/// in acceptance order and immutable for the life of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lane(u8);

impl Lane {
    /// First-accepted lane.
    pub const FIRST: Lane = Lane(0);
    /// Second-accepted lane.
    pub const SECOND: Lane = Lane(1);

    /// Construct from a raw index, rejecting anything but 0 or 1.
    pub fn new(index: u8) -> Option<Lane> {
        (index < MAX_PARTICIPANTS as u8).then_some(Lane(index))
    }

    /// Raw lane index.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The other lane of a two-player race.
    pub fn opponent(self) -> Lane {
        Lane(1 - self.0)
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tunable race parameters.
#[derive(Debug, Clone, Copy)]
pub struct RaceConfig {
    /// Seconds a committed hop takes; also the refractory period before the
    /// next hop may commit.
    pub hop_time: f32,
    /// Fraction of the course covered by one committed hop.
    pub hop_length: f32,
    /// Seconds added to the cooldown for each premature hop request.
    pub click_penalty: f32,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            hop_time: 4.0,
            hop_length: 0.2,
            click_penalty: 0.1,
        }
    }
}

/// Authoritative state of one lane.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneState {
    /// Course position in [0.0, FINISH_LINE]; monotonically non-decreasing.
    pub position: f32,
    /// Seconds until the next hop may commit. Negative means ready; it is
    /// only decremented while positive.
    pub cooldown: f32,
}

/// The authoritative two-lane race.
///
/// One instance per session, owned by the session lifecycle. The same model
/// serves a real transport or a loopback event source; there is no separate
/// local-play implementation of the hop policy.
#[derive(Debug)]
pub struct RaceSim {
    config: RaceConfig,
    lanes: [LaneState; MAX_PARTICIPANTS],
    winner: Option<Lane>,
}

impl RaceSim {
    /// Create a race with both lanes at the start line, ready to hop.
    pub fn new(config: RaceConfig) -> Self {
        Self {
            config,
            lanes: [LaneState::default(); MAX_PARTICIPANTS],
            winner: None,
        }
    }

    /// The configuration this race runs under.
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// State of a single lane.
    pub fn lane(&self, lane: Lane) -> &LaneState {
        &self.lanes[lane.index()]
    }

    /// The winning lane, once one has crossed the finish line.
    pub fn winner(&self) -> Option<Lane> {
        self.winner
    }

    /// Advance simulated time by `dt` seconds.
    ///
    /// Cooldowns tick down only while positive, so a lane goes at most one
    /// step below zero and stays there until its next committed hop.
    pub fn advance(&mut self, dt: f32) {
        for lane in &mut self.lanes {
            if lane.cooldown > 0.0 {
                lane.cooldown -= dt;
            }
        }
    }

    /// Process one accepted hop request for `lane`.
    ///
    /// With the cooldown expired the hop commits: the cooldown rearms to the
    /// full hop time, the position advances, and a `PlayerMoved` event is
    /// emitted, followed by `WinnerDetermined` if the lane reached the
    /// finish line. A premature request commits nothing and adds the click
    /// penalty to the remaining cooldown.
    pub fn process_hop(&mut self, lane: Lane) -> Vec<RaceEvent> {
        // The session ends on the winning hop; a straggler event that raced
        // the teardown must not re-emit a winner.
        if self.winner.is_some() {
            return Vec::new();
        }

        let state = &mut self.lanes[lane.index()];
        if state.cooldown > 0.0 {
            state.cooldown += self.config.click_penalty;
            return Vec::new();
        }

        state.cooldown = self.config.hop_time;
        state.position += self.config.hop_length;

        let mut events = vec![RaceEvent::PlayerMoved {
            lane,
            position: state.position,
        }];

        if state.position >= FINISH_LINE {
            self.winner = Some(lane);
            events.push(RaceEvent::WinnerDetermined {
                winner: lane,
                loser: lane.opponent(),
            });
        }

        events
    }

    /// Clear all per-lane state, as part of session teardown.
    pub fn reset(&mut self) {
        self.lanes = [LaneState::default(); MAX_PARTICIPANTS];
        self.winner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sim() -> RaceSim {
        RaceSim::new(RaceConfig::default())
    }

    #[test]
    fn test_lane_bounds() {
        assert_eq!(Lane::new(0), Some(Lane::FIRST));
        assert_eq!(Lane::new(1), Some(Lane::SECOND));
        assert_eq!(Lane::new(2), None);
        assert_eq!(Lane::FIRST.opponent(), Lane::SECOND);
        assert_eq!(Lane::SECOND.opponent(), Lane::FIRST);
    }

    #[test]
    fn test_first_hop_commits() {
        let mut sim = sim();
        let events = sim.process_hop(Lane::FIRST);
        assert_eq!(
            events,
            vec![RaceEvent::PlayerMoved {
                lane: Lane::FIRST,
                position: 0.2,
            }]
        );
        assert_eq!(sim.lane(Lane::FIRST).cooldown, 4.0);
        // The opponent is untouched.
        assert_eq!(sim.lane(Lane::SECOND).position, 0.0);
    }

    #[test]
    fn test_premature_hop_adds_accumulating_penalty() {
        let mut sim = sim();
        sim.process_hop(Lane::FIRST);

        assert!(sim.process_hop(Lane::FIRST).is_empty());
        assert!((sim.lane(Lane::FIRST).cooldown - 4.1).abs() < 1e-6);

        assert!(sim.process_hop(Lane::FIRST).is_empty());
        assert!((sim.lane(Lane::FIRST).cooldown - 4.2).abs() < 1e-6);

        // Position never moved on the rejected attempts.
        assert!((sim.lane(Lane::FIRST).position - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_hop_commits_again_after_cooldown_elapses() {
        let mut sim = sim();
        sim.process_hop(Lane::FIRST);

        sim.advance(3.9);
        assert!(sim.process_hop(Lane::FIRST).is_empty());

        // The rejection above pushed the cooldown to 0.2; ride it out.
        sim.advance(0.3);
        let events = sim.process_hop(Lane::FIRST);
        assert_eq!(events.len(), 1);
        assert!((sim.lane(Lane::FIRST).position - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_cooldown_stops_decrementing_below_zero() {
        let mut sim = sim();
        sim.process_hop(Lane::FIRST);

        for _ in 0..100 {
            sim.advance(0.1);
        }
        let settled = sim.lane(Lane::FIRST).cooldown;
        assert!(settled <= 0.0);

        // Once non-positive, further time does not drag it lower.
        sim.advance(10.0);
        assert_eq!(sim.lane(Lane::FIRST).cooldown, settled);
    }

    #[test]
    fn test_fifth_hop_wins_exactly_once() {
        let mut sim = sim();
        for expected in 1..=4 {
            let events = sim.process_hop(Lane::SECOND);
            assert_eq!(events.len(), 1, "hop {} must not win", expected);
            sim.advance(10.0);
        }

        let events = sim.process_hop(Lane::SECOND);
        assert_eq!(
            events,
            vec![
                RaceEvent::PlayerMoved {
                    lane: Lane::SECOND,
                    position: sim.lane(Lane::SECOND).position,
                },
                RaceEvent::WinnerDetermined {
                    winner: Lane::SECOND,
                    loser: Lane::FIRST,
                },
            ]
        );
        assert_eq!(sim.winner(), Some(Lane::SECOND));
    }

    #[test]
    fn test_no_events_after_winner() {
        let mut sim = sim();
        for _ in 0..5 {
            sim.process_hop(Lane::FIRST);
            sim.advance(10.0);
        }
        assert_eq!(sim.winner(), Some(Lane::FIRST));

        assert!(sim.process_hop(Lane::FIRST).is_empty());
        assert!(sim.process_hop(Lane::SECOND).is_empty());
    }

    #[test]
    fn test_position_monotonically_non_decreasing() {
        let mut sim = sim();
        let mut last = 0.0;
        for _ in 0..20 {
            sim.process_hop(Lane::FIRST);
            sim.advance(1.3);
            let position = sim.lane(Lane::FIRST).position;
            assert!(position >= last);
            last = position;
        }
    }

    #[test]
    fn test_reset_clears_lanes() {
        let mut sim = sim();
        for _ in 0..5 {
            sim.process_hop(Lane::FIRST);
            sim.advance(10.0);
        }

        sim.reset();
        assert_eq!(sim.winner(), None);
        assert_eq!(sim.lane(Lane::FIRST).position, 0.0);
        assert_eq!(sim.lane(Lane::FIRST).cooldown, 0.0);
    }

    proptest! {
        /// A hop commits iff the time inserted since the last committed hop
        /// exceeds the cooldown, where each rejection grows the cooldown by
        /// the click penalty.
        #[test]
        fn prop_hop_commits_iff_cooldown_elapsed(
            steps in prop::collection::vec((0.0f32..2.0, any::<bool>()), 1..60)
        ) {
            let config = RaceConfig {
                hop_time: 1.0,
                hop_length: 0.001, // keep the finish line out of reach
                click_penalty: 0.25,
            };
            let mut sim = RaceSim::new(config);
            let mut expected_cooldown = 0.0f32;
            let mut expected_commits = 0u32;

            for (dt, hop) in steps {
                sim.advance(dt);
                if expected_cooldown > 0.0 {
                    expected_cooldown -= dt;
                }

                if hop {
                    let events = sim.process_hop(Lane::FIRST);
                    if expected_cooldown <= 0.0 {
                        expected_commits += 1;
                        expected_cooldown = config.hop_time;
                        prop_assert_eq!(events.len(), 1);
                    } else {
                        expected_cooldown += config.click_penalty;
                        prop_assert!(events.is_empty());
                    }
                }
            }

            let expected_position = expected_commits as f32 * config.hop_length;
            prop_assert!((sim.lane(Lane::FIRST).position - expected_position).abs() < 1e-4);
        }
    }
}
