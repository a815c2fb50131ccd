//! Simulation Events
//!
//! Emitted by [`crate::game::race::RaceSim`] when a hop commits; the host
//! translates them into protocol frames for broadcast.

use crate::game::race::Lane;

/// An event produced by the authoritative simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RaceEvent {
    /// A lane's hop committed and its position advanced.
    PlayerMoved {
        /// The lane that moved.
        lane: Lane,
        /// Authoritative position after the hop, in [0.0, 1.0].
        position: f32,
    },

    /// A lane crossed the finish line. Emitted at most once per race.
    WinnerDetermined {
        /// The winning lane.
        winner: Lane,
        /// The losing lane.
        loser: Lane,
    },
}
