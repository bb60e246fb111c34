//! Core engine: outcome draws, streak tracking, and the block/round
//! state machine. Synchronous and free of I/O; hosts drive it one
//! decision at a time.

pub mod rng;
pub mod outcome;
pub mod streak;
pub mod session;

pub use outcome::OutcomeEngine;
pub use rng::{RandomSource, ScriptedRng, SeededRng};
pub use session::{Session, SessionView};
pub use streak::StreakState;
