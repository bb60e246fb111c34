//! Random source for outcome draws.
//!
//! All randomness that can affect a trial flows through a `RandomSource`.
//! In production each session owns a `SeededRng`; tests and replays
//! inject a `ScriptedRng` with known draws.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

use crate::types::PulseError;

/// Abstraction over uniform random draws.
pub trait RandomSource: Send {
    /// Draw a uniform `f64` in `[0.0, 1.0)`.
    fn next_unit(&mut self) -> Result<f64, PulseError>;

    /// Draw an index uniformly from `0..n`.
    fn pick_index(&mut self, n: usize) -> Result<usize, PulseError> {
        if n == 0 {
            return Err(PulseError::RngUnavailable("cannot pick from an empty range".into()));
        }
        let u = self.next_unit()?;
        Ok(((u * n as f64) as usize).min(n - 1))
    }
}

/// `StdRng`-backed source, reproducible from a `u64` seed.
pub struct SeededRng {
    inner: StdRng,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            inner: StdRng::from_entropy(),
        }
    }
}

impl RandomSource for SeededRng {
    fn next_unit(&mut self) -> Result<f64, PulseError> {
        Ok(self.inner.gen::<f64>())
    }
}

/// Replays a fixed sequence of draws, then reports the source as unavailable.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRng {
    draws: VecDeque<f64>,
}

impl ScriptedRng {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
        }
    }

    /// Append more draws to the end of the script.
    pub fn push(&mut self, draw: f64) {
        self.draws.push_back(draw);
    }

    pub fn remaining(&self) -> usize {
        self.draws.len()
    }
}

impl RandomSource for ScriptedRng {
    fn next_unit(&mut self) -> Result<f64, PulseError> {
        self.draws
            .pop_front()
            .ok_or_else(|| PulseError::RngUnavailable("scripted draws exhausted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let mut a = SeededRng::new(7);
        let mut b = SeededRng::new(7);
        for _ in 0..20 {
            assert_eq!(a.next_unit().unwrap(), b.next_unit().unwrap());
        }
    }

    #[test]
    fn test_seeded_rng_range() {
        let mut rng = SeededRng::new(99);
        for _ in 0..1000 {
            let u = rng.next_unit().unwrap();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn test_scripted_rng_replays_then_fails() {
        let mut rng = ScriptedRng::new([0.1, 0.9]);
        assert_eq!(rng.next_unit().unwrap(), 0.1);
        assert_eq!(rng.remaining(), 1);
        assert_eq!(rng.next_unit().unwrap(), 0.9);
        assert!(matches!(rng.next_unit(), Err(PulseError::RngUnavailable(_))));
    }

    #[test]
    fn test_pick_index() {
        let mut rng = ScriptedRng::new([0.0, 0.26, 0.999_999, 0.5]);
        assert_eq!(rng.pick_index(4).unwrap(), 0);
        assert_eq!(rng.pick_index(4).unwrap(), 1);
        assert_eq!(rng.pick_index(4).unwrap(), 3);
        assert!(rng.pick_index(0).is_err());
    }
}
