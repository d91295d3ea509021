//! Randomized per-RUT delay assignment.
//!
//! Every RUT in a run waits a random number of minutes before touching
//! the portal so that concurrent clock actions do not land on identical
//! timestamps. The coordinator only decides the delay; the orchestrator
//! owns the actual sleep, which keeps this testable as a pure decision.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::rut;

const MIN_DELAY_MINUTES: u64 = 1;
const MAX_DELAY_MINUTES: u64 = 20;
const MAX_REDRAWS: u32 = 10;

/// Source of delay draws. Production uses the thread-local RNG; tests
/// stub this to force collisions.
pub trait DelaySource: Send {
    fn draw(&mut self) -> u64;
}

#[derive(Debug, Default)]
pub struct RandomDelaySource;

impl DelaySource for RandomDelaySource {
    fn draw(&mut self) -> u64 {
        rand::thread_rng().gen_range(MIN_DELAY_MINUTES..=MAX_DELAY_MINUTES)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DelayStatistics {
    pub assigned: usize,
    pub collisions: u64,
}

pub struct DelayCoordinator {
    inner: Mutex<DelayState>,
}

struct DelayState {
    registry: HashMap<String, u64>,
    collisions: u64,
    source: Box<dyn DelaySource>,
}

impl fmt::Debug for DelayCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.lock().unwrap();
        f.debug_struct("DelayCoordinator")
            .field("assigned", &guard.registry.len())
            .field("collisions", &guard.collisions)
            .finish()
    }
}

impl Default for DelayCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayCoordinator {
    pub fn new() -> Self {
        Self::with_source(Box::new(RandomDelaySource))
    }

    pub fn with_source(source: Box<dyn DelaySource>) -> Self {
        Self {
            inner: Mutex::new(DelayState {
                registry: HashMap::new(),
                collisions: 0,
                source,
            }),
        }
    }

    /// Assigns a delay in `[1, 20]` minutes to `rut`, redrawing up to
    /// ten times when the draw matches an already-assigned value. An
    /// exhausted redraw budget accepts the colliding value and counts
    /// it. The check-then-insert sequence runs under one lock so two
    /// workers cannot both accept the same delay unnoticed.
    pub fn assign(&self, rut: &str) -> u64 {
        let mut state = self.inner.lock().unwrap();
        let mut attempts = 0u32;
        let mut minutes = state.source.draw();

        while attempts < MAX_REDRAWS {
            if state.registry.is_empty() || !state.registry.values().any(|v| *v == minutes) {
                break;
            }
            attempts += 1;
            debug!(
                minutes,
                attempt = attempts,
                max = MAX_REDRAWS,
                "delay collision detected, redrawing"
            );
            if attempts < MAX_REDRAWS {
                minutes = state.source.draw();
            }
        }

        if attempts == MAX_REDRAWS {
            state.collisions += 1;
            warn!(
                rut = %rut::mask(rut),
                minutes,
                "could not avoid delay collision after {MAX_REDRAWS} redraws, accepting"
            );
        }

        state.registry.insert(rut.to_string(), minutes);
        info!(rut = %rut::mask(rut), minutes, "delay assigned");
        minutes
    }

    pub fn statistics(&self) -> DelayStatistics {
        let state = self.inner.lock().unwrap();
        DelayStatistics {
            assigned: state.registry.len(),
            collisions: state.collisions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(u64);

    impl DelaySource for FixedSource {
        fn draw(&mut self) -> u64 {
            self.0
        }
    }

    struct SequenceSource(Vec<u64>);

    impl DelaySource for SequenceSource {
        fn draw(&mut self) -> u64 {
            self.0.remove(0)
        }
    }

    #[test]
    fn first_assignment_never_collides() {
        let coordinator = DelayCoordinator::with_source(Box::new(FixedSource(7)));
        assert_eq!(coordinator.assign("11111111k"), 7);
        let stats = coordinator.statistics();
        assert_eq!(stats.assigned, 1);
        assert_eq!(stats.collisions, 0);
    }

    #[test]
    fn exhausted_redraws_accept_and_count_one_collision() {
        let coordinator = DelayCoordinator::with_source(Box::new(FixedSource(7)));
        coordinator.assign("11111111k");
        // Second RUT always draws the same value and must give up
        // after the redraw budget without failing.
        assert_eq!(coordinator.assign("222222222"), 7);
        let stats = coordinator.statistics();
        assert_eq!(stats.assigned, 2);
        assert_eq!(stats.collisions, 1);
    }

    #[test]
    fn redraw_resolves_collision_without_counting() {
        let coordinator =
            DelayCoordinator::with_source(Box::new(SequenceSource(vec![5, 5, 5, 12])));
        assert_eq!(coordinator.assign("11111111k"), 5);
        assert_eq!(coordinator.assign("222222222"), 12);
        let stats = coordinator.statistics();
        assert_eq!(stats.collisions, 0);
    }

    #[test]
    fn random_source_stays_in_range() {
        let mut source = RandomDelaySource;
        for _ in 0..200 {
            let minutes = source.draw();
            assert!((1..=20).contains(&minutes));
        }
    }

    #[test]
    fn reassignment_overwrites_previous_value() {
        let coordinator = DelayCoordinator::with_source(Box::new(SequenceSource(vec![3, 9])));
        coordinator.assign("11111111k");
        coordinator.assign("11111111k");
        assert_eq!(coordinator.statistics().assigned, 1);
    }
}
