//! Carry scheduler.
//!
//! A capacity weighted lottery used to pick the target of the next write, whether that target
//! is a storage node (on the master) or a data partition (on the client).
//!
//! Every candidate holds a floating point `carry`. A candidate is ready once its carry reaches
//! `CARRY_THRESHOLD`. When no candidate is ready, every candidate accrues `1 - usage_ratio`, so
//! candidates with more free space become ready more often. The selected candidate gives back
//! exactly `1.0`, keeping whatever remainder it accrued beyond the threshold. Over a long run each
//! candidate's share of selections is proportional to its free capacity, and no eligible
//! candidate with free space is ever starved.
//!
//! Carry mutations happen under the candidate's own lock, via `CarryNode`. Selection across the
//! candidate set is best-effort: it never holds more than one candidate's lock at a time.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use rand::Rng;

use crate::error::{AppError, AppResult};

/// The carry a candidate must reach before it may be selected.
pub const CARRY_THRESHOLD: f64 = 1.0;

/// The per-candidate scheduling weight.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CarryState {
    pub carry: f64,
    /// The number of times this candidate has been selected.
    pub select_count: u64,
}

impl CarryState {
    /// Create a new state with a carry drawn uniformly from `[0, 1)`.
    ///
    /// The random start ensures that a fleet of identical candidates does not reach the
    /// threshold in lock step.
    pub fn seeded<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            carry: rng.gen_range(0.0..1.0),
            select_count: 0,
        }
    }

    /// True if this candidate may be selected.
    pub fn is_ready(&self) -> bool {
        self.carry >= CARRY_THRESHOLD
    }

    /// Accrue weight proportional to the free capacity implied by `usage_ratio`.
    ///
    /// Returns the weight which was added.
    pub fn accrue(&mut self, usage_ratio: f64) -> f64 {
        let weight = (1.0 - usage_ratio).clamp(0.0, 1.0);
        self.carry += weight;
        weight
    }

    /// Consume one unit of carry if ready, returning true if the candidate was taken.
    pub fn take(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.select_count += 1;
        self.carry -= CARRY_THRESHOLD;
        true
    }
}

/// A candidate which may be the target of a write.
///
/// Implementors guard their state with a lock of their own, and every method here must be
/// atomic with respect to that lock.
pub trait CarryNode {
    /// The identity used in exclusion sets.
    type Id: Copy + Eq + Hash + Debug;

    /// This candidate's identity.
    fn carry_id(&self) -> Self::Id;

    /// A snapshot of this candidate's current carry state.
    fn carry_state(&self) -> CarryState;

    /// Accrue weight based on current usage, returning the weight added.
    fn accrue_carry(&self) -> f64;

    /// Select this candidate if it is still ready: recompute usage, increment the select count
    /// and give back exactly one unit of carry. Returns the post-selection state, or `None` if the
    /// candidate was no longer ready.
    fn try_select(&self) -> Option<CarryState>;
}

/// Select the target of the next write from the given candidates.
///
/// Candidates which fail `is_eligible` or whose ID is in `exclude` are never returned. If no
/// candidate remains, or if none of the remaining candidates has any free capacity to accrue
/// weight from, `AppError::CapacityExhausted` is returned.
pub fn select<N, F>(candidates: &[Arc<N>], exclude: &HashSet<N::Id>, is_eligible: F) -> AppResult<Arc<N>>
where
    N: CarryNode,
    F: Fn(&N) -> bool,
{
    let eligible: Vec<&Arc<N>> = candidates
        .iter()
        .filter(|node| !exclude.contains(&node.carry_id()) && is_eligible(node.as_ref()))
        .collect();
    if eligible.is_empty() {
        return Err(AppError::CapacityExhausted);
    }

    loop {
        if let Some(node) = best_ready(&eligible) {
            match node.try_select() {
                Some(state) => {
                    tracing::trace!(id = ?node.carry_id(), carry = state.carry, select_count = state.select_count, "carry candidate selected");
                    return Ok(node.clone());
                }
                // A concurrent selector took this candidate first, re-evaluate.
                None => continue,
            }
        }

        let added: f64 = eligible.iter().map(|node| node.accrue_carry()).sum();
        if added <= 0.0 {
            tracing::warn!(candidates = eligible.len(), "no carry candidate has free capacity");
            return Err(AppError::CapacityExhausted);
        }
    }
}

/// The ready candidate with the highest carry, ties broken by the lowest select count.
fn best_ready<'a, N: CarryNode>(eligible: &[&'a Arc<N>]) -> Option<&'a Arc<N>> {
    let mut best: Option<(&'a Arc<N>, CarryState)> = None;
    for node in eligible.iter().copied() {
        let state = node.carry_state();
        if !state.is_ready() {
            continue;
        }
        let is_better = match &best {
            None => true,
            Some((_, current)) => state.carry > current.carry || (state.carry == current.carry && state.select_count < current.select_count),
        };
        if is_better {
            best = Some((node, state));
        }
    }
    best.map(|(node, _)| node)
}
