//! Stateful fold with explicit invalidation.

use super::{check_slot, Combinator, DataflowError, SlotId};
use tracing::trace;

/// Slot receiving values to fold.
pub const FOLD_VALUE_SLOT: SlotId = SlotId(0);
/// Slot whose arrivals reset the state.
pub const FOLD_INVALIDATE_SLOT: SlotId = SlotId(1);

/// Accumulates `state = fold(state, input)` and emits the new state on every
/// input. Any value arriving on the `invalidate` slot resets the state to its
/// initial value without emitting.
///
/// Used for expensive derived values (a loaded calibration, an accumulated
/// background) that should only be rebuilt when an upstream signal says so.
pub struct CachedFold<S, T, F> {
    name: String,
    slots: Vec<String>,
    initial: S,
    /// `None` until the first value after construction or invalidation
    state: Option<S>,
    fold: F,
    _input: std::marker::PhantomData<fn(T)>,
}

impl<S, T, F> CachedFold<S, T, F>
where
    S: Clone,
    F: FnMut(S, T) -> S,
{
    /// Slots are named `value` and `invalidate`.
    pub fn new(name: &str, initial: S, fold: F) -> Self {
        Self {
            name: name.to_string(),
            slots: vec!["value".to_string(), "invalidate".to_string()],
            state: None,
            initial,
            fold,
            _input: std::marker::PhantomData,
        }
    }

    /// Current state, or the initial value if nothing was folded yet.
    pub fn state(&self) -> &S {
        self.state.as_ref().unwrap_or(&self.initial)
    }

    /// Reset the state without going through the invalidate slot.
    pub fn invalidate(&mut self) {
        self.state = None;
    }
}

impl<S, T, F> Combinator for CachedFold<S, T, F>
where
    S: Clone,
    F: FnMut(S, T) -> S,
{
    type Input = T;
    type Output = S;

    fn name(&self) -> &str {
        &self.name
    }

    fn slots(&self) -> &[String] {
        &self.slots
    }

    fn push(&mut self, slot: SlotId, value: T) -> Result<Vec<S>, DataflowError> {
        if check_slot(&self.name, &self.slots, slot)? == FOLD_INVALIDATE_SLOT.0 {
            trace!(node = %self.name, "fold invalidated");
            self.invalidate();
            return Ok(Vec::new());
        }
        let previous = self.state.take().unwrap_or_else(|| self.initial.clone());
        let next = (self.fold)(previous, value);
        self.state = Some(next.clone());
        Ok(vec![next])
    }

    fn reset(&mut self) {
        self.invalidate();
    }
}
