//! Principal-driven zip against cached side inputs.

use super::{check_slot, slot_names, Combinator, DataflowError, SlotId};
use std::collections::VecDeque;
use tracing::trace;

/// Emits once per arrival on the principal slot, paired with the latest value
/// of every other slot.
///
/// With `require_first` (the default), principal values that arrive before
/// every other slot has a value are queued and flushed in arrival order as
/// soon as the last side input arrives, so no principal value is lost.
/// Without it, they are emitted immediately with `None` for missing slots.
#[derive(Debug, Clone)]
pub struct ZipLatest<T> {
    name: String,
    slots: Vec<String>,
    principal: usize,
    latest: Vec<Option<T>>,
    waiting: VecDeque<T>,
    require_first: bool,
}

impl<T: Clone> ZipLatest<T> {
    /// `principal` must be one of `slots`.
    pub fn new<I, S>(name: &str, slots: I, principal: &str) -> Result<Self, DataflowError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = slot_names(name, slots)?;
        let principal = slots
            .iter()
            .position(|s| s == principal)
            .ok_or_else(|| DataflowError::UnknownSlot {
                node: name.to_string(),
                slot: principal.to_string(),
            })?;
        Ok(Self {
            name: name.to_string(),
            latest: vec![None; slots.len()],
            slots,
            principal,
            waiting: VecDeque::new(),
            require_first: true,
        })
    }

    /// Queue principal values until every side slot has a value.
    pub fn require_first(mut self, require_first: bool) -> Self {
        self.require_first = require_first;
        self
    }

    /// Slot that drives emission.
    pub fn principal(&self) -> SlotId {
        SlotId(self.principal)
    }

    /// Principal values queued while side inputs are missing.
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    fn sides_ready(&self) -> bool {
        self.latest
            .iter()
            .enumerate()
            .all(|(i, v)| i == self.principal || v.is_some())
    }

    fn tuple(&self, value: T) -> Vec<Option<T>> {
        let mut tuple = self.latest.clone();
        tuple[self.principal] = Some(value);
        tuple
    }
}

impl<T: Clone> Combinator for ZipLatest<T> {
    type Input = T;
    type Output = Vec<Option<T>>;

    fn name(&self) -> &str {
        &self.name
    }

    fn slots(&self) -> &[String] {
        &self.slots
    }

    fn push(&mut self, slot: SlotId, value: T) -> Result<Vec<Vec<Option<T>>>, DataflowError> {
        let i = check_slot(&self.name, &self.slots, slot)?;

        if i == self.principal {
            if self.sides_ready() || !self.require_first {
                trace!(node = %self.name, "zip_latest emitted");
                return Ok(vec![self.tuple(value)]);
            }
            self.waiting.push_back(value);
            return Ok(Vec::new());
        }

        self.latest[i] = Some(value);
        if self.waiting.is_empty() || !self.sides_ready() {
            return Ok(Vec::new());
        }
        let flushed: Vec<T> = self.waiting.drain(..).collect();
        trace!(node = %self.name, flushed = flushed.len(), "zip_latest flushed queued values");
        Ok(flushed.into_iter().map(|v| self.tuple(v)).collect())
    }

    fn reset(&mut self) {
        self.latest.iter_mut().for_each(|v| *v = None);
        self.waiting.clear();
    }
}
