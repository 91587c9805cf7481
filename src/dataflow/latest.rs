//! Latest-value combination.

use super::{check_slot, slot_names, Combinator, DataflowError, SlotId};
use tracing::trace;

/// Keeps the most recent value of every slot and emits the whole set when a
/// trigger slot receives a value.
///
/// Slots that never received a value are reported as `None`, unless
/// `require_first` is set, in which case nothing is emitted until every slot
/// has been filled once. Values are never consumed by an emission.
#[derive(Debug, Clone)]
pub struct CombineLatest<T> {
    name: String,
    slots: Vec<String>,
    latest: Vec<Option<T>>,
    triggers: Vec<bool>,
    require_first: bool,
}

impl<T: Clone> CombineLatest<T> {
    /// Every slot triggers emission; `require_first` is off.
    pub fn new<I, S>(name: &str, slots: I) -> Result<Self, DataflowError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = slot_names(name, slots)?;
        Ok(Self {
            name: name.to_string(),
            latest: vec![None; slots.len()],
            triggers: vec![true; slots.len()],
            slots,
            require_first: false,
        })
    }

    /// Restrict emission to arrivals on the named slots.
    pub fn with_triggers<I, S>(mut self, triggers: I) -> Result<Self, DataflowError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags = vec![false; self.slots.len()];
        for trigger in triggers {
            let id = self.slot(trigger.as_ref())?;
            flags[id.0] = true;
        }
        self.triggers = flags;
        Ok(self)
    }

    /// Hold emissions until every slot has been filled once.
    pub fn require_first(mut self, require_first: bool) -> Self {
        self.require_first = require_first;
        self
    }

    /// Latest value seen on `slot`.
    pub fn latest(&self, slot: SlotId) -> Option<&T> {
        self.latest.get(slot.0).and_then(Option::as_ref)
    }
}

impl<T: Clone> Combinator for CombineLatest<T> {
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
        self.latest[i] = Some(value);

        if !self.triggers[i] {
            return Ok(Vec::new());
        }
        if self.require_first && self.latest.iter().any(Option::is_none) {
            return Ok(Vec::new());
        }
        trace!(node = %self.name, trigger = %self.slots[i], "combine_latest emitted");
        Ok(vec![self.latest.clone()])
    }

    fn reset(&mut self) {
        self.latest.iter_mut().for_each(|v| *v = None);
    }
}
