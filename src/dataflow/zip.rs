//! Strict, index-aligned zip.

use super::{check_slot, slot_names, Combinator, DataflowError, SlotId};
use std::collections::VecDeque;
use tracing::trace;

/// Emits the i-th arrival of every slot together, in slot order.
///
/// Slots that run ahead queue their values in FIFO order; emitting `k`
/// tuples requires exactly `k` arrivals on every slot.
#[derive(Debug, Clone)]
pub struct StrictZip<T> {
    name: String,
    slots: Vec<String>,
    queues: Vec<VecDeque<T>>,
}

impl<T> StrictZip<T> {
    /// Zip over `slots`, in slot order.
    pub fn new<I, S>(name: &str, slots: I) -> Result<Self, DataflowError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = slot_names(name, slots)?;
        let queues = slots.iter().map(|_| VecDeque::new()).collect();
        Ok(Self {
            name: name.to_string(),
            slots,
            queues,
        })
    }

    /// Values waiting on `slot` for their partners.
    pub fn pending(&self, slot: SlotId) -> usize {
        self.queues.get(slot.0).map_or(0, VecDeque::len)
    }
}

impl<T> Combinator for StrictZip<T> {
    type Input = T;
    type Output = Vec<T>;

    fn name(&self) -> &str {
        &self.name
    }

    fn slots(&self) -> &[String] {
        &self.slots
    }

    fn push(&mut self, slot: SlotId, value: T) -> Result<Vec<Vec<T>>, DataflowError> {
        let i = check_slot(&self.name, &self.slots, slot)?;
        self.queues[i].push_back(value);

        if self.queues.iter().any(VecDeque::is_empty) {
            return Ok(Vec::new());
        }
        let tuple: Vec<T> = self.queues.iter_mut().filter_map(VecDeque::pop_front).collect();
        trace!(node = %self.name, "zip emitted");
        Ok(vec![tuple])
    }

    fn reset(&mut self) {
        self.queues.iter_mut().for_each(VecDeque::clear);
    }
}
