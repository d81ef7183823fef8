//! In-flight bookkeeping: an arena of deposits indexed by [`TaskId`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::error::{Error, Result};

/// Handle for one in-flight submission.
///
/// Slots are reused once accepted; the generation tells reuses apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<D> {
    generation: u32,
    deposit: Option<D>,
}

/// Deposits of every item submitted and not yet accepted.
///
/// At most `max_slots` items (`u32::MAX` by default) can be in flight at once.
#[derive(Debug)]
pub(crate) struct Registry<T, D> {
    slots: Vec<Slot<D>>,
    free: Vec<u32>,
    by_item: HashMap<T, TaskId>,
    max_slots: u32,
}

impl<T: Eq + Hash, D> Registry<T, D> {
    pub(crate) fn new() -> Self {
        Self::with_max_slots(u32::MAX)
    }

    pub(crate) fn with_max_slots(max_slots: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_item: HashMap::new(),
            max_slots,
        }
    }

    pub(crate) fn contains(&self, item: &T) -> bool {
        self.by_item.contains_key(item)
    }

    /// Record a deposit. The caller has checked the item is not live.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when every slot is taken.
    pub(crate) fn insert(&mut self, item: T, deposit: D) -> Result<TaskId> {
        let task = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.deposit = Some(deposit);
                TaskId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .ok()
                    .filter(|&index| index < self.max_slots)
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "more than {} items in flight",
                            self.max_slots
                        ))
                    })?;
                self.slots.push(Slot {
                    generation: 0,
                    deposit: Some(deposit),
                });
                TaskId {
                    index,
                    generation: 0,
                }
            }
        };
        self.by_item.insert(item, task);
        Ok(task)
    }

    /// Swap the deposit of a live item, returning the old one.
    pub(crate) fn replace(&mut self, item: &T, deposit: D) -> Option<D> {
        let task = *self.by_item.get(item)?;
        let slot = self.slots.get_mut(task.index as usize)?;
        slot.deposit.replace(deposit)
    }

    /// Drop the record for `task`, returning its deposit.
    pub(crate) fn remove(&mut self, task: TaskId, item: &T) -> Option<D> {
        let slot = self.slots.get_mut(task.index as usize)?;
        if slot.generation != task.generation {
            return None;
        }
        let deposit = slot.deposit.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(task.index);
        self.by_item.remove(item);
        Some(deposit)
    }
}
