use crate::types::SlotTime;
use std::collections::{BTreeSet, HashSet};

/// The instants one professor has open for booking, kept in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotSet {
    slots: BTreeSet<SlotTime>,
}

impl SlotSet {
    /// Merges `slots` into the set and returns how many were new.
    pub fn add_slots(&mut self, slots: impl IntoIterator<Item = SlotTime>) -> usize {
        slots
            .into_iter()
            .filter(|slot| self.slots.insert(*slot))
            .count()
    }

    /// Returns whether `slot` was present. Absence is not an error.
    pub fn remove_slot(&mut self, slot: SlotTime) -> bool {
        self.slots.remove(&slot)
    }

    pub fn contains(&self, slot: SlotTime) -> bool {
        self.slots.contains(&slot)
    }

    pub fn to_vec(&self) -> Vec<SlotTime> {
        self.slots.iter().copied().collect()
    }

    /// Slots of this set that are not in `booked`, ascending.
    pub fn free_slots(&self, booked: &HashSet<SlotTime>) -> Vec<SlotTime> {
        self.slots
            .iter()
            .filter(|slot| !booked.contains(slot))
            .copied()
            .collect()
    }
}

impl FromIterator<SlotTime> for SlotSet {
    fn from_iter<I: IntoIterator<Item = SlotTime>>(iter: I) -> Self {
        let mut set = SlotSet::default();
        set.add_slots(iter);
        set
    }
}
