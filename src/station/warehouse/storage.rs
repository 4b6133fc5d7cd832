use crate::types::{GRID_COLUMNS, GRID_ROWS, SlotId, Workpiece, WorkpieceType};

const ROWS: usize = GRID_ROWS as usize;
const COLUMNS: usize = GRID_COLUMNS as usize;

/// Occupancy of the 3x3 rack. Only the warehouse station mutates it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Storage {
    slots: [[Option<Workpiece>; COLUMNS]; ROWS],
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: SlotId) -> Option<&Workpiece> {
        self.slots[slot.row as usize][slot.column as usize].as_ref()
    }

    /// First empty slot in scan order.
    pub fn first_free(&self) -> Option<SlotId> {
        SlotId::scan_order().find(|slot| self.get(*slot).is_none())
    }

    /// First slot in scan order holding a workpiece of `kind`.
    pub fn find(&self, kind: WorkpieceType) -> Option<SlotId> {
        SlotId::scan_order().find(|slot| self.get(*slot).is_some_and(|wp| wp.kind == kind))
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().flatten().filter(|slot| slot.is_some()).count()
    }

    pub fn snapshot(&self) -> Vec<(SlotId, Option<Workpiece>)> {
        SlotId::scan_order()
            .map(|slot| (slot, self.get(slot).cloned()))
            .collect()
    }

    pub(super) fn put(&mut self, slot: SlotId, workpiece: Workpiece) {
        let cell = &mut self.slots[slot.row as usize][slot.column as usize];
        debug_assert!(cell.is_none(), "slot {slot} already occupied");
        *cell = Some(workpiece);
    }

    pub(super) fn take(&mut self, slot: SlotId) -> Option<Workpiece> {
        let taken = self.slots[slot.row as usize][slot.column as usize].take();
        debug_assert!(taken.is_some(), "slot {slot} was empty");
        taken
    }

    pub(super) fn clear(&mut self) {
        self.slots = Default::default();
    }
}
