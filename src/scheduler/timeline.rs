// src/scheduler/timeline.rs - Per-printer reservations
use std::collections::HashMap;

use crate::print_job::ScheduleSlot;

#[derive(Debug, Default)]
pub(crate) struct Timeline {
    slots: HashMap<String, Vec<ScheduleSlot>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reservation, keeping the printer's slots ordered by start.
    /// Slots on one printer never overlap: a conflicting reservation is
    /// refused and the slot already holding that time is returned.
    pub fn reserve(&mut self, slot: ScheduleSlot) -> Result<(), ScheduleSlot> {
        let slots = self.slots.entry(slot.printer_id.clone()).or_default();
        if let Some(existing) = slots.iter().find(|s| s.overlaps(&slot)) {
            return Err(existing.clone());
        }
        let at = slots.partition_point(|s| s.start_time <= slot.start_time);
        slots.insert(at, slot);
        Ok(())
    }

    /// Drops every slot held by `job_id`. Returns how many were removed.
    pub fn release(&mut self, job_id: &str) -> usize {
        let mut removed = 0;
        for slots in self.slots.values_mut() {
            let before = slots.len();
            slots.retain(|s| s.job_id != job_id);
            removed += before - slots.len();
        }
        self.slots.retain(|_, slots| !slots.is_empty());
        removed
    }

    pub fn confirm(&mut self, job_id: &str) {
        for slot in self.slots.values_mut().flatten() {
            if slot.job_id == job_id {
                slot.confirmed = true;
            }
        }
    }

    pub fn for_printer(&self, printer_id: &str) -> Vec<ScheduleSlot> {
        self.slots.get(printer_id).cloned().unwrap_or_default()
    }

    pub fn printer_count(&self) -> usize {
        self.slots.len()
    }
}
