//! Priority-ordered, hysteretic load dispatcher.
//!
//! Loads live in a fixed-capacity array of priority slots; slot 0 has the
//! highest priority. Each slot carries the physical load it currently maps to
//! and its logical on/off bit. Rotation moves slots (id and state together),
//! never flips a state.
//!
//! Once per mains cycle, at the arming point of the negative half, the
//! dispatcher compares the bucket prediction with two thresholds:
//! - the threshold on the far side of the midpoint is reset to the midpoint
//! - above the midpoint and above `upper`, one load is added
//! - below the midpoint and below `lower`, one load is removed
//!
//! After any toggle a lockout holds for `max_count` cycles. During it only
//! the load that just toggled may toggle again, and the threshold on the
//! prediction's side follows the prediction (clamped to the bucket range).

use crate::MAX_LOADS;

/// One priority slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogicalLoad {
    /// Index of the physical load (into the configured load pins).
    pub physical_id: u8,
    pub on: bool,
}

/// Post-transition lockout state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lockout {
    /// Slot that toggled last.
    pub active_slot: usize,
    pub recent_transition: bool,
    pub cycle_count: u8,
}

/// Outcome of one dispatch evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Prediction within the thresholds; nothing to do.
    Hold,
    /// Slot switched on.
    Added(usize),
    /// Slot switched off.
    Removed(usize),
    /// A toggle was wanted but another load is still in its lockout.
    Deferred(usize),
    /// A toggle was wanted but every load is already in the requested state.
    Saturated,
}

#[derive(Debug, Clone)]
pub struct LoadDispatcher {
    slots: [LogicalLoad; MAX_LOADS],
    len: usize,
    capacity: i32,
    midpoint: i32,
    lower: i32,
    upper: i32,
    lockout: Lockout,
    max_count: u8,
    physical: [bool; MAX_LOADS],
}

impl LoadDispatcher {
    /// `loads` loads in startup priority order (slot i maps to physical load
    /// i), all off. `loads` is clamped to `1..=MAX_LOADS`.
    pub fn new(loads: usize, capacity: i32, max_count: u8) -> Self {
        let len = loads.clamp(1, MAX_LOADS);
        let mut slots = [LogicalLoad::default(); MAX_LOADS];
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.physical_id = i as u8;
        }
        let midpoint = capacity >> 1;
        Self {
            slots,
            len,
            capacity,
            midpoint,
            lower: midpoint,
            upper: midpoint,
            lockout: Lockout::default(),
            max_count: max_count.max(1),
            physical: [false; MAX_LOADS],
        }
    }

    /// First `Off` slot in ascending priority order.
    pub fn next_load_to_add(&self) -> Option<usize> {
        self.slots().iter().position(|s| !s.on)
    }

    /// First `On` slot in descending priority order.
    pub fn next_load_to_remove(&self) -> Option<usize> {
        self.slots().iter().rposition(|s| s.on)
    }

    /// Advance the lockout by one cycle.
    pub fn decay_lockout(&mut self) {
        if self.lockout.recent_transition {
            self.lockout.cycle_count = self.lockout.cycle_count.saturating_add(1);
            if self.lockout.cycle_count >= self.max_count {
                self.lockout.recent_transition = false;
            }
        }
    }

    /// Full per-cycle evaluation: lockout decay, threshold maintenance and
    /// at most one add or remove.
    pub fn dispatch(&mut self, prediction: i32) -> DispatchDecision {
        self.decay_lockout();

        if prediction > self.midpoint {
            self.lower = self.midpoint;
            if prediction > self.upper {
                return self.add_load(prediction);
            }
        } else {
            self.upper = self.midpoint;
            if prediction < self.lower {
                return self.remove_load(prediction);
            }
        }
        DispatchDecision::Hold
    }

    /// Try to switch on the next load. Does not decay the lockout.
    pub fn add_load(&mut self, prediction: i32) -> DispatchDecision {
        let Some(slot) = self.next_load_to_add() else {
            return DispatchDecision::Saturated;
        };
        if self.lockout.recent_transition {
            self.upper = prediction.min(self.capacity);
            if slot != self.lockout.active_slot {
                return DispatchDecision::Deferred(slot);
            }
        }
        self.slots[slot].on = true;
        self.enter_lockout(slot);
        tracing::debug!(slot, prediction, "load added");
        DispatchDecision::Added(slot)
    }

    /// Try to switch off the next load. Does not decay the lockout.
    pub fn remove_load(&mut self, prediction: i32) -> DispatchDecision {
        let Some(slot) = self.next_load_to_remove() else {
            return DispatchDecision::Saturated;
        };
        if self.lockout.recent_transition {
            self.lower = prediction.max(0);
            if slot != self.lockout.active_slot {
                return DispatchDecision::Deferred(slot);
            }
        }
        self.slots[slot].on = false;
        self.enter_lockout(slot);
        tracing::debug!(slot, prediction, "load removed");
        DispatchDecision::Removed(slot)
    }

    fn enter_lockout(&mut self, slot: usize) {
        self.lockout = Lockout {
            active_slot: slot,
            recent_transition: true,
            cycle_count: 0,
        };
    }

    /// Rotate priorities: the lowest-priority slot moves to the top, every
    /// other slot moves down one place. States travel with their loads.
    pub fn rotate(&mut self) {
        self.slots[..self.len].rotate_right(1);
        tracing::debug!(order = ?self.priority_order(), "load priorities rotated");
    }

    /// Recompute physical states from the logical bits, the per-load manual
    /// overrides (indexed by physical id) and the global disable flag.
    pub fn apply_physical(&mut self, overrides: &[bool], diversion_off: bool) -> &[bool] {
        for slot in &self.slots[..self.len] {
            let id = usize::from(slot.physical_id);
            let forced = overrides.get(id).copied().unwrap_or(false);
            self.physical[id] = !diversion_off && (forced || slot.on);
        }
        &self.physical[..self.len]
    }

    /// Physical states computed by the last `apply_physical`.
    pub fn physical(&self) -> &[bool] {
        &self.physical[..self.len]
    }

    pub fn slots(&self) -> &[LogicalLoad] {
        &self.slots[..self.len]
    }

    /// Physical ids in current priority order.
    pub fn priority_order(&self) -> Vec<u8> {
        self.slots().iter().map(|s| s.physical_id).collect()
    }

    /// Force the logical states, in slot order. Extra entries are ignored.
    pub fn set_states(&mut self, on: &[bool]) {
        for (slot, &state) in self.slots[..self.len].iter_mut().zip(on) {
            slot.on = state;
        }
    }

    pub fn load_count(&self) -> usize {
        self.len
    }

    pub fn lockout(&self) -> Lockout {
        self.lockout
    }

    pub fn is_locked_out(&self) -> bool {
        self.lockout.recent_transition
    }

    pub fn lower_threshold(&self) -> i32 {
        self.lower
    }

    pub fn upper_threshold(&self) -> i32 {
        self.upper
    }

    pub fn midpoint(&self) -> i32 {
        self.midpoint
    }
}
