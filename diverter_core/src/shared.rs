//! Hand-off cells between the sampling (interrupt) context and the
//! background context.
//!
//! Every cell has exactly one writer. Multi-field data goes through
//! [`DatalogMailbox`], a single-slot mailbox: the writer stores every field
//! and only then raises `ready` (release); the reader observes `ready`
//! (acquire), copies the fields and clears it. The writer never touches the
//! fields while `ready` is set, so a reader cannot see a torn snapshot; a
//! period that finds the slot still full is dropped and counted as an overrun.
//!
//! Single-word flags flow the other way: the background sets a request flag
//! and the sampling context consumes it at a cycle boundary.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, Ordering};

use crate::MAX_LOADS;

/// Accumulated measurements of one datalog period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatalogSnapshot {
    pub sum_p_grid: i64,
    pub sum_p_diverted: i64,
    pub sum_v_squared: i64,
    pub sample_sets: u32,
    pub lowest_sets_per_cycle: u32,
    pub bucket_level: i32,
    /// Mains cycles each physical load spent on during the period.
    pub load_on_cycles: [u32; MAX_LOADS],
    pub diverted_wh: u32,
}

impl Default for DatalogSnapshot {
    fn default() -> Self {
        Self {
            sum_p_grid: 0,
            sum_p_diverted: 0,
            sum_v_squared: 0,
            sample_sets: 0,
            lowest_sets_per_cycle: u32::MAX,
            bucket_level: 0,
            load_on_cycles: [0; MAX_LOADS],
            diverted_wh: 0,
        }
    }
}

/// Single-slot, flag-qualified mailbox for [`DatalogSnapshot`]s.
#[derive(Debug)]
pub struct DatalogMailbox {
    sum_p_grid: AtomicI64,
    sum_p_diverted: AtomicI64,
    sum_v_squared: AtomicI64,
    sample_sets: AtomicU32,
    lowest_sets_per_cycle: AtomicU32,
    bucket_level: AtomicI32,
    load_on_cycles: [AtomicU32; MAX_LOADS],
    diverted_wh: AtomicU32,
    ready: AtomicBool,
    overruns: AtomicU32,
}

impl Default for DatalogMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl DatalogMailbox {
    pub const fn new() -> Self {
        Self {
            sum_p_grid: AtomicI64::new(0),
            sum_p_diverted: AtomicI64::new(0),
            sum_v_squared: AtomicI64::new(0),
            sample_sets: AtomicU32::new(0),
            lowest_sets_per_cycle: AtomicU32::new(0),
            bucket_level: AtomicI32::new(0),
            load_on_cycles: [const { AtomicU32::new(0) }; MAX_LOADS],
            diverted_wh: AtomicU32::new(0),
            ready: AtomicBool::new(false),
            overruns: AtomicU32::new(0),
        }
    }

    /// Writer side. Returns `false` (and counts an overrun) when the previous
    /// snapshot has not been consumed yet.
    pub fn publish(&self, s: &DatalogSnapshot) -> bool {
        if self.ready.load(Ordering::Acquire) {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.sum_p_grid.store(s.sum_p_grid, Ordering::Relaxed);
        self.sum_p_diverted.store(s.sum_p_diverted, Ordering::Relaxed);
        self.sum_v_squared.store(s.sum_v_squared, Ordering::Relaxed);
        self.sample_sets.store(s.sample_sets, Ordering::Relaxed);
        self.lowest_sets_per_cycle
            .store(s.lowest_sets_per_cycle, Ordering::Relaxed);
        self.bucket_level.store(s.bucket_level, Ordering::Relaxed);
        for (cell, v) in self.load_on_cycles.iter().zip(s.load_on_cycles) {
            cell.store(v, Ordering::Relaxed);
        }
        self.diverted_wh.store(s.diverted_wh, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
        true
    }

    /// Reader side. Takes the pending snapshot, if any, and frees the slot.
    pub fn take(&self) -> Option<DatalogSnapshot> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let mut load_on_cycles = [0; MAX_LOADS];
        for (dst, cell) in load_on_cycles.iter_mut().zip(&self.load_on_cycles) {
            *dst = cell.load(Ordering::Relaxed);
        }
        let snapshot = DatalogSnapshot {
            sum_p_grid: self.sum_p_grid.load(Ordering::Relaxed),
            sum_p_diverted: self.sum_p_diverted.load(Ordering::Relaxed),
            sum_v_squared: self.sum_v_squared.load(Ordering::Relaxed),
            sample_sets: self.sample_sets.load(Ordering::Relaxed),
            lowest_sets_per_cycle: self.lowest_sets_per_cycle.load(Ordering::Relaxed),
            bucket_level: self.bucket_level.load(Ordering::Relaxed),
            load_on_cycles,
            diverted_wh: self.diverted_wh.load(Ordering::Relaxed),
        };
        self.ready.store(false, Ordering::Release);
        Some(snapshot)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Periods dropped because the reader was late.
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// All cells shared between the two contexts. Hold it in an `Arc`.
#[derive(Debug)]
pub struct SharedState {
    pub datalog: DatalogMailbox,

    // written by the sampling context
    cycles: AtomicU32,
    diversion_active: AtomicBool,
    absence_cycles: AtomicU32,
    diverted_wh: AtomicU32,
    output_faults: AtomicU32,

    // written by the background context
    overrides: [AtomicBool; MAX_LOADS],
    diversion_off: AtomicBool,
    rotate_request: AtomicBool,
    reset_diverted_request: AtomicBool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub const fn new() -> Self {
        Self {
            datalog: DatalogMailbox::new(),
            cycles: AtomicU32::new(0),
            diversion_active: AtomicBool::new(false),
            absence_cycles: AtomicU32::new(0),
            diverted_wh: AtomicU32::new(0),
            output_faults: AtomicU32::new(0),
            overrides: [const { AtomicBool::new(false) }; MAX_LOADS],
            diversion_off: AtomicBool::new(false),
            rotate_request: AtomicBool::new(false),
            reset_diverted_request: AtomicBool::new(false),
        }
    }

    // ── sampling-context side ────────────────────────────────────────────────

    /// Count one completed mains cycle (wrapping).
    pub fn tick_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Release);
    }

    pub fn publish_detector(&self, active: bool, absence_cycles: u32) {
        self.absence_cycles.store(absence_cycles, Ordering::Relaxed);
        self.diversion_active.store(active, Ordering::Release);
    }

    pub fn publish_diverted_wh(&self, wh: u32) {
        self.diverted_wh.store(wh, Ordering::Release);
    }

    pub fn add_output_faults(&self, n: u32) {
        self.output_faults.fetch_add(n, Ordering::Relaxed);
    }

    /// Consume a pending rotation request.
    pub fn take_rotation_request(&self) -> bool {
        self.rotate_request.swap(false, Ordering::AcqRel)
    }

    /// Consume a pending diverted-energy reset request.
    pub fn take_reset_diverted_request(&self) -> bool {
        self.reset_diverted_request.swap(false, Ordering::AcqRel)
    }

    /// Manual override flags indexed by physical load id.
    pub fn overrides(&self) -> [bool; MAX_LOADS] {
        let mut out = [false; MAX_LOADS];
        for (dst, cell) in out.iter_mut().zip(&self.overrides) {
            *dst = cell.load(Ordering::Acquire);
        }
        out
    }

    pub fn is_overridden(&self, id: usize) -> bool {
        self.overrides
            .get(id)
            .is_some_and(|c| c.load(Ordering::Acquire))
    }

    pub fn diversion_off(&self) -> bool {
        self.diversion_off.load(Ordering::Acquire)
    }

    // ── background side ──────────────────────────────────────────────────────

    pub fn cycles(&self) -> u32 {
        self.cycles.load(Ordering::Acquire)
    }

    pub fn diversion_active(&self) -> bool {
        self.diversion_active.load(Ordering::Acquire)
    }

    pub fn absence_cycles(&self) -> u32 {
        self.absence_cycles.load(Ordering::Relaxed)
    }

    pub fn diverted_wh(&self) -> u32 {
        self.diverted_wh.load(Ordering::Acquire)
    }

    pub fn output_faults(&self) -> u32 {
        self.output_faults.load(Ordering::Relaxed)
    }

    /// Returns `false` for an id outside the load table.
    pub fn set_override(&self, id: usize, on: bool) -> bool {
        match self.overrides.get(id) {
            Some(cell) => {
                cell.store(on, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn set_diversion_off(&self, off: bool) {
        self.diversion_off.store(off, Ordering::Release);
    }

    pub fn request_rotation(&self) {
        self.rotate_request.store(true, Ordering::Release);
    }

    pub fn rotation_pending(&self) -> bool {
        self.rotate_request.load(Ordering::Acquire)
    }

    pub fn request_diverted_reset(&self) {
        self.reset_diverted_request.store(true, Ordering::Release);
    }
}
