use crate::expr::VarId;
use crate::state::VarTable;

/// Rolling per-variable value history backing delayed terms.
///
/// Before the cycle loop the buffer only carries the t = 0 baseline;
/// the final setup call arms the full-length table that `record` fills
/// once per cycle. Lookups round the shifted time to the nearest cycle
/// and clamp to the recorded range, so times at or before zero read the
/// baseline.
#[derive(Debug)]
pub struct DelayContext {
    step_size: f64,
    baseline: Vec<f64>,
    rows: Vec<Vec<f64>>,
    capacity: usize,
    armed: bool,
}

impl DelayContext {
    pub fn new(num_vars: usize, end_cycle: usize, step_size: f64) -> Self {
        Self {
            step_size,
            baseline: vec![0.0; num_vars],
            rows: Vec::new(),
            capacity: end_cycle + 1,
            armed: false,
        }
    }

    /// Re-reads the t = 0 baseline from the current accepted values.
    /// With `main_loop` set, additionally clears and reserves the rolling
    /// table for the cycle loop.
    pub fn initialize(&mut self, vars: &VarTable, main_loop: bool) {
        for (var, slot) in self.baseline.iter_mut().enumerate() {
            *slot = vars.state(var).value;
        }
        if main_loop {
            self.rows.clear();
            self.rows.reserve(self.capacity);
            self.armed = true;
        }
    }

    /// Appends the accepted values of the given cycle.
    pub fn record(&mut self, vars: &VarTable, cycle: usize) {
        if !self.armed {
            return;
        }
        debug_assert_eq!(self.rows.len(), cycle);
        let row = (0..vars.len()).map(|var| vars.state(var).value).collect();
        self.rows.push(row);
    }

    /// Value of `var` at the shifted time, nearest-cycle, clamped.
    pub fn lookup(&self, var: VarId, shifted_time: f64) -> f64 {
        if shifted_time <= 0.0 || self.rows.is_empty() {
            return self.baseline[var];
        }
        let cycle = (shifted_time / self.step_size).round() as usize;
        let cycle = cycle.min(self.rows.len() - 1);
        self.rows[cycle][var]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{VarKind, VarTable};

    fn single_var_table(value: f64) -> VarTable {
        let mut table = VarTable::default();
        table.push(VarKind::Parameter(0), false, value);
        table
    }

    #[test]
    fn lookup_before_history_reads_baseline() {
        let table = single_var_table(7.0);
        let mut delays = DelayContext::new(1, 10, 0.1);
        delays.initialize(&table, false);
        assert!((delays.lookup(0, -0.5) - 7.0).abs() < 1e-12);
        assert!((delays.lookup(0, 0.0) - 7.0).abs() < 1e-12);
        // Nothing recorded yet: positive times clamp to the baseline too.
        assert!((delays.lookup(0, 0.3) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn record_and_lookup_round_to_nearest_cycle() {
        let mut table = single_var_table(0.0);
        let mut delays = DelayContext::new(1, 10, 0.1);
        delays.initialize(&table, true);
        for cycle in 0..5 {
            table.state_mut(0).value = cycle as f64;
            delays.record(&table, cycle);
        }
        assert!((delays.lookup(0, 0.2) - 2.0).abs() < 1e-12);
        assert!((delays.lookup(0, 0.31) - 3.0).abs() < 1e-12);
        // Beyond the recorded range clamps to the newest row.
        assert!((delays.lookup(0, 2.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn recording_is_inert_until_armed() {
        let table = single_var_table(1.0);
        let mut delays = DelayContext::new(1, 10, 0.1);
        delays.initialize(&table, false);
        delays.record(&table, 0);
        assert!((delays.lookup(0, 0.5) - 1.0).abs() < 1e-12);
    }
}
