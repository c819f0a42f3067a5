use serde::{Deserialize, Serialize};

use crate::model::Model;
use crate::state::VarTable;

/// Whether sampled species values are reported as amounts or as
/// concentrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    Amount,
    Concentration,
}

/// Caller-owned sample buffers, one slot group per sampled cycle: the
/// simulated time, then every species, parameter and compartment value
/// in model declaration order. Recording never alters simulation state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunRecorder {
    pub times: Vec<f64>,
    pub species: Vec<f64>,
    pub parameters: Vec<f64>,
    pub compartments: Vec<f64>,
}

impl RunRecorder {
    pub fn with_capacity(samples: usize, model: &Model) -> Self {
        Self {
            times: Vec::with_capacity(samples),
            species: Vec::with_capacity(samples * model.species.len()),
            parameters: Vec::with_capacity(samples * model.parameters.len()),
            compartments: Vec::with_capacity(samples * model.compartments.len()),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.times.len()
    }

    /// Species row of one sample.
    pub fn species_row(&self, sample: usize, model: &Model) -> &[f64] {
        let width = model.species.len();
        &self.species[sample * width..(sample + 1) * width]
    }

    /// Appends one record, converting species between amount and
    /// concentration against the owning compartment's current value.
    pub fn record(&mut self, model: &Model, vars: &VarTable, time: f64, mode: OutputMode) {
        self.times.push(time);
        for (id, species) in model.species.iter().enumerate() {
            let value = vars.state(model.species_var(id)).value;
            let volume = vars.state(model.compartment_var(species.compartment)).value;
            let converted = match mode {
                OutputMode::Amount if species.is_concentration => value * volume,
                OutputMode::Concentration if species.is_amount => value / volume,
                _ => value,
            };
            self.species.push(converted);
        }
        for id in 0..model.parameters.len() {
            self.parameters.push(vars.state(model.parameter_var(id)).value);
        }
        for id in 0..model.compartments.len() {
            self.compartments.push(vars.state(model.compartment_var(id)).value);
        }
    }
}
