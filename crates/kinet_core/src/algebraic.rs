use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::expr::{EvalContext, VarId};
use crate::model::{AlgebraicSystem, Model};
use crate::state::{VarKind, VarTable};

/// The one fatal condition of a run: the constraint matrix cannot be
/// inverted at the current cycle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlgebraicError {
    #[error("algebraic coefficient matrix is singular")]
    SingularSystem,
}

/// Owns the matrix and vector buffers for the per-cycle linear solve.
/// Constructed once before the loop and dropped after it.
#[derive(Debug)]
pub struct AlgebraicSolver {
    matrix: DMatrix<f64>,
    rhs: DVector<f64>,
}

impl AlgebraicSolver {
    pub fn new(unknowns: usize) -> Self {
        Self {
            matrix: DMatrix::zeros(unknowns, unknowns),
            rhs: DVector::zeros(unknowns),
        }
    }

    /// Evaluates the coefficient and constant programs at the current
    /// cycle and solves for the staged values of every target. Equations
    /// are stated as `matrix . x + constant = 0`, so the constant vector
    /// is negated before solving.
    pub fn solve(
        &mut self,
        system: &AlgebraicSystem,
        model: &Model,
        vars: &mut VarTable,
        ctx: &EvalContext<'_>,
    ) -> Result<(), AlgebraicError> {
        let n = system.unknowns();
        if n > 1 {
            for i in 0..n {
                for j in 0..n {
                    self.matrix[(i, j)] = model.exprs.eval(system.coefficients[i][j], vars, ctx);
                }
                self.rhs[i] = -model.exprs.eval(system.constants[i], vars, ctx);
            }
            // LU with row pivoting; a non-invertible matrix aborts the
            // run before any target is written.
            let solution = self
                .matrix
                .clone()
                .lu()
                .solve(&self.rhs)
                .ok_or(AlgebraicError::SingularSystem)?;
            for target in &system.targets {
                assign_target(model, vars, target.var, solution[target.order]);
            }
        } else {
            let coefficient = model.exprs.eval(system.coefficients[0][0], vars, ctx);
            if coefficient == 0.0 {
                return Err(AlgebraicError::SingularSystem);
            }
            let constant = model.exprs.eval(system.constants[0], vars, ctx);
            let solved = -constant / coefficient;
            assign_target(model, vars, system.targets[0].var, solved);
        }
        Ok(())
    }
}

/// Writes a solved unknown to its target's staged value. Compartment
/// targets first rescale their contained concentration species against
/// the volume change, keeping concentration times volume invariant.
fn assign_target(model: &Model, vars: &mut VarTable, var: VarId, solved: f64) {
    if let VarKind::Compartment(id) = vars.kind(var) {
        rescale_contained_species(model, vars, id, var, solved);
    }
    vars.state_mut(var).staged = solved;
}

fn rescale_contained_species(
    model: &Model,
    vars: &mut VarTable,
    compartment: crate::model::CompartmentId,
    compartment_var: VarId,
    new_volume: f64,
) {
    let old_volume = vars.state(compartment_var).staged;
    for &species in &model.compartments[compartment].species {
        if !model.species[species].is_concentration {
            continue;
        }
        let state = vars.state_mut(model.species_var(species));
        state.staged = state.staged * old_volume / new_volume;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::expr::{EvalContext, Program};
    use crate::model::{AlgebraicTarget, Compartment, Parameter, Species};

    fn solver_model(cells: [[f64; 2]; 2], constants: [f64; 2]) -> Model {
        let mut model = Model::new("linear");
        model.add_parameter(Parameter {
            name: "x".to_string(),
            value: 0.0,
            constant: false,
        });
        model.add_parameter(Parameter {
            name: "y".to_string(),
            value: 0.0,
            constant: false,
        });
        let coefficients = cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&cell| model.add_program(Program::constant(cell)))
                    .collect()
            })
            .collect();
        // Stored as matrix . x + constant = 0.
        let constants = constants
            .iter()
            .map(|&value| model.add_program(Program::constant(-value)))
            .collect();
        model.algebraic = Some(AlgebraicSystem {
            coefficients,
            constants,
            targets: vec![
                AlgebraicTarget {
                    order: 0,
                    var: model.parameter_var(0),
                },
                AlgebraicTarget {
                    order: 1,
                    var: model.parameter_var(1),
                },
            ],
        });
        model
    }

    #[test]
    fn known_two_by_two_system_solves() {
        let model = solver_model([[2.0, 1.0], [1.0, 3.0]], [5.0, 10.0]);
        let reverse_time = Cell::new(0.0);
        let mut vars = VarTable::build(&model, 0.1, &reverse_time);
        let ctx = EvalContext::plain(0.1, 0, 0.0, &reverse_time);

        let mut solver = AlgebraicSolver::new(2);
        let system = model.algebraic.as_ref().unwrap();
        solver
            .solve(system, &model, &mut vars, &ctx)
            .expect("system should solve");

        assert!((vars.state(0).staged - 1.0).abs() < 1e-9);
        assert!((vars.state(1).staged - 3.0).abs() < 1e-9);
    }

    #[test]
    fn singular_matrix_aborts_without_writing_targets() {
        let model = solver_model([[1.0, 2.0], [2.0, 4.0]], [1.0, 2.0]);
        let reverse_time = Cell::new(0.0);
        let mut vars = VarTable::build(&model, 0.1, &reverse_time);
        let ctx = EvalContext::plain(0.1, 0, 0.0, &reverse_time);

        let mut solver = AlgebraicSolver::new(2);
        let system = model.algebraic.as_ref().unwrap();
        let err = solver
            .solve(system, &model, &mut vars, &ctx)
            .expect_err("expected singular failure");

        assert_eq!(err, AlgebraicError::SingularSystem);
        assert!((vars.state(0).staged - 0.0).abs() < 1e-12);
        assert!((vars.state(1).staged - 0.0).abs() < 1e-12);
    }

    #[test]
    fn single_unknown_degenerates_to_division() {
        let mut model = Model::new("scalar");
        model.add_parameter(Parameter {
            name: "x".to_string(),
            value: 0.0,
            constant: false,
        });
        let coefficient = model.add_program(Program::constant(4.0));
        let constant = model.add_program(Program::constant(-2.0));
        model.algebraic = Some(AlgebraicSystem {
            coefficients: vec![vec![coefficient]],
            constants: vec![constant],
            targets: vec![AlgebraicTarget { order: 0, var: 0 }],
        });

        let reverse_time = Cell::new(0.0);
        let mut vars = VarTable::build(&model, 0.1, &reverse_time);
        let ctx = EvalContext::plain(0.1, 0, 0.0, &reverse_time);

        let mut solver = AlgebraicSolver::new(1);
        let system = model.algebraic.as_ref().unwrap();
        solver
            .solve(system, &model, &mut vars, &ctx)
            .expect("scalar system should solve");

        // x = -(-2) / 4
        assert!((vars.state(0).staged - 0.5).abs() < 1e-12);
    }

    #[test]
    fn compartment_target_rescales_contained_concentrations() {
        let mut model = Model::new("rescale");
        let c = model.add_compartment(Compartment {
            name: "cell".to_string(),
            volume: 2.0,
            constant: false,
            species: Vec::new(),
        });
        let s = model.add_species(Species {
            name: "A".to_string(),
            initial_value: 3.0,
            is_concentration: true,
            is_amount: false,
            boundary_condition: false,
            constant: false,
            compartment: c,
        });
        let coefficient = model.add_program(Program::constant(1.0));
        let constant = model.add_program(Program::constant(-4.0));
        model.algebraic = Some(AlgebraicSystem {
            coefficients: vec![vec![coefficient]],
            constants: vec![constant],
            targets: vec![AlgebraicTarget {
                order: 0,
                var: model.compartment_var(c),
            }],
        });

        let reverse_time = Cell::new(0.0);
        let mut vars = VarTable::build(&model, 0.1, &reverse_time);
        let ctx = EvalContext::plain(0.1, 0, 0.0, &reverse_time);

        let mut solver = AlgebraicSolver::new(1);
        let system = model.algebraic.as_ref().unwrap();
        solver
            .solve(system, &model, &mut vars, &ctx)
            .expect("scalar system should solve");

        // Volume moves 2 -> 4; concentration halves so the contained
        // amount (concentration * volume) is preserved.
        let species_var = model.species_var(s);
        let compartment_var = model.compartment_var(c);
        assert!((vars.state(compartment_var).staged - 4.0).abs() < 1e-12);
        assert!((vars.state(species_var).staged - 1.5).abs() < 1e-12);
        let amount_before = 3.0 * 2.0;
        let amount_after = vars.state(species_var).staged * vars.state(compartment_var).staged;
        assert!((amount_before - amount_after).abs() < 1e-12);
    }
}
