use std::cell::Cell;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::delay::DelayContext;
use crate::expr::{EvalContext, ValueView};
use crate::model::{Model, RuleKind};
use crate::state::{apply_assignment_rules, AssignmentSlot, VarTable, VariableGroups};

/// Adams-Bashforth coefficient rows, indexed by order. Row 0 is forward
/// Euler; each row sums to 1.
pub const ADAMS_BASHFORTH: [[f64; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [3.0 / 2.0, -1.0 / 2.0, 0.0, 0.0],
    [23.0 / 12.0, -16.0 / 12.0, 5.0 / 12.0, 0.0],
    [55.0 / 24.0, -59.0 / 24.0, 37.0 / 24.0, -9.0 / 24.0],
];

/// Blends the current derivative with up to three history entries using
/// the coefficient row of the given order.
pub fn explicit_formula(order: usize, k1: f64, k2: f64, k3: f64, k4: f64) -> f64 {
    let row = &ADAMS_BASHFORTH[order];
    row[0] * k1 + row[1] * k2 + row[2] * k3 + row[3] * k4
}

/// Integration mode, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationScheme {
    RungeKutta4,
    /// Explicit multistep of the given order (0 through 3).
    AdamsBashforth(usize),
}

impl IntegrationScheme {
    /// Maps the run-parameter order to a scheme: 0-3 select the
    /// multistep formulas, 4 selects Runge-Kutta.
    pub fn from_order(order: u32) -> Result<Self> {
        match order {
            4 => Ok(Self::RungeKutta4),
            o @ 0..=3 => Ok(Self::AdamsBashforth(o as usize)),
            other => bail!("unsupported integration order {other}; expected 0 through 4"),
        }
    }
}

/// Evaluates the derivative of every pure-ODE variable into stage slot
/// `stage`: reaction contributions (stoichiometry times kinetic law,
/// reactants negative, products positive) plus rate rules. Fast
/// reactions are resolved instantaneously elsewhere and never
/// integrated; boundary-condition species take no mass balance.
pub fn eval_derivatives(
    model: &Model,
    vars: &mut VarTable,
    groups: &VariableGroups,
    stage: usize,
    ctx: &EvalContext<'_>,
) {
    for &var in &groups.ode_vars {
        vars.state_mut(var).k[stage] = 0.0;
    }

    for reaction in &model.reactions {
        if reaction.fast {
            continue;
        }
        let rate = model.exprs.eval(reaction.kinetic_law, vars, ctx);
        for reference in &reaction.reactants {
            let var = model.species_var(reference.species);
            if model.species[reference.species].boundary_condition || !groups.is_ode[var] {
                continue;
            }
            let coefficient = model.exprs.eval(reference.stoichiometry, vars, ctx);
            vars.state_mut(var).k[stage] -= coefficient * rate;
        }
        for reference in &reaction.products {
            let var = model.species_var(reference.species);
            if model.species[reference.species].boundary_condition || !groups.is_ode[var] {
                continue;
            }
            let coefficient = model.exprs.eval(reference.stoichiometry, vars, ctx);
            vars.state_mut(var).k[stage] += coefficient * rate;
        }
    }

    for rule in &model.rules {
        if rule.kind != RuleKind::Rate {
            continue;
        }
        let value = model.exprs.eval(rule.math, vars, ctx);
        vars.state_mut(rule.target).k[stage] = value;
    }
}

/// Stages the multistep update: staged = value + dt * (coefficient row
/// dotted with the derivative history).
pub fn advance_adams_bashforth(
    vars: &mut VarTable,
    groups: &VariableGroups,
    order: usize,
    step_size: f64,
) {
    for &var in &groups.ode_vars {
        let state = *vars.state(var);
        let blend = explicit_formula(
            order,
            state.k[0],
            state.prev_k[0],
            state.prev_k[1],
            state.prev_k[2],
        );
        vars.state_mut(var).staged = state.value + blend * step_size;
    }
}

/// One four-stage Runge-Kutta step: k1 at t, k2 and k3 at t + dt/2, k4
/// at t + dt, combined with weights 1, 2, 2, 1 scaled by dt/6.
/// Assignment-governed variables are refreshed from their rules against
/// the stage scratch state before every derivative evaluation so kinetic
/// laws see consistent intermediates.
#[allow(clippy::too_many_arguments)]
pub fn rk4_step(
    model: &Model,
    vars: &mut VarTable,
    groups: &VariableGroups,
    cycle: usize,
    step_size: f64,
    time: f64,
    delays: &DelayContext,
    reverse_time: &Cell<f64>,
) {
    let ctx = |t: f64, view: ValueView| EvalContext {
        step_size,
        cycle,
        time: t,
        view,
        frozen: None,
        delays: Some(delays),
        reverse_time,
    };
    let half = 0.5 * step_size;

    eval_derivatives(model, vars, groups, 0, &ctx(time, ValueView::Accepted));

    prepare_stage(vars, groups, half, 0);
    apply_assignment_rules(
        model,
        vars,
        &ctx(time + half, ValueView::StageScratch),
        AssignmentSlot::Scratch,
    );
    eval_derivatives(
        model,
        vars,
        groups,
        1,
        &ctx(time + half, ValueView::StageScratch),
    );

    prepare_stage(vars, groups, half, 1);
    apply_assignment_rules(
        model,
        vars,
        &ctx(time + half, ValueView::StageScratch),
        AssignmentSlot::Scratch,
    );
    eval_derivatives(
        model,
        vars,
        groups,
        2,
        &ctx(time + half, ValueView::StageScratch),
    );

    prepare_stage(vars, groups, step_size, 2);
    apply_assignment_rules(
        model,
        vars,
        &ctx(time + step_size, ValueView::StageScratch),
        AssignmentSlot::Scratch,
    );
    eval_derivatives(
        model,
        vars,
        groups,
        3,
        &ctx(time + step_size, ValueView::StageScratch),
    );

    let sixth = step_size / 6.0;
    for &var in &groups.ode_vars {
        let state = *vars.state(var);
        vars.state_mut(var).staged = state.value
            + sixth * (state.k[0] + 2.0 * state.k[1] + 2.0 * state.k[2] + state.k[3]);
    }
}

/// Rebuilds the stage scratch state: everything starts from its accepted
/// value, then pure-ODE variables are displaced along the previous stage
/// derivative.
fn prepare_stage(vars: &mut VarTable, groups: &VariableGroups, weight: f64, prev_stage: usize) {
    for var in 0..vars.len() {
        let state = vars.state_mut(var);
        state.scratch = state.value;
    }
    for &var in &groups.ode_vars {
        let state = vars.state_mut(var);
        state.scratch = state.value + weight * state.k[prev_stage];
    }
}
