use std::cell::Cell;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::algebraic::AlgebraicSolver;
use crate::delay::DelayContext;
use crate::events::EventRuntime;
use crate::expr::{EvalContext, FreezeRecord, ValueView};
use crate::fast::resolve_fast_reactions;
use crate::model::Model;
use crate::output::{OutputMode, RunRecorder};
use crate::state::{apply_assignment_rules, classify, AssignmentSlot, VarTable};
use crate::stepper::{advance_adams_bashforth, eval_derivatives, rk4_step, IntegrationScheme};

/// Run parameters. The step size is fixed for the whole run; `order`
/// selects the integration scheme (0 through 3 for the multistep
/// formulas, 4 for Runge-Kutta).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Settings {
    pub duration: f64,
    pub step_size: f64,
    /// Sampling interval, in cycles.
    pub sample_interval: usize,
    pub order: u32,
    pub output_mode: OutputMode,
}

/// Index of the last simulated cycle.
pub fn end_cycle(duration: f64, step_size: f64) -> usize {
    (duration / step_size).round() as usize
}

/// Simulates the model over the requested duration, sampling into the
/// caller-owned recorder. The only mid-run abort is an unsolvable
/// algebraic constraint system.
pub fn run(model: &Model, settings: &Settings, recorder: &mut RunRecorder) -> Result<()> {
    drive(model, settings, recorder).map(|_| ())
}

fn ctx<'a>(
    step_size: f64,
    cycle: usize,
    time: f64,
    delays: &'a DelayContext,
    reverse_time: &'a Cell<f64>,
) -> EvalContext<'a> {
    EvalContext {
        step_size,
        cycle,
        time,
        view: ValueView::Accepted,
        frozen: None,
        delays: Some(delays),
        reverse_time,
    }
}

fn drive(model: &Model, settings: &Settings, recorder: &mut RunRecorder) -> Result<VarTable> {
    if settings.step_size <= 0.0 {
        bail!("step size must be positive, got {}", settings.step_size);
    }
    if settings.duration < 0.0 {
        bail!("duration must not be negative, got {}", settings.duration);
    }
    if settings.sample_interval == 0 {
        bail!("sample interval must be at least one cycle");
    }
    let scheme = IntegrationScheme::from_order(settings.order)?;
    let dt = settings.step_size;
    let last_cycle = end_cycle(settings.duration, dt);

    let reverse_time = Cell::new(0.0);
    let mut vars = VarTable::build(model, dt, &reverse_time);
    let groups = classify(model, &vars);
    let mut delays = DelayContext::new(vars.len(), last_cycle, dt);
    let mut events = EventRuntime::new(model.events.len());
    let mut solver = model
        .algebraic
        .as_ref()
        .map(|system| AlgebraicSolver::new(system.unknowns()));

    info!("simulation for [{}] starts", model.name);

    // Setup: resolve the t = 0 state to a fixed point. Later phases
    // assume every assignment-governed temporary is already consistent,
    // so the sweeps and delay initializations repeat deliberately.
    delays.initialize(&vars, false);

    apply_assignment_rules(
        model,
        &mut vars,
        &ctx(dt, 0, 0.0, &delays, &reverse_time),
        AssignmentSlot::Staged,
    );
    vars.forward(&groups.all_vars);

    delays.initialize(&vars, false);

    for assignment in &model.initial_assignments {
        let value = model.exprs.eval(
            assignment.math,
            &vars,
            &ctx(dt, 0, 0.0, &delays, &reverse_time),
        );
        let state = vars.state_mut(assignment.target);
        state.value = value;
        state.staged = value;
    }
    // Freeze once, after the initial assignments have settled: later
    // mutation of the source variables must not leak into these
    // programs.
    let frozen = {
        let programs = model
            .initial_assignments
            .iter()
            .map(|assignment| model.exprs.program(assignment.math))
            .chain(
                model
                    .time_variant_assignments
                    .iter()
                    .map(|&expr| model.exprs.program(expr)),
            );
        FreezeRecord::capture(programs, &vars)
    };

    apply_assignment_rules(
        model,
        &mut vars,
        &ctx(dt, 0, 0.0, &delays, &reverse_time),
        AssignmentSlot::Staged,
    );
    vars.forward(&groups.all_vars);

    if let (Some(system), Some(solver)) = (model.algebraic.as_ref(), solver.as_mut()) {
        solver
            .solve(
                system,
                model,
                &mut vars,
                &ctx(dt, 0, 0.0, &delays, &reverse_time),
            )
            .context("algebraic constraints unsolvable at the initial state")?;
        vars.forward(&groups.all_vars);
    }

    delays.initialize(&vars, true);
    events.arm(model, &vars, &ctx(dt, 0, 0.0, &delays, &reverse_time));

    let progress_stride = (last_cycle / 10).max(1);
    for cycle in 0..=last_cycle {
        let now = cycle as f64 * dt;
        let next = (cycle + 1) as f64 * dt;

        resolve_fast_reactions(
            model,
            &mut vars,
            &ctx(dt, cycle, now, &delays, &reverse_time),
        );
        events.apply(
            model,
            &mut vars,
            &ctx(dt, cycle, now, &delays, &reverse_time),
            &frozen,
        );
        delays.record(&vars, cycle);

        if cycle % progress_stride == 0 {
            debug!(
                "cycle {cycle}/{last_cycle} ({:3.0} %)",
                100.0 * cycle as f64 / last_cycle.max(1) as f64
            );
        }
        if cycle % settings.sample_interval == 0 {
            recorder.record(model, &vars, now, settings.output_mode);
        }

        match scheme {
            IntegrationScheme::RungeKutta4 => {
                rk4_step(
                    model,
                    &mut vars,
                    &groups,
                    cycle,
                    dt,
                    now,
                    &delays,
                    &reverse_time,
                );
            }
            IntegrationScheme::AdamsBashforth(order) => {
                eval_derivatives(
                    model,
                    &mut vars,
                    &groups,
                    0,
                    &ctx(dt, cycle, now, &delays, &reverse_time),
                );
                advance_adams_bashforth(&mut vars, &groups, order, dt);
            }
        }
        // Staged values describe the state being stepped to, so
        // assignment rules and algebraic constraints evaluate there.
        apply_assignment_rules(
            model,
            &mut vars,
            &ctx(dt, cycle, next, &delays, &reverse_time),
            AssignmentSlot::Staged,
        );

        if let (Some(system), Some(solver)) = (model.algebraic.as_ref(), solver.as_mut()) {
            solver
                .solve(
                    system,
                    model,
                    &mut vars,
                    &ctx(dt, cycle, next, &delays, &reverse_time),
                )
                .with_context(|| format!("algebraic constraints unsolvable at cycle {cycle}"))?;
        }

        vars.rotate_history(&groups.ode_vars);
        vars.forward(&groups.all_vars);
    }

    info!("simulation for [{}] ends", model.name);
    Ok(vars)
}
