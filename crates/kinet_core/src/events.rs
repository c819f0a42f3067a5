use crate::expr::{EvalContext, FreezeRecord};
use crate::model::Model;
use crate::state::VarTable;

/// Per-run trigger bookkeeping. Triggers fire on a false-to-true
/// transition only; a trigger already true when the loop starts must go
/// false before it can fire. Kept outside the model so the model stays
/// immutable during a run.
#[derive(Debug)]
pub struct EventRuntime {
    previously_true: Vec<bool>,
}

impl EventRuntime {
    pub fn new(num_events: usize) -> Self {
        Self {
            previously_true: vec![false; num_events],
        }
    }

    /// Records the trigger states at the end of setup without firing
    /// anything.
    pub fn arm(&mut self, model: &Model, vars: &VarTable, ctx: &EvalContext<'_>) {
        for (event, armed) in model.events.iter().zip(&mut self.previously_true) {
            *armed = model.exprs.eval(event.trigger, vars, ctx) > 0.0;
        }
    }

    /// Evaluates every trigger and applies the assignments of newly
    /// fired events. Assignments overwrite the target's accepted and
    /// staged values; time-variant assignments evaluate through the
    /// freeze record with the reverse-time slot holding the fire time.
    pub fn apply(
        &mut self,
        model: &Model,
        vars: &mut VarTable,
        ctx: &EvalContext<'_>,
        frozen: &FreezeRecord,
    ) {
        for (index, event) in model.events.iter().enumerate() {
            let now_true = model.exprs.eval(event.trigger, vars, ctx) > 0.0;
            let fired = now_true && !self.previously_true[index];
            self.previously_true[index] = now_true;
            if !fired {
                continue;
            }

            for assignment in &event.assignments {
                let value = if assignment.time_variant {
                    ctx.reverse_time.set(ctx.time);
                    let frozen_ctx = EvalContext {
                        frozen: Some(frozen),
                        ..*ctx
                    };
                    model.exprs.eval(assignment.math, vars, &frozen_ctx)
                } else {
                    model.exprs.eval(assignment.math, vars, ctx)
                };
                let state = vars.state_mut(assignment.target);
                state.value = value;
                state.staged = value;
            }
        }
    }
}
