use std::cell::Cell;

use crate::expr::{EvalContext, ValueView, VarId};
use crate::model::{CompartmentId, Model, ParameterId, ReactionId, RuleKind, SpeciesId};

/// What a flat-table variable refers to in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Species(SpeciesId),
    Parameter(ParameterId),
    Compartment(CompartmentId),
    Stoichiometry(ReactionId),
}

/// Mutable per-variable simulation record.
///
/// `staged` is the candidate value for the cycle being computed and
/// becomes `value` when the cycle forwards. `k` holds the current-step
/// derivative estimate (slot 0) and the Runge-Kutta stages; `prev_k` and
/// `prev_val` are most-recent-first histories of the last three accepted
/// derivatives and values.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarState {
    pub value: f64,
    pub staged: f64,
    pub k: [f64; 4],
    pub prev_k: [f64; 3],
    pub prev_val: [f64; 3],
    /// Intermediate state for Runge-Kutta stage evaluations.
    pub scratch: f64,
}

#[derive(Debug, Clone, Copy)]
struct VarEntry {
    kind: VarKind,
    constant: bool,
    rule: Option<usize>,
    algebraic_target: bool,
}

/// Flat table of every simulation variable, in the single declaration
/// ordering shared with [`Model`]'s variable-id helpers.
#[derive(Debug, Default)]
pub struct VarTable {
    entries: Vec<VarEntry>,
    states: Vec<VarState>,
}

impl VarTable {
    pub fn push(&mut self, kind: VarKind, constant: bool, value: f64) -> VarId {
        self.entries.push(VarEntry {
            kind,
            constant,
            rule: None,
            algebraic_target: false,
        });
        self.states.push(VarState {
            value,
            staged: value,
            scratch: value,
            ..VarState::default()
        });
        self.states.len() - 1
    }

    /// Builds the table from a model: species, parameters, compartments,
    /// then stoichiometry references. Reference coefficients are
    /// evaluated against the freshly initialized state so their starting
    /// values reflect the declared expressions.
    pub fn build(model: &Model, step_size: f64, reverse_time: &Cell<f64>) -> Self {
        let mut table = Self::default();
        for (id, sp) in model.species.iter().enumerate() {
            table.push(VarKind::Species(id), sp.constant, sp.initial_value);
        }
        for (id, param) in model.parameters.iter().enumerate() {
            table.push(VarKind::Parameter(id), param.constant, param.value);
        }
        for (id, comp) in model.compartments.iter().enumerate() {
            table.push(VarKind::Compartment(id), comp.constant, comp.volume);
        }

        let mut reference_exprs = Vec::new();
        for (rid, reaction) in model.reactions.iter().enumerate() {
            for reference in reaction.reactants.iter().chain(&reaction.products) {
                table.push(VarKind::Stoichiometry(rid), true, 0.0);
                reference_exprs.push(reference.stoichiometry);
            }
        }

        for (idx, rule) in model.rules.iter().enumerate() {
            table.entries[rule.target].rule = Some(idx);
            // A rule-governed variable is not structurally constant.
            table.entries[rule.target].constant = false;
        }
        if let Some(system) = &model.algebraic {
            for target in &system.targets {
                table.entries[target.var].algebraic_target = true;
                table.entries[target.var].constant = false;
            }
        }

        let base = model.species.len() + model.parameters.len() + model.compartments.len();
        let ctx = EvalContext::plain(step_size, 0, 0.0, reverse_time);
        for (offset, expr) in reference_exprs.into_iter().enumerate() {
            let value = model.exprs.eval(expr, &table, &ctx);
            let state = &mut table.states[base + offset];
            state.value = value;
            state.staged = value;
            state.scratch = value;
        }

        table
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn kind(&self, var: VarId) -> VarKind {
        self.entries[var].kind
    }

    pub fn is_constant(&self, var: VarId) -> bool {
        self.entries[var].constant
    }

    pub fn rule(&self, var: VarId) -> Option<usize> {
        self.entries[var].rule
    }

    pub fn state(&self, var: VarId) -> &VarState {
        &self.states[var]
    }

    pub fn state_mut(&mut self, var: VarId) -> &mut VarState {
        &mut self.states[var]
    }

    pub fn read(&self, var: VarId, view: ValueView) -> f64 {
        let state = &self.states[var];
        match view {
            ValueView::Accepted => state.value,
            ValueView::StageScratch => state.scratch,
        }
    }

    /// Accepts the staged values of a group: staged becomes value.
    pub fn forward(&mut self, group: &[VarId]) {
        for &var in group {
            self.states[var].value = self.states[var].staged;
        }
    }

    /// Shifts the value and derivative histories of a group by one cycle,
    /// evicting the oldest entry.
    pub fn rotate_history(&mut self, group: &[VarId]) {
        for &var in group {
            let state = &mut self.states[var];
            state.prev_val[2] = state.prev_val[1];
            state.prev_val[1] = state.prev_val[0];
            state.prev_val[0] = state.value;
            state.prev_k[2] = state.prev_k[1];
            state.prev_k[1] = state.prev_k[0];
            state.prev_k[0] = state.k[0];
        }
    }
}

/// Immutable per-run variable classification, computed once before the
/// loop.
///
/// `all_vars` is everything not structurally constant; `ode_vars`
/// additionally excludes assignment-governed variables and algebraic
/// targets, leaving only what the explicit step engine advances.
#[derive(Debug, Default)]
pub struct VariableGroups {
    pub all_vars: Vec<VarId>,
    pub ode_vars: Vec<VarId>,
    pub is_ode: Vec<bool>,
}

pub fn classify(model: &Model, table: &VarTable) -> VariableGroups {
    let mut groups = VariableGroups {
        is_ode: vec![false; table.len()],
        ..VariableGroups::default()
    };
    for var in 0..table.len() {
        if table.is_constant(var) {
            continue;
        }
        groups.all_vars.push(var);
        let assigned = table
            .rule(var)
            .is_some_and(|idx| model.rules[idx].kind == RuleKind::Assignment);
        if !assigned && !table.entries[var].algebraic_target {
            groups.ode_vars.push(var);
            groups.is_ode[var] = true;
        }
    }
    groups
}

/// Destination slot for an assignment-rule sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentSlot {
    Staged,
    Scratch,
}

/// Recomputes every assignment-governed variable from its rule program.
/// Assignment targets are never advanced by the step engine; this sweep
/// is the only way their staged (or stage-scratch) value changes.
pub fn apply_assignment_rules(
    model: &Model,
    vars: &mut VarTable,
    ctx: &EvalContext<'_>,
    slot: AssignmentSlot,
) {
    for rule in &model.rules {
        if rule.kind != RuleKind::Assignment {
            continue;
        }
        let value = model.exprs.eval(rule.math, vars, ctx);
        let state = vars.state_mut(rule.target);
        match slot {
            AssignmentSlot::Staged => state.staged = value,
            AssignmentSlot::Scratch => state.scratch = value,
        }
    }
}
