use crate::expr::EvalContext;
use crate::model::{Model, Reaction};
use crate::state::VarTable;

/// Resolves every fast reaction against the currently accepted values,
/// irreversible reactions first. Fast reactions settle within the cycle,
/// so results land in both the accepted and staged slots.
pub fn resolve_fast_reactions(model: &Model, vars: &mut VarTable, ctx: &EvalContext<'_>) {
    for reaction in &model.reactions {
        if reaction.fast && !reaction.reversible {
            resolve_irreversible(model, reaction, vars, ctx);
        }
    }
    for reaction in &model.reactions {
        if reaction.fast && reaction.reversible {
            resolve_reversible(model, reaction, vars, ctx);
        }
    }
}

/// Limiting-reagent resolution: the reaction extent is bounded by the
/// scarcest reactant relative to its stoichiometric coefficient, so no
/// reactant can go negative. Boundary-condition species are externally
/// buffered and left untouched. A rate at or below zero skips the
/// reaction for this cycle.
fn resolve_irreversible(
    model: &Model,
    reaction: &Reaction,
    vars: &mut VarTable,
    ctx: &EvalContext<'_>,
) {
    if model.exprs.eval(reaction.kinetic_law, vars, ctx) <= 0.0 {
        return;
    }

    let mut extent = f64::MAX;
    for reference in &reaction.reactants {
        let coefficient = model.exprs.eval(reference.stoichiometry, vars, ctx);
        let bound = vars.state(model.species_var(reference.species)).value / coefficient;
        if bound < extent {
            extent = bound;
        }
    }

    for reference in &reaction.products {
        if model.species[reference.species].boundary_condition {
            continue;
        }
        let credit = model.exprs.eval(reference.stoichiometry, vars, ctx) * extent;
        let state = vars.state_mut(model.species_var(reference.species));
        state.value += credit;
        state.staged = state.value;
    }
    for reference in &reaction.reactants {
        if model.species[reference.species].boundary_condition {
            continue;
        }
        let debit = model.exprs.eval(reference.stoichiometry, vars, ctx) * extent;
        let state = vars.state_mut(model.species_var(reference.species));
        state.value -= debit;
        state.staged = state.value;
    }
}

/// Equilibrium resolution for a reversible fast reaction over its single
/// reactant/product pair. A boundary-buffered side pins the other side
/// through the weight ratio; otherwise the pooled total of both prior
/// values is split proportionally to each side's weight.
fn resolve_reversible(
    model: &Model,
    reaction: &Reaction,
    vars: &mut VarTable,
    ctx: &EvalContext<'_>,
) {
    let (Some(reactant), Some(product)) = (reaction.reactants.first(), reaction.products.first())
    else {
        return;
    };
    let reactant_boundary = model.species[reactant.species].boundary_condition;
    let product_boundary = model.species[product.species].boundary_condition;
    if reactant_boundary && product_boundary {
        return;
    }
    let (Some(product_weight), Some(reactant_weight)) =
        (reaction.product_weight, reaction.reactant_weight)
    else {
        return;
    };

    let forward = model.exprs.eval(product_weight, vars, ctx);
    let backward = model.exprs.eval(reactant_weight, vars, ctx);
    if forward <= 0.0 && backward <= 0.0 {
        return;
    }

    let reactant_var = model.species_var(reactant.species);
    let product_var = model.species_var(product.species);

    if product_boundary {
        let pinned = (backward / forward) * vars.state(product_var).value;
        let state = vars.state_mut(reactant_var);
        state.value = pinned;
        state.staged = pinned;
    } else if reactant_boundary {
        let pinned = (forward / backward) * vars.state(reactant_var).value;
        let state = vars.state_mut(product_var);
        state.value = pinned;
        state.staged = pinned;
    } else {
        let total = vars.state(product_var).staged + vars.state(reactant_var).staged;
        let share = forward / (forward + backward);
        let product_value = share * total;
        let reactant_value = total - product_value;
        let state = vars.state_mut(product_var);
        state.value = product_value;
        state.staged = product_value;
        let state = vars.state_mut(reactant_var);
        state.value = reactant_value;
        state.staged = reactant_value;
    }
}
