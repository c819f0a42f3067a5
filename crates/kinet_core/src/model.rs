use crate::expr::{ExprId, ExprSet, Program, VarId};

pub type SpeciesId = usize;
pub type ParameterId = usize;
pub type CompartmentId = usize;
pub type ReactionId = usize;

/// A chemical species. Its simulation value is tracked either as a
/// concentration or as an amount; boundary-condition species are
/// externally buffered and never mass-balanced by reactions.
#[derive(Debug, Clone)]
pub struct Species {
    pub name: String,
    pub initial_value: f64,
    pub is_concentration: bool,
    pub is_amount: bool,
    pub boundary_condition: bool,
    pub constant: bool,
    pub compartment: CompartmentId,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub constant: bool,
}

#[derive(Debug, Clone)]
pub struct Compartment {
    pub name: String,
    pub volume: f64,
    pub constant: bool,
    /// Species located in this compartment, for volume-change rescaling.
    pub species: Vec<SpeciesId>,
}

/// A reactant or product term. The stoichiometric coefficient is a
/// program; a rule-governed reference points its program at its own
/// simulation variable so integrated or assigned coefficients flow
/// through the same evaluation path.
#[derive(Debug, Clone)]
pub struct SpeciesReference {
    pub species: SpeciesId,
    pub stoichiometry: ExprId,
}

#[derive(Debug, Clone)]
pub struct Reaction {
    pub name: String,
    pub kinetic_law: ExprId,
    pub reactants: Vec<SpeciesReference>,
    pub products: Vec<SpeciesReference>,
    /// Fast reactions equilibrate within one cycle instead of being
    /// integrated.
    pub fast: bool,
    pub reversible: bool,
    /// Equilibrium weight of the product side (reversible fast only).
    pub product_weight: Option<ExprId>,
    /// Equilibrium weight of the reactant side (reversible fast only).
    pub reactant_weight: Option<ExprId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// The target's value is fully determined by the expression every
    /// cycle; the target is never integrated.
    Assignment,
    /// The expression is the target's time derivative.
    Rate,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub target: VarId,
    pub kind: RuleKind,
    pub math: ExprId,
}

#[derive(Debug, Clone)]
pub struct EventAssignment {
    pub target: VarId,
    pub math: ExprId,
    /// Evaluate through the freeze record, with time read from the
    /// reverse-time slot.
    pub time_variant: bool,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub trigger: ExprId,
    pub assignments: Vec<EventAssignment>,
}

#[derive(Debug, Clone)]
pub struct InitialAssignment {
    pub target: VarId,
    pub math: ExprId,
}

#[derive(Debug, Clone, Copy)]
pub struct AlgebraicTarget {
    /// Index into the solved vector.
    pub order: usize,
    pub var: VarId,
}

/// Simultaneous equations `matrix . x + constant = 0`, each cell given as
/// a program re-evaluated every cycle. The number of equations equals the
/// number of unknowns; a single unknown degenerates to scalar division.
#[derive(Debug, Clone)]
pub struct AlgebraicSystem {
    pub coefficients: Vec<Vec<ExprId>>,
    pub constants: Vec<ExprId>,
    pub targets: Vec<AlgebraicTarget>,
}

impl AlgebraicSystem {
    pub fn unknowns(&self) -> usize {
        self.constants.len()
    }
}

/// A fully built reaction-network model. Construction and validation are
/// the caller's concern; the simulator consumes this read-only.
#[derive(Debug, Default)]
pub struct Model {
    pub name: String,
    pub species: Vec<Species>,
    pub parameters: Vec<Parameter>,
    pub compartments: Vec<Compartment>,
    pub reactions: Vec<Reaction>,
    pub rules: Vec<Rule>,
    pub events: Vec<Event>,
    pub initial_assignments: Vec<InitialAssignment>,
    /// Programs frozen alongside initial assignments during setup.
    pub time_variant_assignments: Vec<ExprId>,
    pub algebraic: Option<AlgebraicSystem>,
    pub exprs: ExprSet,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_program(&mut self, program: Program) -> ExprId {
        self.exprs.add(program)
    }

    pub fn add_species(&mut self, species: Species) -> SpeciesId {
        let id = self.species.len();
        self.compartments[species.compartment].species.push(id);
        self.species.push(species);
        id
    }

    pub fn add_parameter(&mut self, parameter: Parameter) -> ParameterId {
        self.parameters.push(parameter);
        self.parameters.len() - 1
    }

    pub fn add_compartment(&mut self, compartment: Compartment) -> CompartmentId {
        self.compartments.push(compartment);
        self.compartments.len() - 1
    }

    pub fn add_reaction(&mut self, reaction: Reaction) -> ReactionId {
        self.reactions.push(reaction);
        self.reactions.len() - 1
    }

    // Flat variable ids: species, then parameters, then compartments,
    // then stoichiometry references, in declaration order. Every group
    // operation relies on this single ordinal mapping.

    pub fn species_var(&self, id: SpeciesId) -> VarId {
        id
    }

    pub fn parameter_var(&self, id: ParameterId) -> VarId {
        self.species.len() + id
    }

    pub fn compartment_var(&self, id: CompartmentId) -> VarId {
        self.species.len() + self.parameters.len() + id
    }

    /// Variable id of the `index`-th stoichiometry reference of a
    /// reaction, counting reactants before products.
    pub fn stoichiometry_var(&self, reaction: ReactionId, index: usize) -> VarId {
        let mut var = self.species.len() + self.parameters.len() + self.compartments.len();
        for earlier in &self.reactions[..reaction] {
            var += earlier.reactants.len() + earlier.products.len();
        }
        var + index
    }

    pub fn num_vars(&self) -> usize {
        let refs: usize = self
            .reactions
            .iter()
            .map(|re| re.reactants.len() + re.products.len())
            .sum();
        self.species.len() + self.parameters.len() + self.compartments.len() + refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_compartment(name: &str) -> Compartment {
        Compartment {
            name: name.to_string(),
            volume: 1.0,
            constant: true,
            species: Vec::new(),
        }
    }

    #[test]
    fn variable_ids_follow_declaration_order() {
        let mut model = Model::new("ordering");
        let c = model.add_compartment(empty_compartment("cell"));
        model.add_species(Species {
            name: "A".to_string(),
            initial_value: 1.0,
            is_concentration: false,
            is_amount: true,
            boundary_condition: false,
            constant: false,
            compartment: c,
        });
        model.add_parameter(Parameter {
            name: "k".to_string(),
            value: 2.0,
            constant: true,
        });
        let one = model.add_program(Program::constant(1.0));
        model.add_reaction(Reaction {
            name: "r".to_string(),
            kinetic_law: one,
            reactants: vec![SpeciesReference {
                species: 0,
                stoichiometry: one,
            }],
            products: vec![SpeciesReference {
                species: 0,
                stoichiometry: one,
            }],
            fast: false,
            reversible: false,
            product_weight: None,
            reactant_weight: None,
        });

        assert_eq!(model.species_var(0), 0);
        assert_eq!(model.parameter_var(0), 1);
        assert_eq!(model.compartment_var(0), 2);
        assert_eq!(model.stoichiometry_var(0, 0), 3);
        assert_eq!(model.stoichiometry_var(0, 1), 4);
        assert_eq!(model.num_vars(), 5);
    }

    #[test]
    fn adding_species_registers_it_with_its_compartment() {
        let mut model = Model::new("containment");
        let c = model.add_compartment(empty_compartment("cell"));
        let s = model.add_species(Species {
            name: "A".to_string(),
            initial_value: 0.5,
            is_concentration: true,
            is_amount: false,
            boundary_condition: false,
            constant: false,
            compartment: c,
        });
        assert_eq!(model.compartments[c].species, vec![s]);
    }
}
