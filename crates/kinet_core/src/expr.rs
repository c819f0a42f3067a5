use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::delay::DelayContext;
use crate::state::VarTable;

/// Index of a simulation variable in the flat variable table
/// (species, then parameters, then compartments, then stoichiometry
/// references, in model declaration order).
pub type VarId = usize;

/// Handle to a compiled program stored in an [`ExprSet`].
pub type ExprId = usize;

/// Operations of the stack machine that evaluates kinetic laws, rule
/// expressions, equilibrium weights and algebraic coefficients.
///
/// Programs are postfix op sequences; binary ops pop (b, a) and push the
/// result of `a op b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Pushes an inline constant.
    Const(f64),
    /// Pushes the value of a simulation variable, read through the
    /// context's [`ValueView`] unless a freeze record overrides it.
    Load(VarId),
    /// Pushes the current simulation time. Under a freeze record this
    /// reads the reverse-time slot instead.
    Time,
    /// Pops the delay `tau`, pushes the variable's value at `t - tau` and
    /// records `t - tau` into the reverse-time slot.
    Delay(VarId),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Sin,
    Cos,
    Exp,
    Ln,
    Sqrt,
}

/// A compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub ops: Vec<Op>,
}

impl Program {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    /// Shorthand for a program that evaluates to a fixed number.
    pub fn constant(value: f64) -> Self {
        Self {
            ops: vec![Op::Const(value)],
        }
    }

    /// Shorthand for a program that reads one variable.
    pub fn load(var: VarId) -> Self {
        Self {
            ops: vec![Op::Load(var)],
        }
    }
}

/// Which per-variable slot `Load` reads during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueView {
    /// The accepted value of the current cycle.
    Accepted,
    /// The Runge-Kutta stage scratch state.
    StageScratch,
}

/// Snapshot of every variable referenced by initial-assignment and
/// time-variant-assignment programs, taken once during setup.
///
/// When present in the evaluation context, variable loads read the
/// snapshot and `Time` reads the reverse-time slot, so later mutation of
/// the source variables cannot retroactively change a frozen expression.
#[derive(Debug, Clone, Default)]
pub struct FreezeRecord {
    values: HashMap<VarId, f64>,
}

impl FreezeRecord {
    /// Captures the current accepted value of every variable loaded by
    /// any of the given programs.
    pub fn capture<'a>(
        programs: impl IntoIterator<Item = &'a Program>,
        vars: &VarTable,
    ) -> Self {
        let mut values = HashMap::new();
        for program in programs {
            for op in &program.ops {
                if let Op::Load(var) = op {
                    values
                        .entry(*var)
                        .or_insert_with(|| vars.state(*var).value);
                }
            }
        }
        Self { values }
    }

    pub fn get(&self, var: VarId) -> Option<f64> {
        self.values.get(&var).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything one evaluation needs besides the variable table itself.
///
/// The reverse-time slot is the single mutable cell shared by the whole
/// run: delay reads write their shifted coordinate into it, and frozen
/// programs read their time from it.
pub struct EvalContext<'a> {
    pub step_size: f64,
    pub cycle: usize,
    pub time: f64,
    pub view: ValueView,
    pub frozen: Option<&'a FreezeRecord>,
    pub delays: Option<&'a DelayContext>,
    pub reverse_time: &'a Cell<f64>,
}

impl<'a> EvalContext<'a> {
    /// A context with no freeze record and no delay buffer, reading
    /// accepted values.
    pub fn plain(step_size: f64, cycle: usize, time: f64, reverse_time: &'a Cell<f64>) -> Self {
        Self {
            step_size,
            cycle,
            time,
            view: ValueView::Accepted,
            frozen: None,
            delays: None,
            reverse_time,
        }
    }
}

/// Owns every compiled program of a model plus the scratch stack the
/// machine evaluates on.
#[derive(Debug, Default)]
pub struct ExprSet {
    programs: Vec<Program>,
    // Interior mutability so evaluation does not allocate per call.
    stack: RefCell<Vec<f64>>,
}

impl ExprSet {
    pub fn new() -> Self {
        Self {
            programs: Vec::new(),
            stack: RefCell::new(Vec::with_capacity(64)),
        }
    }

    pub fn add(&mut self, program: Program) -> ExprId {
        self.programs.push(program);
        self.programs.len() - 1
    }

    pub fn program(&self, id: ExprId) -> &Program {
        &self.programs[id]
    }

    /// Runs a program against the variable table and context.
    pub fn eval(&self, id: ExprId, vars: &VarTable, ctx: &EvalContext<'_>) -> f64 {
        let mut stack = self.stack.borrow_mut();
        stack.clear();

        for op in &self.programs[id].ops {
            match op {
                Op::Const(value) => stack.push(*value),
                Op::Load(var) => {
                    let frozen = ctx.frozen.and_then(|record| record.get(*var));
                    let value = match frozen {
                        Some(value) => value,
                        None => vars.read(*var, ctx.view),
                    };
                    stack.push(value);
                }
                Op::Time => {
                    if ctx.frozen.is_some() {
                        stack.push(ctx.reverse_time.get());
                    } else {
                        stack.push(ctx.time);
                    }
                }
                Op::Delay(var) => {
                    let tau = stack.pop().unwrap_or(0.0);
                    let shifted = ctx.time - tau;
                    ctx.reverse_time.set(shifted);
                    let value = match ctx.delays {
                        Some(delays) => delays.lookup(*var, shifted),
                        None => vars.read(*var, ctx.view),
                    };
                    stack.push(value);
                }
                Op::Add => binary(&mut stack, |a, b| a + b),
                Op::Sub => binary(&mut stack, |a, b| a - b),
                Op::Mul => binary(&mut stack, |a, b| a * b),
                Op::Div => binary(&mut stack, |a, b| a / b),
                Op::Pow => binary(&mut stack, f64::powf),
                Op::Neg => unary(&mut stack, |a| -a),
                Op::Sin => unary(&mut stack, f64::sin),
                Op::Cos => unary(&mut stack, f64::cos),
                Op::Exp => unary(&mut stack, f64::exp),
                Op::Ln => unary(&mut stack, f64::ln),
                Op::Sqrt => unary(&mut stack, f64::sqrt),
            }
        }

        stack.pop().unwrap_or(0.0)
    }
}

fn binary(stack: &mut Vec<f64>, f: impl Fn(f64, f64) -> f64) {
    let b = stack.pop().unwrap_or(0.0);
    let a = stack.pop().unwrap_or(0.0);
    stack.push(f(a, b));
}

fn unary(stack: &mut Vec<f64>, f: impl Fn(f64) -> f64) {
    let a = stack.pop().unwrap_or(0.0);
    stack.push(f(a));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{VarKind, VarTable};

    fn table_with_values(values: &[f64]) -> VarTable {
        let mut table = VarTable::default();
        for &value in values {
            table.push(VarKind::Parameter(0), true, value);
        }
        table
    }

    #[test]
    fn arithmetic_program_evaluates_postfix() {
        let mut exprs = ExprSet::new();
        // (2 + 3) * 4
        let id = exprs.add(Program::new(vec![
            Op::Const(2.0),
            Op::Const(3.0),
            Op::Add,
            Op::Const(4.0),
            Op::Mul,
        ]));
        let vars = table_with_values(&[]);
        let reverse_time = Cell::new(0.0);
        let ctx = EvalContext::plain(0.1, 0, 0.0, &reverse_time);
        assert!((exprs.eval(id, &vars, &ctx) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn load_reads_selected_view() {
        let mut exprs = ExprSet::new();
        let id = exprs.add(Program::load(0));
        let mut vars = table_with_values(&[1.5]);
        vars.state_mut(0).scratch = 9.0;

        let reverse_time = Cell::new(0.0);
        let mut ctx = EvalContext::plain(0.1, 0, 0.0, &reverse_time);
        assert!((exprs.eval(id, &vars, &ctx) - 1.5).abs() < 1e-12);

        ctx.view = ValueView::StageScratch;
        assert!((exprs.eval(id, &vars, &ctx) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn freeze_record_pins_values_and_time() {
        let mut exprs = ExprSet::new();
        // x + t
        let id = exprs.add(Program::new(vec![Op::Load(0), Op::Time, Op::Add]));
        let mut vars = table_with_values(&[2.0]);

        let record = FreezeRecord::capture([exprs.program(id)], &vars);
        assert_eq!(record.len(), 1);

        // Mutating the source after the snapshot must not leak through.
        vars.state_mut(0).value = 100.0;

        let reverse_time = Cell::new(0.25);
        let mut ctx = EvalContext::plain(0.1, 3, 7.0, &reverse_time);
        ctx.frozen = Some(&record);
        assert!((exprs.eval(id, &vars, &ctx) - 2.25).abs() < 1e-12);
    }

    #[test]
    fn delay_op_records_shifted_time() {
        let mut exprs = ExprSet::new();
        // delay(x, 0.5)
        let id = exprs.add(Program::new(vec![Op::Const(0.5), Op::Delay(0)]));
        let vars = table_with_values(&[4.0]);

        let reverse_time = Cell::new(0.0);
        let ctx = EvalContext::plain(0.1, 10, 1.0, &reverse_time);
        // No delay buffer in the context: falls back to the live value.
        assert!((exprs.eval(id, &vars, &ctx) - 4.0).abs() < 1e-12);
        assert!((reverse_time.get() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn functions_cover_kinetic_law_set() {
        let mut exprs = ExprSet::new();
        let id = exprs.add(Program::new(vec![Op::Const(1.0), Op::Exp, Op::Ln]));
        let vars = table_with_values(&[]);
        let reverse_time = Cell::new(0.0);
        let ctx = EvalContext::plain(0.1, 0, 0.0, &reverse_time);
        assert!((exprs.eval(id, &vars, &ctx) - 1.0).abs() < 1e-12);
    }
}
