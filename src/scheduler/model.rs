//! Solver-neutral description of a mixed-integer program.
//!
//! The scheduler builds a [`MilpModel`] and hands it to a
//! [`MilpSolver`](super::solver::MilpSolver); nothing in here knows which
//! numeric backend ends up solving it.

/// Handle to a decision variable inside one [`MilpModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Domain of a decision variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarKind {
    Binary,
    Continuous { lower: f64, upper: Option<f64> },
}

impl VarKind {
    pub fn lower(&self) -> f64 {
        match self {
            Self::Binary => 0.0,
            Self::Continuous { lower, .. } => *lower,
        }
    }

    pub fn upper(&self) -> Option<f64> {
        match self {
            Self::Binary => Some(1.0),
            Self::Continuous { upper, .. } => *upper,
        }
    }
}

/// Sparse linear combination of variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `coef * var`; zero coefficients are skipped.
    pub fn add(&mut self, var: VarId, coef: f64) -> &mut Self {
        if coef != 0.0 {
            self.terms.push((var, coef));
        }
        self
    }

    pub fn with(mut self, var: VarId, coef: f64) -> Self {
        self.add(var, coef);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluates the expression against a value per variable index.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coef)| coef * values[var.index()])
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Le,
    Ge,
}

/// `expr (==|<=|>=) rhs`, tagged with the family it belongs to for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: &'static str,
    pub expr: LinearExpr,
    pub relation: Relation,
    pub rhs: f64,
}

impl Constraint {
    /// Checks the constraint at `values`. `tolerance` is relative to the
    /// magnitude of the coefficients and the right-hand side.
    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let magnitude: f64 = self.expr.terms.iter().map(|(_, c)| c.abs()).sum();
        let tolerance = tolerance * (1.0 + magnitude + self.rhs.abs());
        let lhs = self.expr.evaluate(values);
        match self.relation {
            Relation::Eq => (lhs - self.rhs).abs() <= tolerance,
            Relation::Le => lhs <= self.rhs + tolerance,
            Relation::Ge => lhs + tolerance >= self.rhs,
        }
    }
}

/// Linear objective plus a diagonal quadratic part `Σ coef · v²`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Objective {
    pub linear: LinearExpr,
    pub quadratic: Vec<(VarId, f64)>,
}

impl Objective {
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        let quadratic: f64 = self
            .quadratic
            .iter()
            .map(|(var, coef)| coef * values[var.index()].powi(2))
            .sum();
        self.linear.evaluate(values) + quadratic
    }
}

/// A minimisation problem: variables, constraints, objective.
#[derive(Debug, Clone, Default)]
pub struct MilpModel {
    variables: Vec<VarKind>,
    constraints: Vec<Constraint>,
    objective: Objective,
}

impl MilpModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binary(&mut self) -> VarId {
        self.push_variable(VarKind::Binary)
    }

    /// Adds a continuous variable bounded below by `lower` and, optionally,
    /// above by `upper`.
    ///
    /// # Panics
    ///
    /// Panics if `upper < lower`.
    pub fn add_continuous(&mut self, lower: f64, upper: Option<f64>) -> VarId {
        if let Some(upper) = upper {
            assert!(upper >= lower, "variable upper bound must be >= lower bound");
        }
        self.push_variable(VarKind::Continuous { lower, upper })
    }

    fn push_variable(&mut self, kind: VarKind) -> VarId {
        self.variables.push(kind);
        VarId(self.variables.len() - 1)
    }

    pub fn add_constraint(
        &mut self,
        name: &'static str,
        expr: LinearExpr,
        relation: Relation,
        rhs: f64,
    ) {
        self.constraints.push(Constraint {
            name,
            expr,
            relation,
            rhs,
        });
    }

    pub fn minimise_linear(&mut self, var: VarId, coef: f64) {
        self.objective.linear.add(var, coef);
    }

    /// Adds `coef · var²` to the objective. Non-positive coefficients are
    /// ignored so the problem stays convex.
    pub fn minimise_quadratic(&mut self, var: VarId, coef: f64) {
        if coef > 0.0 {
            self.objective.quadratic.push((var, coef));
        }
    }

    pub fn variables(&self) -> &[VarKind] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    /// The first constraint `assignment` breaks, if any.
    pub fn first_violation(&self, assignment: &Assignment, tolerance: f64) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| !c.is_satisfied(assignment.values(), tolerance))
    }

    pub fn binary_count(&self) -> usize {
        self.variables
            .iter()
            .filter(|kind| matches!(kind, VarKind::Binary))
            .count()
    }
}

/// Values chosen by a solver, indexed by [`VarId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    values: Vec<f64>,
}

impl Assignment {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.index()]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_are_numbered_in_insertion_order() {
        let mut model = MilpModel::new();
        let x = model.add_binary();
        let y = model.add_continuous(0.0, None);
        assert_eq!(x.index(), 0);
        assert_eq!(y.index(), 1);
        assert_eq!(model.binary_count(), 1);
        assert_eq!(model.variables()[1].upper(), None);
    }

    #[test]
    fn zero_coefficients_are_dropped() {
        let expr = LinearExpr::new().with(VarId(0), 0.0).with(VarId(1), 2.0);
        assert_eq!(expr.terms, vec![(VarId(1), 2.0)]);
    }

    #[test]
    fn objective_evaluates_linear_and_quadratic_parts() {
        let mut model = MilpModel::new();
        let v = model.add_continuous(0.0, Some(4.0));
        model.minimise_linear(v, -4.0);
        model.minimise_quadratic(v, 1.0);
        model.minimise_quadratic(v, -3.0);
        assert_eq!(model.objective().quadratic.len(), 1);
        assert_eq!(model.objective().evaluate(&[2.0]), -4.0);
    }

    #[test]
    fn constraint_check_respects_relation() {
        let c = Constraint {
            name: "cap",
            expr: LinearExpr::new().with(VarId(0), 1.0),
            relation: Relation::Le,
            rhs: 3.0,
        };
        assert!(c.is_satisfied(&[3.0], 1e-9));
        assert!(!c.is_satisfied(&[3.5], 1e-9));
    }

    #[test]
    fn first_violation_names_the_broken_constraint() {
        let mut model = MilpModel::new();
        let x = model.add_binary();
        let y = model.add_continuous(0.0, None);
        model.add_constraint("one", LinearExpr::new().with(x, 1.0), Relation::Eq, 1.0);
        model.add_constraint("cap", LinearExpr::new().with(y, 1.0), Relation::Le, 2.0);

        assert!(model.first_violation(&Assignment::new(vec![1.0, 2.0]), 1e-9).is_none());
        let broken = model.first_violation(&Assignment::new(vec![1.0, 5.0]), 1e-9);
        assert_eq!(broken.map(|c| c.name), Some("cap"));
    }

    #[test]
    #[should_panic(expected = "upper bound")]
    fn rejects_inverted_bounds() {
        MilpModel::new().add_continuous(2.0, Some(1.0));
    }
}
