//! The numeric solver seam and its `good_lp`/`microlp` backend.

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable, constraint,
    microlp, variable,
};
use thiserror::Error;

use super::model::{Assignment, MilpModel, Relation, VarKind};

/// Why a solver could not produce an assignment.
#[derive(Debug, Error, PartialEq)]
pub enum SolveError {
    #[error("problem is infeasible")]
    Infeasible,
    #[error("problem is unbounded")]
    Unbounded,
    #[error("unsupported model: {0}")]
    Unsupported(String),
    #[error("solver backend error: {0}")]
    Backend(String),
}

/// Anything that can minimise a [`MilpModel`].
pub trait MilpSolver {
    fn solve(&self, model: &MilpModel) -> Result<Assignment, SolveError>;
}

/// Pure-Rust branch-and-bound backend.
///
/// `microlp` only handles linear objectives, so each `coef · v²` term is
/// replaced by its piecewise-linear interpolation on `segments` equal
/// segments of the variable's bounded range. The interpolation is exact at
/// the segment breakpoints and convex, so segments fill in order.
#[derive(Debug, Clone, Copy)]
pub struct GoodLpSolver {
    segments: usize,
}

impl GoodLpSolver {
    /// # Panics
    ///
    /// Panics if `segments` is zero.
    pub fn new(segments: usize) -> Self {
        assert!(segments > 0, "at least one segment is required");
        Self { segments }
    }
}

impl Default for GoodLpSolver {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Segment variables and their slopes standing in for one quadratic term.
struct Linearization {
    var: usize,
    lower: f64,
    pieces: Vec<(Variable, f64)>,
}

impl MilpSolver for GoodLpSolver {
    fn solve(&self, model: &MilpModel) -> Result<Assignment, SolveError> {
        let mut problem = ProblemVariables::new();

        let vars: Vec<Variable> = model
            .variables()
            .iter()
            .map(|kind| match *kind {
                VarKind::Binary => problem.add(variable().integer().min(0.0).max(1.0)),
                VarKind::Continuous { lower, upper } => match upper {
                    Some(upper) => problem.add(variable().min(lower).max(upper)),
                    None => problem.add(variable().min(lower)),
                },
            })
            .collect();

        let mut linearizations = Vec::with_capacity(model.objective().quadratic.len());
        for &(var, coef) in &model.objective().quadratic {
            let kind = model.variables()[var.index()];
            let Some(upper) = kind.upper() else {
                return Err(SolveError::Unsupported(format!(
                    "quadratic term on unbounded variable {}",
                    var.index()
                )));
            };
            let lower = kind.lower();
            let width = (upper - lower) / self.segments as f64;
            let pieces = (0..self.segments)
                .map(|k| {
                    let slope = coef * (2.0 * lower + (2 * k + 1) as f64 * width);
                    (problem.add(variable().min(0.0).max(width)), slope)
                })
                .collect();
            linearizations.push(Linearization {
                var: var.index(),
                lower,
                pieces,
            });
        }

        let linear: Expression = model
            .objective()
            .linear
            .terms
            .iter()
            .map(|&(var, coef)| coef * vars[var.index()])
            .sum();
        let approximated: Expression = linearizations
            .iter()
            .flat_map(|lin| lin.pieces.iter().map(|&(piece, slope)| slope * piece))
            .sum();

        let mut solver_model = problem.minimise(linear + approximated).using(microlp);

        for lin in &linearizations {
            let filled: Expression = lin.pieces.iter().map(|&(piece, _)| piece).sum();
            let var = vars[lin.var];
            solver_model = solver_model.with(constraint!(var - filled == lin.lower));
        }

        for c in model.constraints() {
            let lhs: Expression = c
                .expr
                .terms
                .iter()
                .map(|&(var, coef)| coef * vars[var.index()])
                .sum();
            let rhs = c.rhs;
            solver_model = solver_model.with(match c.relation {
                Relation::Eq => constraint!(lhs == rhs),
                Relation::Le => constraint!(lhs <= rhs),
                Relation::Ge => constraint!(lhs >= rhs),
            });
        }

        let solution = solver_model.solve().map_err(|err| match err {
            ResolutionError::Infeasible => SolveError::Infeasible,
            ResolutionError::Unbounded => SolveError::Unbounded,
            other => SolveError::Backend(other.to_string()),
        })?;

        let values = vars
            .iter()
            .zip(model.variables())
            .map(|(&var, kind)| match kind {
                VarKind::Binary => solution.value(var).round(),
                VarKind::Continuous { .. } => solution.value(var),
            })
            .collect();
        Ok(Assignment::new(values))
    }
}
