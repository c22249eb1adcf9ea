pub mod budget;
pub mod matrix;
pub mod portfolio;
pub mod solver;
pub mod validation;

pub use budget::RiskBudget;
pub use matrix::CovarianceMatrix;
pub use solver::{RiskParitySolution, RiskParitySolver, SolverConfig};
pub use validation::{ValidationConfig, ValidationGuard, ValidationMode};
