pub mod assign;
pub mod validate;

pub use assign::{assign, AssignmentSet, Pass, PASSES};
pub use validate::{validate, PlanValidationError};
