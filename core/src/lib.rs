pub mod auth;
pub mod error;
pub mod objects;
pub mod plan;
pub mod tabular;

pub use error::{ErrorBody, ErrorKind};
pub use objects::{GeoscienceObject, ObjectMeta, TargetKind, ValidationError};
pub use plan::{ImportPlan, PlanOptions, PlannedObject, RowPlan, plan_import};
pub use tabular::{Table, parse_csv};
