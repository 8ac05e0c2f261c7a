pub mod dag;
pub mod error;
pub mod executor;
pub mod frame;
pub mod join;
pub mod plan;
pub mod relation;
pub mod value;

pub use error::{MergeError, Result};
pub use executor::{execute, ExecutionResult, ExecutorConfig, MergeExecutor, StepRelation, StepStat};
pub use plan::{JoinStep, JoinType, MergePlan, SaveMode};
pub use relation::{Relation, TableSet};
pub use value::Value;
