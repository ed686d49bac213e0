//! Terraform process plumbing: the subprocess executor, typed subcommand
//! wrappers, opaque state/plan blobs, and the plan-JSON classifier.

mod executor;
mod plan_json;
mod state;
mod terraform;

pub use executor::{ExecError, ExecOutput, Executor, DEFAULT_EXEC_PATH};
pub use plan_json::{Change, OutputChange, PlanJson, ResourceChange};
pub use state::{Plan, State};
pub use terraform::{BackendOverride, PlanOutcome, TerraformCli};
