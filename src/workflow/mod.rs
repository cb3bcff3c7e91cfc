//! Workflow Orchestrator and Step Executor Registry.
//!
//! A run walks the step list of the latest saved version in order:
//! condition → resolve executor → substitute parameters → execute under a
//! savepoint, retrying per `onError` → bind the output. Transactional runs
//! undo all of their writes when a step fails for good.

pub mod definition;
pub mod executors;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod scope;
pub mod store;
pub mod validation;

pub use definition::{Parameter, VariableType, WorkflowDefinition, WorkflowStep};
pub use executors::builtin_registry;
pub use orchestrator::{
    RunResult, RunSettings, StepReport, StepStatus, WorkflowOrchestrator, WorkflowRevalidator,
};
pub use policy::ErrorPolicy;
pub use registry::{ExecutorRegistry, StepContext, StepExecutor, StepParameters};
pub use store::{WorkflowHistoryAction, WorkflowHistoryEntry, WorkflowStore};
pub use validation::validate_definition;
