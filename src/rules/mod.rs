//! Rule Engine: named expression rules run around entity mutations.

pub mod engine;
pub mod handler;

pub use engine::{Rule, RuleEngine, RuleKind, RuleResult, RuleWorkflow};
pub use handler::{RuleEventHandler, WorkflowTrigger};
