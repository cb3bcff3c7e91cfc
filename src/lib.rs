// ============================================================================
// schemaflow
// ============================================================================
//
// Data models declared at runtime, synthesized into a live schema, served
// through generic CRUD and driven by versioned workflows.

pub mod access;
pub mod config;
pub mod core;
pub mod events;
pub mod expression;
pub mod facade;
pub mod hashing;
pub mod notify;
pub mod registry;
pub mod rules;
pub mod schema;
pub mod storage;
pub mod transaction;
pub mod web;
pub mod workflow;

pub use access::{DataAccess, DataSession};
pub use config::PlatformConfig;
pub use core::{PlatformError, Result};
pub use events::{Event, EventBus, EventHandler, EventKind};
pub use facade::{Platform, PlatformBuilder};
pub use notify::{EmailSender, LoggingEmailSender, OutboxEmailSender};
pub use registry::{
    ModelDeclaration, ModelRegistry, PropertyDecl, PropertyType, RelationshipDecl,
    RelationshipType,
};
pub use rules::{Rule, RuleEngine, RuleKind, RuleWorkflow};
pub use schema::{Record, SchemaGeneration, SchemaSynthesizer};
pub use workflow::{
    Parameter, RunResult, StepContext, StepExecutor, StepParameters, VariableType,
    WorkflowDefinition, WorkflowOrchestrator, WorkflowStep,
};
