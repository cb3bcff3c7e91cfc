use thiserror::Error;

/// Every failure the platform reports to callers.
///
/// `Display` is the human message; [`PlatformError::reason`] is the stable
/// machine-readable code carried next to it by the web layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Invalid model declarations: {}", .violations.join("; "))]
    SchemaValidation { violations: Vec<String> },

    #[error("Schema compilation failed: {0}")]
    SchemaCompilation(String),

    #[error("Schema migration failed: {0}")]
    SchemaMigration(String),

    #[error("Model '{0}' is not declared")]
    UnknownModel(String),

    #[error("Invalid key for model '{model}': {message}")]
    InvalidKey { model: String, message: String },

    #[error("Entity '{key}' not found in model '{model}'")]
    EntityNotFound { model: String, key: String },

    #[error("Invalid record for model '{model}': {}", .violations.join("; "))]
    RecordValidation { model: String, violations: Vec<String> },

    #[error("Model '{model}' already contains key {key}")]
    DuplicateKey { model: String, key: String },

    #[error("Invalid workflow '{workflow}': {}", .violations.join("; "))]
    WorkflowValidation {
        workflow: String,
        violations: Vec<String>,
    },

    #[error("Workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error(
        "Step {step_index} ({step_type}) of workflow '{workflow}' failed after {attempts} attempt(s): {message}"
    )]
    StepExecution {
        workflow: String,
        step_index: usize,
        step_type: String,
        attempts: u32,
        message: String,
        rolled_back: bool,
    },

    #[error("Rule '{rule}' rejected the operation: {}", .failures.join("; "))]
    RuleFailure { rule: String, failures: Vec<String> },

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Event delivery failed: {}", .failures.join("; "))]
    EventDelivery { failures: Vec<String> },

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

impl PlatformError {
    /// Stable snake_case reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SchemaValidation { .. } => "schema_validation",
            Self::SchemaCompilation(_) => "schema_compilation",
            Self::SchemaMigration(_) => "schema_migration",
            Self::UnknownModel(_) => "unknown_model",
            Self::InvalidKey { .. } => "invalid_key",
            Self::EntityNotFound { .. } => "not_found",
            Self::RecordValidation { .. } => "record_validation",
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::WorkflowValidation { .. } => "workflow_validation",
            Self::WorkflowNotFound(_) => "workflow_not_found",
            Self::StepExecution { .. } => "step_execution",
            Self::RuleFailure { .. } => "rule_failure",
            Self::Expression(_) => "expression_error",
            Self::TypeError(_) => "type_error",
            Self::EventDelivery { .. } => "event_delivery",
            Self::Notification(_) => "notification_error",
            Self::Storage(_) => "storage_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller can fix its input and retry the same call.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SchemaValidation { .. }
                | Self::UnknownModel(_)
                | Self::InvalidKey { .. }
                | Self::EntityNotFound { .. }
                | Self::RecordValidation { .. }
                | Self::DuplicateKey { .. }
                | Self::WorkflowValidation { .. }
                | Self::WorkflowNotFound(_)
                | Self::RuleFailure { .. }
                | Self::Expression(_)
                | Self::TypeError(_)
        )
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<sqlparser::parser::ParserError> for PlatformError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        Self::Expression(err.to_string())
    }
}
