use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

use crate::core::{PlatformError, Result};
use crate::expression::template::contains_template;

/// Declared type of a variable or parameter.
///
/// Anything outside the closed set deserializes as `Other` so that save-time
/// validation can report it instead of the JSON parser rejecting the whole
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VariableType {
    String,
    Int,
    Bool,
    Double,
    Json,
    Other(String),
}

impl VariableType {
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for VariableType {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "string" => Self::String,
            "int" | "integer" => Self::Int,
            "bool" | "boolean" => Self::Bool,
            "double" => Self::Double,
            "json" => Self::Json,
            _ => Self::Other(raw),
        }
    }
}

impl From<VariableType> for String {
    fn from(ty: VariableType) -> Self {
        ty.to_string()
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::Double => write!(f, "double"),
            Self::Json => write!(f, "json"),
            Self::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// A global variable or step parameter: a raw string plus its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub key: String,
    pub declared_type: VariableType,
    #[serde(default)]
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, declared_type: VariableType, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            declared_type,
            value: value.into(),
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, VariableType::String, value)
    }

    pub fn is_templated(&self) -> bool {
        contains_template(&self.value)
    }

    /// Parses `value` under `declared_type`.
    pub fn typed_value(&self) -> Result<Json> {
        parse_typed(&self.key, &self.declared_type, &self.value)
    }

    pub fn as_string(&self) -> Result<String> {
        match self.expect(VariableType::String)? {
            Json::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        self.expect(VariableType::Int)?
            .as_i64()
            .ok_or_else(|| self.type_error("int"))
    }

    pub fn as_bool(&self) -> Result<bool> {
        self.expect(VariableType::Bool)?
            .as_bool()
            .ok_or_else(|| self.type_error("bool"))
    }

    pub fn as_double(&self) -> Result<f64> {
        self.expect(VariableType::Double)?
            .as_f64()
            .ok_or_else(|| self.type_error("double"))
    }

    pub fn as_json(&self) -> Result<Json> {
        self.expect(VariableType::Json)
    }

    fn expect(&self, ty: VariableType) -> Result<Json> {
        parse_typed(&self.key, &ty, &self.value)
    }

    fn type_error(&self, expected: &str) -> PlatformError {
        PlatformError::TypeError(format!(
            "parameter '{}' value '{}' is not a valid {}",
            self.key, self.value, expected
        ))
    }
}

/// Parses a raw string under a declared type.
pub fn parse_typed(key: &str, ty: &VariableType, raw: &str) -> Result<Json> {
    let fail = |detail: String| {
        PlatformError::TypeError(format!("'{}' value '{}' {}", key, raw, detail))
    };
    match ty {
        VariableType::String => Ok(Json::String(raw.to_string())),
        VariableType::Int => raw
            .trim()
            .parse::<i64>()
            .map(Json::from)
            .map_err(|_| fail("is not a valid int".into())),
        VariableType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Json::Bool(true)),
            "false" => Ok(Json::Bool(false)),
            _ => Err(fail("is not a valid bool".into())),
        },
        VariableType::Double => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Json::Number)
            .ok_or_else(|| fail("is not a valid double".into())),
        VariableType::Json => {
            serde_json::from_str(raw).map_err(|e| fail(format!("is not valid json: {}", e)))
        }
        VariableType::Other(name) => Err(PlatformError::TypeError(format!(
            "'{}' has unknown type '{}'",
            key, name
        ))),
    }
}

/// Checks an already-substituted JSON value against a declared type.
///
/// Strings are parsed as if they were raw values; other JSON values must
/// already have the right shape. Null passes for every type.
pub fn conform(key: &str, ty: &VariableType, value: Json) -> Result<Json> {
    let mismatch = |value: &Json| {
        PlatformError::TypeError(format!("'{}' value {} is not a valid {}", key, value, ty))
    };
    match (ty, value) {
        (_, Json::Null) => Ok(Json::Null),
        (VariableType::String, Json::String(s)) => Ok(Json::String(s)),
        (VariableType::String, other @ (Json::Number(_) | Json::Bool(_))) => {
            Ok(Json::String(other.to_string()))
        }
        (VariableType::Json, value) => Ok(value),
        (ty, Json::String(s)) => parse_typed(key, ty, &s),
        (VariableType::Int, Json::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Json::from(i)),
            None => Err(mismatch(&Json::Number(n))),
        },
        (VariableType::Double, Json::Number(n)) => Ok(Json::Number(n)),
        (VariableType::Bool, Json::Bool(b)) => Ok(Json::Bool(b)),
        (_, other) => Err(mismatch(&other)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

impl WorkflowStep {
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            parameters: Vec::new(),
            condition: None,
            on_error: None,
            output_variable: None,
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn on_error(mut self, policy: impl Into<String>) -> Self {
        self.on_error = Some(policy.into());
        self
    }

    pub fn output(mut self, variable: impl Into<String>) -> Self {
        self.output_variable = Some(variable.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.key.eq_ignore_ascii_case(key))
    }

    /// The condition, ignoring blank strings.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub workflow_name: String,
    /// Assigned by the store on save; incoming values are ignored.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub is_transactional: bool,
    #[serde(default)]
    pub global_variables: Vec<Parameter>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workflow_name: name.into(),
            version: 0,
            is_transactional: false,
            global_variables: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn transactional(mut self, on: bool) -> Self {
        self.is_transactional = on;
        self
    }

    pub fn with_variable(mut self, variable: Parameter) -> Self {
        self.global_variables.push(variable);
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Content without the version, for comparing saved revisions.
    pub fn same_content(&self, other: &WorkflowDefinition) -> bool {
        self.workflow_name == other.workflow_name
            && self.is_transactional == other.is_transactional
            && self.global_variables == other.global_variables
            && self.steps == other.steps
    }
}
