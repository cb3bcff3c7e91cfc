use serde_json::{Map, Value as Json};

use super::definition::Parameter;
use crate::core::Result;

pub const INPUT: &str = "input";
pub const WORKFLOW_INPUT: &str = "workflow_input";
pub const CONTEXT: &str = "context";

/// Variables of one run.
///
/// Seeded from typed globals, then overridden by the top-level fields of an
/// object input. Step outputs are bound by name as the run proceeds.
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    variables: Map<String, Json>,
}

impl VariableScope {
    pub fn from_globals(globals: &[Parameter]) -> Result<Self> {
        let mut scope = Self::default();
        for variable in globals {
            scope.bind(&variable.key, variable.typed_value()?);
        }
        Ok(scope)
    }

    pub fn merge_input(&mut self, input: &Json) {
        if let Json::Object(fields) = input {
            for (key, value) in fields {
                self.bind(key, value.clone());
            }
        }
    }

    pub fn bind(&mut self, name: &str, value: Json) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Json> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &Map<String, Json> {
        &self.variables
    }

    pub fn into_variables(self) -> Map<String, Json> {
        self.variables
    }

    /// The object conditions and templates are evaluated against.
    ///
    /// `input`, `workflow_input` and `context` shadow variables of the same name.
    pub fn evaluation_scope(&self, running: &Json, original: &Json, context: &Json) -> Json {
        let mut scope = self.variables.clone();
        scope.insert(INPUT.to_string(), running.clone());
        scope.insert(WORKFLOW_INPUT.to_string(), original.clone());
        scope.insert(CONTEXT.to_string(), context.clone());
        Json::Object(scope)
    }
}
