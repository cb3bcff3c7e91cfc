use std::collections::HashSet;

use super::definition::WorkflowDefinition;
use super::policy::ErrorPolicy;
use super::registry::ExecutorRegistry;
use crate::expression::parse_expression;
use crate::schema::SchemaGeneration;

/// Every problem with `definition`, in document order. Empty means valid.
pub fn validate_definition(
    definition: &WorkflowDefinition,
    executors: &ExecutorRegistry,
    generation: &SchemaGeneration,
) -> Vec<String> {
    let mut violations = Vec::new();

    if definition.workflow_name.trim().is_empty() {
        violations.push("workflow name must not be empty".to_string());
    }

    let mut globals = HashSet::new();
    for variable in &definition.global_variables {
        if !globals.insert(variable.key.to_ascii_lowercase()) {
            violations.push(format!("global variable '{}' is declared more than once", variable.key));
        }
        if let Err(err) = variable.typed_value() {
            violations.push(format!("global variable {}", err));
        }
    }

    for (index, step) in definition.steps.iter().enumerate() {
        let label = format!("step {} ({})", index, step.step_type);

        match executors.resolve(&step.step_type) {
            None => violations.push(format!("{}: unknown step type '{}'", label, step.step_type)),
            Some(executor) => {
                for required in executor.required_parameters() {
                    if step.parameter(required).is_none() {
                        violations.push(format!("{}: missing required parameter '{}'", label, required));
                    }
                }
                for model in executor.referenced_models(step) {
                    if !generation.has_model(&model) {
                        violations.push(format!("{}: references unknown model '{}'", label, model));
                    }
                }
                for problem in executor.validate_step(step, generation) {
                    violations.push(format!("{}: {}", label, problem));
                }
            }
        }

        let mut keys = HashSet::new();
        for parameter in &step.parameters {
            if !keys.insert(parameter.key.to_ascii_lowercase()) {
                violations.push(format!("{}: parameter '{}' is declared more than once", label, parameter.key));
            }
            if !parameter.declared_type.is_known() {
                violations.push(format!(
                    "{}: parameter '{}' has unknown type '{}'",
                    label, parameter.key, parameter.declared_type
                ));
            } else if !parameter.is_templated()
                && let Err(err) = parameter.typed_value()
            {
                violations.push(format!("{}: parameter {}", label, err));
            }
        }

        if let Err(err) = ErrorPolicy::parse(step.on_error.as_deref()) {
            violations.push(format!("{}: {}", label, err));
        }
        if let Some(condition) = step.condition()
            && let Err(err) = parse_expression(condition)
        {
            violations.push(format!("{}: condition: {}", label, err));
        }
    }

    violations
}
