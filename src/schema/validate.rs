use std::collections::{HashMap, HashSet};

use crate::core::{PlatformError, Result};
use crate::registry::ModelDeclaration;

/// Whole-set checks run before anything is compiled.
///
/// Model names must be unique ignoring case, navigation names unique within
/// their model, and every relationship target must exist unless the owner
/// sets `ignoreMissingRelationships`.
pub fn validate_declarations(declarations: &[ModelDeclaration]) -> Result<()> {
    let violations = collect_violations(declarations);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(PlatformError::SchemaValidation { violations })
    }
}

pub fn collect_violations(declarations: &[ModelDeclaration]) -> Vec<String> {
    let mut violations = Vec::new();

    let mut seen: HashMap<String, &str> = HashMap::new();
    for decl in declarations {
        if let Some(first) = seen.insert(decl.lookup_key(), &decl.name) {
            violations.push(format!(
                "duplicate model name '{}' (already declared as '{}')",
                decl.name, first
            ));
        }
    }

    for decl in declarations {
        let mut navigations = HashSet::new();
        for rel in &decl.relationships {
            if !navigations.insert(rel.navigation_name.to_ascii_lowercase()) {
                violations.push(format!(
                    "model '{}' declares navigation '{}' more than once",
                    decl.name, rel.navigation_name
                ));
            }
            let target_exists = seen.contains_key(&rel.target_model.to_ascii_lowercase());
            if !target_exists && !decl.ignore_missing_relationships {
                violations.push(format!(
                    "relationship '{}.{}' targets unknown model '{}'",
                    decl.name, rel.navigation_name, rel.target_model
                ));
            }
        }
    }

    violations
}
