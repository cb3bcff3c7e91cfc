use chrono::{DateTime, Utc};
use serde_json::{Value as Json, json};
use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::Descriptor;
use crate::core::{PlatformError, Result};
use crate::registry::ModelDeclaration;
use crate::storage::Catalog;

/// One activated, immutable realization of the declaration set.
///
/// Readers hold an `Arc<SchemaGeneration>` for the length of a request; a
/// regeneration never mutates it, it only swaps in a successor.
#[derive(Debug)]
pub struct SchemaGeneration {
    version: u64,
    hash: String,
    declarations: Vec<ModelDeclaration>,
    descriptors: HashMap<String, Arc<Descriptor>>,
    order: Vec<String>,
    catalog: Catalog,
    activated_at: DateTime<Utc>,
}

impl SchemaGeneration {
    /// Generation 0: nothing declared yet.
    pub fn empty(hash: String) -> Self {
        Self {
            version: 0,
            hash,
            declarations: Vec::new(),
            descriptors: HashMap::new(),
            order: Vec::new(),
            catalog: Catalog::new(),
            activated_at: Utc::now(),
        }
    }

    pub fn new(
        version: u64,
        hash: String,
        declarations: Vec<ModelDeclaration>,
        descriptors: Vec<Descriptor>,
        catalog: Catalog,
    ) -> Self {
        let order = descriptors
            .iter()
            .map(|d| d.model_name.to_ascii_lowercase())
            .collect();
        let descriptors = descriptors
            .into_iter()
            .map(|d| (d.model_name.to_ascii_lowercase(), Arc::new(d)))
            .collect();
        Self {
            version,
            hash,
            declarations,
            descriptors,
            order,
            catalog,
            activated_at: Utc::now(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn declarations(&self) -> &[ModelDeclaration] {
        &self.declarations
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    pub fn descriptor(&self, model: &str) -> Result<Arc<Descriptor>> {
        self.descriptors
            .get(&model.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| PlatformError::UnknownModel(model.to_string()))
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.descriptors.contains_key(&model.to_ascii_lowercase())
    }

    /// Descriptors in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<Descriptor>> {
        self.order.iter().filter_map(|k| self.descriptors.get(k))
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.descriptors().map(|d| d.model_name.as_str()).collect()
    }

    pub fn describe(&self) -> Json {
        let models: Vec<Json> = self
            .descriptors()
            .map(|d| serde_json::to_value(d.as_ref()).unwrap_or(Json::Null))
            .collect();
        json!({
            "version": self.version,
            "hash": self.hash,
            "activatedAt": self.activated_at,
            "models": models,
            "tables": self.catalog.list_tables(),
        })
    }
}
