use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::core::{Column, DataType, PlatformError, Result, Row, Value};
use crate::registry::{PropertyType, RelationshipType};
use crate::storage::TableSchema;

/// A record as seen by callers of the data access layer.
pub type Record = Map<String, Json>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldOrigin {
    Declared,
    /// Key added because the model declared none.
    SynthesizedKey,
    /// Foreign key column added for a relationship.
    ForeignKey,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub property_type: PropertyType,
    pub data_type: DataType,
    pub is_key: bool,
    pub is_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_extensions: Option<Vec<String>>,
    pub origin: FieldOrigin,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, property_type: PropertyType, origin: FieldOrigin) -> Self {
        Self {
            name: name.into(),
            property_type,
            data_type: property_type.data_type(),
            is_key: false,
            is_required: false,
            max_length: None,
            allowed_extensions: None,
            origin,
        }
    }

    pub fn column(&self) -> Column {
        let column = Column::new(self.name.clone(), self.data_type);
        if self.is_key {
            column.primary_key()
        } else if self.is_required {
            column.not_null()
        } else {
            column
        }
    }

    /// Converts one JSON input into a stored value, enforcing type, integer
    /// width, `maxLength` and file-asset extensions.
    pub fn coerce(&self, input: &Json) -> std::result::Result<Value, String> {
        let value = self
            .data_type
            .coerce_json(input)
            .map_err(|e| format!("field '{}': {}", self.name, e))?;

        if let (Some((min, max)), Value::Integer(i)) = (self.property_type.integer_range(), &value)
            && (*i < min || *i > max)
        {
            return Err(format!(
                "field '{}': {} is out of range for {}",
                self.name, i, self.property_type
            ));
        }

        if let Value::Text(text) = &value {
            if let Some(max) = self.max_length
                && text.chars().count() > max
            {
                return Err(format!(
                    "field '{}': length {} exceeds maxLength {}",
                    self.name,
                    text.chars().count(),
                    max
                ));
            }
            if self.property_type == PropertyType::FileAsset
                && let Some(allowed) = &self.allowed_extensions
                && !extension_allowed(text, allowed)
            {
                return Err(format!(
                    "field '{}': file '{}' must have one of the extensions {}",
                    self.name,
                    text,
                    allowed.join(", ")
                ));
            }
        }

        Ok(value)
    }
}

fn extension_allowed(reference: &str, allowed: &[String]) -> bool {
    let Some((_, ext)) = reference.rsplit_once('.') else {
        return false;
    };
    allowed
        .iter()
        .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDescriptor {
    pub name: String,
    pub relationship_type: RelationshipType,
    pub target_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse_navigation: Option<String>,
    /// False when the target model is missing and the owner ignores that.
    pub resolved: bool,
}

/// Runtime stand-in for a record type: field list plus the key field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub model_name: String,
    pub fields: Vec<FieldDescriptor>,
    pub key_index: usize,
    pub navigations: Vec<NavigationDescriptor>,
}

impl Descriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_index(name).map(|idx| &self.fields[idx])
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn key_field(&self) -> &FieldDescriptor {
        &self.fields[self.key_index]
    }

    /// Declared, required, non-key fields in declaration order.
    pub fn required_non_key_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| f.is_required && !f.is_key && f.origin == FieldOrigin::Declared)
    }

    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(
            self.model_name.clone(),
            self.fields.iter().map(FieldDescriptor::column).collect(),
        )
    }

    /// Coerces a caller-supplied key to the declared key type.
    pub fn coerce_key(&self, key: &Json) -> Result<Value> {
        let field = self.key_field();
        let invalid = |message: String| PlatformError::InvalidKey {
            model: self.model_name.clone(),
            message,
        };
        if key.is_null() {
            return Err(invalid(format!("key '{}' must not be null", field.name)));
        }
        let value = field.coerce(key).map_err(invalid)?;
        if value.is_null() {
            return Err(invalid(format!("key '{}' must not be null", field.name)));
        }
        Ok(value)
    }

    /// Builds a full row from `record`, layered over `base` when updating.
    ///
    /// Every problem is collected before failing with `RecordValidation`.
    pub fn to_row(&self, record: &Record, base: Option<&Row>) -> Result<Row> {
        let mut row = match base {
            Some(existing) => existing.clone(),
            None => vec![Value::Null; self.fields.len()],
        };
        let mut violations = Vec::new();

        for (name, input) in record {
            match self.field_index(name) {
                Some(idx) => match self.fields[idx].coerce(input) {
                    Ok(value) => row[idx] = value,
                    Err(message) => violations.push(message),
                },
                None => violations.push(format!("unknown field '{}'", name)),
            }
        }

        for (field, value) in self.fields.iter().zip(&row) {
            if (field.is_required || field.is_key) && value.is_null() {
                violations.push(format!("field '{}' is required", field.name));
            }
        }

        if violations.is_empty() {
            Ok(row)
        } else {
            Err(PlatformError::RecordValidation {
                model: self.model_name.clone(),
                violations,
            })
        }
    }

    pub fn to_record(&self, row: &Row) -> Record {
        self.fields
            .iter()
            .zip(row)
            .map(|(field, value)| (field.name.clone(), value.to_json()))
            .collect()
    }

    /// Finds the key in a record, matching the field name case-insensitively.
    pub fn key_in<'a>(&self, record: &'a Record) -> Option<&'a Json> {
        let name = &self.key_field().name;
        record
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .filter(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice() -> Descriptor {
        let mut key = FieldDescriptor::new("InvoiceId", PropertyType::Int32, FieldOrigin::Declared);
        key.is_key = true;
        let mut total = FieldDescriptor::new("Total", PropertyType::Decimal, FieldOrigin::Declared);
        total.is_required = true;
        let mut code = FieldDescriptor::new("Code", PropertyType::String, FieldOrigin::Declared);
        code.max_length = Some(4);
        let mut scan = FieldDescriptor::new("Scan", PropertyType::FileAsset, FieldOrigin::Declared);
        scan.allowed_extensions = Some(vec!["pdf".into(), ".png".into()]);
        let small = FieldDescriptor::new("Priority", PropertyType::Byte, FieldOrigin::Declared);
        Descriptor {
            model_name: "Invoice".into(),
            fields: vec![key, total, code, scan, small],
            key_index: 0,
            navigations: vec![],
        }
    }

    fn record(value: Json) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_all_violations_are_reported() {
        let err = invoice()
            .to_row(
                &record(json!({
                    "InvoiceId": 1,
                    "Code": "TOO-LONG",
                    "Scan": "photo.gif",
                    "Priority": 300,
                    "Bogus": true
                })),
                None,
            )
            .unwrap_err();
        match err {
            PlatformError::RecordValidation { violations, .. } => {
                assert_eq!(violations.len(), 5, "{:?}", violations);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_row_round_trips_through_record() {
        let descriptor = invoice();
        let row = descriptor
            .to_row(
                &record(json!({"invoiceid": "3", "Total": 9.5, "Scan": "a.PDF"})),
                None,
            )
            .unwrap();
        assert_eq!(row[0], Value::Integer(3));
        let back = descriptor.to_record(&row);
        assert_eq!(back["Total"], json!(9.5));
        assert_eq!(back["Code"], Json::Null);
    }

    #[test]
    fn test_key_coercion() {
        let descriptor = invoice();
        assert_eq!(descriptor.coerce_key(&json!("12")).unwrap(), Value::Integer(12));
        let err = descriptor.coerce_key(&json!("abc")).unwrap_err();
        assert_eq!(err.reason(), "invalid_key");
        assert!(descriptor.coerce_key(&Json::Null).is_err());
    }

    #[test]
    fn test_required_non_key_fields_skip_optional_and_key() {
        let descriptor = invoice();
        let names: Vec<&str> = descriptor
            .required_non_key_fields()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["Total"]);
    }
}
