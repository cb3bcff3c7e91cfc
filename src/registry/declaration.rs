use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::DataType;

/// Operator-supplied description of one data entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDeclaration {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDecl>,
    #[serde(default)]
    pub ignore_missing_relationships: bool,
}

impl ModelDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            relationships: Vec::new(),
            ignore_missing_relationships: false,
        }
    }

    pub fn with_property(mut self, property: PropertyDecl) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipDecl) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn ignoring_missing_relationships(mut self) -> Self {
        self.ignore_missing_relationships = true;
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Lowercased name used for case-insensitive lookups.
    pub fn lookup_key(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_extensions: Option<Vec<String>>,
}

impl PropertyDecl {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            is_key: false,
            is_required: false,
            max_length: None,
            allowed_extensions: None,
        }
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }
}

/// Closed enumeration of built-in property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    #[serde(alias = "bool")]
    Boolean,
    Byte,
    #[serde(alias = "short")]
    Int16,
    #[serde(alias = "int", alias = "integer")]
    Int32,
    #[serde(alias = "long")]
    Int64,
    Decimal,
    Float,
    Double,
    String,
    #[serde(alias = "dateTime")]
    Datetime,
    Date,
    Time,
    #[serde(alias = "uuid")]
    Guid,
    #[serde(alias = "bytes")]
    ByteArray,
    #[serde(alias = "timeSpan")]
    Timespan,
    FileAsset,
}

impl PropertyType {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Byte | Self::Int16 | Self::Int32 | Self::Int64 => DataType::Integer,
            Self::Decimal | Self::Float | Self::Double => DataType::Float,
            Self::String | Self::FileAsset => DataType::Text,
            Self::Datetime => DataType::DateTime,
            Self::Date => DataType::Date,
            Self::Time => DataType::Time,
            Self::Guid => DataType::Guid,
            Self::ByteArray => DataType::Bytes,
            Self::Timespan => DataType::TimeSpan,
        }
    }

    /// Inclusive range for integer widths.
    pub fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            Self::Byte => Some((u8::MIN as i64, u8::MAX as i64)),
            Self::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.integer_range().is_some()
    }

    pub fn can_be_key(&self) -> bool {
        self.is_integer() || matches!(self, Self::String | Self::Guid)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Decimal => "decimal",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Datetime => "datetime",
            Self::Date => "date",
            Self::Time => "time",
            Self::Guid => "guid",
            Self::ByteArray => "byteArray",
            Self::Timespan => "timespan",
            Self::FileAsset => "fileAsset",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDecl {
    pub relationship_type: RelationshipType,
    pub target_model: String,
    pub navigation_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_navigation: Option<String>,
}

impl RelationshipDecl {
    pub fn new(
        relationship_type: RelationshipType,
        target_model: impl Into<String>,
        navigation_name: impl Into<String>,
    ) -> Self {
        Self {
            relationship_type,
            target_model: target_model.into(),
            navigation_name: navigation_name.into(),
            foreign_key: None,
            inverse_navigation: None,
        }
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    pub fn inverse(mut self, navigation: impl Into<String>) -> Self {
        self.inverse_navigation = Some(navigation.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}
