use std::collections::{HashMap, HashSet};

use super::descriptor::{Descriptor, FieldDescriptor, FieldOrigin, NavigationDescriptor};
use crate::core::{Column, PlatformError, Result};
use crate::registry::{ModelDeclaration, PropertyType, RelationshipType};
use crate::storage::{Catalog, TableSchema};

/// Output of compiling a declaration set: descriptors in declaration order
/// plus the physical layout they need.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub descriptors: Vec<Descriptor>,
    pub catalog: Catalog,
}

/// Compiles validated declarations into descriptors and a catalog.
pub fn compile(declarations: &[ModelDeclaration]) -> Result<CompiledSchema> {
    let mut descriptors = declarations
        .iter()
        .map(compile_model)
        .collect::<Result<Vec<_>>>()?;

    let keys: HashMap<String, (String, PropertyType)> = descriptors
        .iter()
        .map(|d| {
            let key = d.key_field();
            (
                d.model_name.to_ascii_lowercase(),
                (d.model_name.clone(), key.property_type),
            )
        })
        .collect();

    // Foreign keys that land on another model's table.
    let mut foreign: Vec<(String, FieldDescriptor)> = Vec::new();
    let mut join_tables: Vec<TableSchema> = Vec::new();

    for (decl, descriptor) in declarations.iter().zip(descriptors.iter_mut()) {
        let owner_key_type = descriptor.key_field().property_type;
        for rel in &decl.relationships {
            let target = keys.get(&rel.target_model.to_ascii_lowercase());
            let mut nav = NavigationDescriptor {
                name: rel.navigation_name.clone(),
                relationship_type: rel.relationship_type,
                target_model: target
                    .map(|(name, _)| name.clone())
                    .unwrap_or_else(|| rel.target_model.clone()),
                foreign_key: None,
                join_table: None,
                inverse_navigation: rel.inverse_navigation.clone(),
                resolved: target.is_some(),
            };

            if let Some((target_name, target_key_type)) = target {
                match rel.relationship_type {
                    RelationshipType::ManyToOne | RelationshipType::OneToOne => {
                        let fk = rel
                            .foreign_key
                            .clone()
                            .unwrap_or_else(|| format!("{}Id", rel.navigation_name));
                        if descriptor.field(&fk).is_none() {
                            descriptor.fields.push(FieldDescriptor::new(
                                fk.clone(),
                                *target_key_type,
                                FieldOrigin::ForeignKey,
                            ));
                        }
                        nav.foreign_key = Some(fk);
                    }
                    RelationshipType::OneToMany => {
                        if let Some(fk) = &rel.foreign_key {
                            foreign.push((
                                target_name.to_ascii_lowercase(),
                                FieldDescriptor::new(
                                    fk.clone(),
                                    owner_key_type,
                                    FieldOrigin::ForeignKey,
                                ),
                            ));
                            nav.foreign_key = Some(fk.clone());
                        }
                    }
                    RelationshipType::ManyToMany => {
                        let table = format!("{}_{}", descriptor.model_name, rel.navigation_name);
                        let owner_column = format!("{}_key", descriptor.model_name);
                        let mut target_column = format!("{}_key", target_name);
                        if target_column.eq_ignore_ascii_case(&owner_column) {
                            target_column = format!("{}_key", rel.navigation_name);
                        }
                        join_tables.push(TableSchema::new(
                            table.clone(),
                            vec![
                                Column::new(owner_column, owner_key_type.data_type()).not_null(),
                                Column::new(target_column, target_key_type.data_type()).not_null(),
                            ],
                        ));
                        nav.join_table = Some(table);
                    }
                }
            }

            descriptor.navigations.push(nav);
        }
    }

    for (target, field) in foreign {
        if let Some(descriptor) = descriptors
            .iter_mut()
            .find(|d| d.model_name.eq_ignore_ascii_case(&target))
            && descriptor.field(&field.name).is_none()
        {
            descriptor.fields.push(field);
        }
    }

    let mut catalog = Catalog::new();
    for descriptor in &descriptors {
        catalog = catalog.with_table(descriptor.table_schema())?;
    }
    for table in join_tables {
        catalog = catalog.with_table(table)?;
    }

    Ok(CompiledSchema {
        descriptors,
        catalog,
    })
}

fn compile_model(decl: &ModelDeclaration) -> Result<Descriptor> {
    let fail = |message: String| {
        PlatformError::SchemaCompilation(format!("model '{}': {}", decl.name, message))
    };

    if decl.name.trim().is_empty() {
        return Err(PlatformError::SchemaCompilation(
            "model name must not be empty".into(),
        ));
    }

    let mut names = HashSet::new();
    for prop in &decl.properties {
        if prop.name.trim().is_empty() {
            return Err(fail("property name must not be empty".into()));
        }
        if !names.insert(prop.name.to_ascii_lowercase()) {
            return Err(fail(format!("property '{}' is declared twice", prop.name)));
        }
    }

    let declared_keys: Vec<usize> = decl
        .properties
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_key)
        .map(|(i, _)| i)
        .collect();
    if declared_keys.len() > 1 {
        return Err(fail(format!(
            "{} key properties declared, exactly one is allowed",
            declared_keys.len()
        )));
    }

    let conventional = [
        "Id".to_string(),
        format!("{}Id", decl.name),
    ];
    let key_position = declared_keys.first().copied().or_else(|| {
        conventional
            .iter()
            .find_map(|name| {
                decl.properties
                    .iter()
                    .position(|p| p.name.eq_ignore_ascii_case(name))
            })
            .filter(|&i| decl.properties[i].property_type.can_be_key())
    });

    let mut fields: Vec<FieldDescriptor> = decl
        .properties
        .iter()
        .map(|prop| {
            let mut field =
                FieldDescriptor::new(prop.name.clone(), prop.property_type, FieldOrigin::Declared);
            field.is_required = prop.is_required;
            field.max_length = prop.max_length;
            field.allowed_extensions = prop.allowed_extensions.clone();
            field
        })
        .collect();

    let key_index = match key_position {
        Some(idx) => {
            let key = &mut fields[idx];
            if !key.property_type.can_be_key() {
                return Err(fail(format!(
                    "key '{}' has type {}; keys must be integers, strings or guids",
                    key.name, key.property_type
                )));
            }
            key.is_key = true;
            key.is_required = true;
            idx
        }
        None => {
            if names.contains("id") {
                return Err(fail(
                    "no usable key: property 'Id' exists but cannot be a key".into(),
                ));
            }
            let mut key = FieldDescriptor::new("Id", PropertyType::Int32, FieldOrigin::SynthesizedKey);
            key.is_key = true;
            key.is_required = true;
            fields.insert(0, key);
            0
        }
    };

    Ok(Descriptor {
        model_name: decl.name.clone(),
        fields,
        key_index,
        navigations: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::registry::{PropertyDecl, RelationshipDecl};

    #[test]
    fn test_key_promotion_and_synthesis() {
        let compiled = compile(&[
            ModelDeclaration::new("Customer")
                .with_property(PropertyDecl::new("Name", PropertyType::String))
                .with_property(PropertyDecl::new("CustomerId", PropertyType::Guid)),
            ModelDeclaration::new("Note")
                .with_property(PropertyDecl::new("Text", PropertyType::String)),
        ])
        .unwrap();

        let customer = &compiled.descriptors[0];
        assert_eq!(customer.key_field().name, "CustomerId");
        assert_eq!(customer.key_index, 1);

        let note = &compiled.descriptors[1];
        assert_eq!(note.key_field().name, "Id");
        assert_eq!(note.key_field().origin, FieldOrigin::SynthesizedKey);
        assert_eq!(note.fields.len(), 2);
    }

    #[test]
    fn test_compilation_errors() {
        let two_keys = ModelDeclaration::new("A")
            .with_property(PropertyDecl::new("X", PropertyType::Int32).key())
            .with_property(PropertyDecl::new("Y", PropertyType::Int32).key());
        assert_eq!(compile(&[two_keys]).unwrap_err().reason(), "schema_compilation");

        let bad_key = ModelDeclaration::new("B")
            .with_property(PropertyDecl::new("When", PropertyType::Datetime).key());
        assert!(compile(&[bad_key]).is_err());

        let dup_prop = ModelDeclaration::new("C")
            .with_property(PropertyDecl::new("x", PropertyType::Int32))
            .with_property(PropertyDecl::new("X", PropertyType::String));
        assert!(compile(&[dup_prop]).is_err());
    }

    #[test]
    fn test_relationship_columns_and_join_tables() {
        let compiled = compile(&[
            ModelDeclaration::new("Customer")
                .with_property(PropertyDecl::new("Code", PropertyType::String).key())
                .with_relationship(
                    RelationshipDecl::new(RelationshipType::OneToMany, "Order", "Orders")
                        .foreign_key("BuyerCode"),
                ),
            ModelDeclaration::new("Order")
                .with_property(PropertyDecl::new("OrderId", PropertyType::Int64).key())
                .with_relationship(RelationshipDecl::new(
                    RelationshipType::ManyToOne,
                    "Customer",
                    "Customer",
                ))
                .with_relationship(RelationshipDecl::new(
                    RelationshipType::ManyToMany,
                    "Product",
                    "Products",
                )),
            ModelDeclaration::new("Product")
                .with_property(PropertyDecl::new("Sku", PropertyType::String).key()),
        ])
        .unwrap();

        let order = compiled.catalog.get_table("Order").unwrap();
        let customer_id = order.column("CustomerId").unwrap();
        assert_eq!(customer_id.data_type, DataType::Text);
        assert!(customer_id.nullable);
        assert_eq!(order.column("BuyerCode").unwrap().data_type, DataType::Text);

        let join = compiled.catalog.get_table("Order_Products").unwrap();
        let names: Vec<&str> = join.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Order_key", "Product_key"]);
        assert_eq!(compiled.catalog.len(), 4);
    }

    #[test]
    fn test_missing_target_is_kept_unresolved() {
        let compiled = compile(&[ModelDeclaration::new("Order")
            .with_relationship(RelationshipDecl::new(
                RelationshipType::ManyToOne,
                "Ghost",
                "Ghost",
            ))
            .ignoring_missing_relationships()])
        .unwrap();
        let order = &compiled.descriptors[0];
        assert!(!order.navigations[0].resolved);
        assert!(order.field("GhostId").is_none());
    }
}
