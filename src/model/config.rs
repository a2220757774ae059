//! YAML model definitions and the validating model builder.
//!
//! ```yaml
//! name: shop
//! entities:
//!   - name: Customer
//!     table: Customers
//!     key: [Id]
//!     properties:
//!       - { name: Id, type: int }
//!       - { name: Name, type: string }
//!     navigations:
//!       - { name: Orders, target: Order, kind: collection, foreign_key: [CustomerId] }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::ModelError;
use super::schema::{
    Discriminator, EntityType, Model, Navigation, NavigationKind, Property, ValueType,
};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    /// Query root name; defaults to the table name
    #[serde(default)]
    pub entity_set: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    /// Owned types live inside their owner's document or JSON column
    #[serde(default)]
    pub owned: bool,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
    #[serde(default)]
    pub navigations: Vec<NavigationConfig>,
    #[serde(default)]
    pub discriminator: Option<DiscriminatorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    pub name: String,
    pub target: String,
    pub kind: NavigationKind,
    #[serde(default)]
    pub foreign_key: Vec<String>,
    /// Defaults to the principal entity's primary key
    #[serde(default)]
    pub principal_key: Vec<String>,
    #[serde(default)]
    pub owned: bool,
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscriminatorConfig {
    pub property: String,
    pub value: String,
}

impl ModelConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let contents = fs::read_to_string(path).map_err(|e| ModelError::ReadError {
            error: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ModelError> {
        serde_yaml::from_str(yaml).map_err(|e| ModelError::ParseError {
            error: e.to_string(),
        })
    }

    /// Validates the definition and freezes it into an immutable [`Model`]
    pub fn build(&self) -> Result<Model, ModelError> {
        self.validate_names()?;

        let by_name: BTreeMap<&str, &EntityConfig> =
            self.entities.iter().map(|e| (e.name.as_str(), e)).collect();

        let mut entity_types = BTreeMap::new();
        let mut entity_sets: BTreeMap<String, String> = BTreeMap::new();

        for entity in &self.entities {
            let entity_type = build_entity(entity, &by_name)?;

            if !entity.owned {
                let set = entity
                    .entity_set
                    .clone()
                    .or_else(|| entity.table.clone())
                    .unwrap_or_else(|| entity.name.clone());
                if let Some(first) = entity_sets.get(&set) {
                    return Err(ModelError::DuplicateEntitySet {
                        set,
                        first: first.clone(),
                        second: entity.name.clone(),
                    });
                }
                entity_sets.insert(set, entity.name.clone());
            }

            entity_types.insert(entity.name.clone(), entity_type);
        }

        Model::new(self.name.clone(), entity_types, entity_sets).map_err(|e| ModelError::FingerprintError {
            model: self.name.clone(),
            error: e.to_string(),
        })
    }

    fn validate_names(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            check_identifier(&entity.name, "entity type name")?;
            if !seen.insert(entity.name.as_str()) {
                return Err(ModelError::DuplicateEntity {
                    name: entity.name.clone(),
                });
            }

            let mut members = HashSet::new();
            for member in entity
                .properties
                .iter()
                .map(|p| &p.name)
                .chain(entity.navigations.iter().map(|n| &n.name))
            {
                check_identifier(member, &format!("members of `{}`", entity.name))?;
                if !members.insert(member.as_str()) {
                    return Err(ModelError::DuplicateMember {
                        entity: entity.name.clone(),
                        member: member.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_identifier(identifier: &str, context: &str) -> Result<(), ModelError> {
    if IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(ModelError::InvalidIdentifier {
            identifier: identifier.to_string(),
            context: context.to_string(),
        })
    }
}

fn require_properties(
    entity: &EntityConfig,
    names: &[String],
    context: &str,
) -> Result<(), ModelError> {
    for name in names {
        if !entity.properties.iter().any(|p| &p.name == name) {
            return Err(ModelError::unknown_property_with_context(
                &entity.name,
                name,
                context,
            ));
        }
    }
    Ok(())
}

fn build_entity(
    entity: &EntityConfig,
    by_name: &BTreeMap<&str, &EntityConfig>,
) -> Result<EntityType, ModelError> {
    if !entity.owned {
        if entity.key.is_empty() {
            return Err(ModelError::MissingKey {
                entity: entity.name.clone(),
            });
        }
        require_properties(entity, &entity.key, "primary key")?;
    }

    let properties = entity
        .properties
        .iter()
        .map(|p| Property {
            name: p.name.clone(),
            column: p.column.clone().unwrap_or_else(|| p.name.clone()),
            value_type: p.value_type,
            nullable: p.nullable,
        })
        .collect();

    let mut navigations = Vec::with_capacity(entity.navigations.len());
    for nav in &entity.navigations {
        navigations.push(build_navigation(entity, nav, by_name)?);
    }

    let discriminator = match &entity.discriminator {
        Some(d) => {
            require_properties(entity, std::slice::from_ref(&d.property), "discriminator")?;
            Some(Discriminator {
                property: d.property.clone(),
                value: d.value.clone(),
            })
        }
        None => None,
    };

    let table = if entity.owned {
        None
    } else {
        Some(entity.table.clone().unwrap_or_else(|| entity.name.clone()))
    };

    Ok(EntityType::new(
        entity.name.clone(),
        table,
        entity.schema.clone(),
        entity.key.clone(),
        entity.owned,
        discriminator,
        properties,
        navigations,
    ))
}

fn build_navigation(
    entity: &EntityConfig,
    nav: &NavigationConfig,
    by_name: &BTreeMap<&str, &EntityConfig>,
) -> Result<Navigation, ModelError> {
    let target = by_name
        .get(nav.target.as_str())
        .ok_or_else(|| ModelError::UnknownNavigationTarget {
            entity: entity.name.clone(),
            navigation: nav.name.clone(),
            target: nav.target.clone(),
        })?;

    if nav.owned != target.owned {
        let message = if nav.owned {
            format!("owned navigation targets non-owned type `{}`", target.name)
        } else {
            format!("owned type `{}` must be reached through an owned navigation", target.name)
        };
        return Err(ModelError::ownership_with_context(&entity.name, &nav.name, message));
    }

    if nav.owned {
        return Ok(Navigation {
            name: nav.name.clone(),
            target: nav.target.clone(),
            kind: nav.kind,
            foreign_key: Vec::new(),
            principal_key: Vec::new(),
            owned: true,
            column: nav.column.clone().unwrap_or_else(|| nav.name.clone()),
        });
    }

    if entity.owned {
        return Err(ModelError::ownership_with_context(
            &entity.name,
            &nav.name,
            "owned types may only declare owned navigations",
        ));
    }

    // Reference navigations carry the foreign key on the declaring side,
    // collections on the target side.
    let (dependent, principal) = if nav.kind == NavigationKind::Collection {
        (*target, entity)
    } else {
        (entity, *target)
    };

    if nav.foreign_key.is_empty() {
        return Err(ModelError::unknown_property_with_context(
            &dependent.name,
            "<none>",
            format!("navigation `{}.{}` declares no foreign key", entity.name, nav.name),
        ));
    }
    require_properties(
        dependent,
        &nav.foreign_key,
        &format!("foreign key of `{}.{}`", entity.name, nav.name),
    )?;

    let principal_key = if nav.principal_key.is_empty() {
        principal.key.clone()
    } else {
        nav.principal_key.clone()
    };
    require_properties(
        principal,
        &principal_key,
        &format!("principal key of `{}.{}`", entity.name, nav.name),
    )?;

    if principal_key.len() != nav.foreign_key.len() {
        return Err(ModelError::KeyArityMismatch {
            entity: entity.name.clone(),
            navigation: nav.name.clone(),
            expected: principal_key.len(),
            found: nav.foreign_key.len(),
        });
    }

    Ok(Navigation {
        name: nav.name.clone(),
        target: nav.target.clone(),
        kind: nav.kind,
        foreign_key: nav.foreign_key.clone(),
        principal_key,
        owned: false,
        column: nav.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: &str = r#"
name: shop
entities:
  - name: Customer
    table: Customers
    key: [Id]
    properties:
      - { name: Id, type: int }
      - { name: Name, type: string }
    navigations:
      - { name: Orders, target: Order, kind: collection, foreign_key: [CustomerId] }
  - name: Order
    table: Orders
    key: [Id]
    properties:
      - { name: Id, type: int }
      - { name: CustomerId, type: int }
    navigations:
      - { name: Customer, target: Customer, kind: required, foreign_key: [CustomerId] }
"#;

    #[test]
    fn test_build_valid_model() {
        let model = ModelConfig::from_yaml_str(SHOP).unwrap().build().unwrap();
        let order = model.entity_type_for_set("Orders").unwrap();
        assert_eq!(order.name, "Order");
        let nav = order.navigation("Customer").unwrap();
        assert_eq!(nav.principal_key, vec!["Id".to_string()]);
        assert_eq!(order.property("CustomerId").unwrap().column, "CustomerId");
        assert!(model.entity_type_for_set("Order").is_none());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let first = ModelConfig::from_yaml_str(SHOP).unwrap().build().unwrap();
        let again = ModelConfig::from_yaml_str(SHOP).unwrap().build().unwrap();
        assert_eq!(first.fingerprint(), again.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);

        let remapped = SHOP.replace("table: Orders", "table: SalesOrders");
        let changed = ModelConfig::from_yaml_str(&remapped).unwrap().build().unwrap();
        assert_eq!(changed.name, first.name);
        assert_ne!(changed.fingerprint(), first.fingerprint());
    }

    #[test]
    fn test_unknown_navigation_target() {
        let yaml = SHOP.replace("target: Customer,", "target: Client,");
        let err = ModelConfig::from_yaml_str(&yaml).unwrap().build().unwrap_err();
        assert!(matches!(err, ModelError::UnknownNavigationTarget { ref target, .. } if target == "Client"));
    }

    #[test]
    fn test_unknown_foreign_key_property() {
        let yaml = SHOP.replace("foreign_key: [CustomerId] }\n  - name: Order", "foreign_key: [OwnerId] }\n  - name: Order");
        let err = ModelConfig::from_yaml_str(&yaml).unwrap().build().unwrap_err();
        match err {
            ModelError::UnknownProperty { entity, property, .. } => {
                assert_eq!(entity, "Order");
                assert_eq!(property, "OwnerId");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_key() {
        let yaml = SHOP.replacen("key: [Id]", "key: []", 1);
        let err = ModelConfig::from_yaml_str(&yaml).unwrap().build().unwrap_err();
        assert_eq!(
            err,
            ModelError::MissingKey {
                entity: "Customer".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_member() {
        let yaml = SHOP.replacen(
            "- { name: Name, type: string }",
            "- { name: Name, type: string }\n      - { name: Orders, type: int }",
            1,
        );
        let err = ModelConfig::from_yaml_str(&yaml).unwrap().build().unwrap_err();
        assert!(matches!(err, ModelError::DuplicateMember { .. }));
    }

    #[test]
    fn test_key_arity_mismatch() {
        let yaml = SHOP.replace(
            "kind: required, foreign_key: [CustomerId] }",
            "kind: required, foreign_key: [CustomerId, Id] }",
        );
        let err = ModelConfig::from_yaml_str(&yaml).unwrap().build().unwrap_err();
        assert!(matches!(
            err,
            ModelError::KeyArityMismatch {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_identifier() {
        let yaml = SHOP.replace("{ name: Name, type: string }", "{ name: \"Full Name\", type: string }");
        let err = ModelConfig::from_yaml_str(&yaml).unwrap().build().unwrap_err();
        assert!(matches!(err, ModelError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_owned_navigation_must_target_owned_type() {
        let yaml = r#"
name: docs
entities:
  - name: Customer
    key: [Id]
    properties:
      - { name: Id, type: int }
    navigations:
      - { name: Address, target: Address, kind: required, owned: true }
  - name: Address
    key: [Id]
    properties:
      - { name: Id, type: int }
"#;
        let err = ModelConfig::from_yaml_str(yaml).unwrap().build().unwrap_err();
        assert!(matches!(err, ModelError::OwnershipMismatch { .. }));
    }

    #[test]
    fn test_owned_types_are_not_query_roots() {
        let yaml = r#"
name: docs
entities:
  - name: Customer
    key: [Id]
    properties:
      - { name: Id, type: int }
    navigations:
      - { name: Address, target: Address, kind: required, owned: true, column: addr }
  - name: Address
    owned: true
    properties:
      - { name: City, type: string }
"#;
        let model = ModelConfig::from_yaml_str(yaml).unwrap().build().unwrap();
        assert!(model.entity_type_for_set("Address").is_none());
        let customer = model.entity_type_for_set("Customer").unwrap();
        assert_eq!(customer.navigation("Address").unwrap().column, "addr");
        assert!(model.entity_type("Address").unwrap().table.is_none());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = ModelConfig::from_yaml_str("name: [").unwrap_err();
        assert!(matches!(err, ModelError::ParseError { .. }));
    }
}
