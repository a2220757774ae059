//! Immutable entity model.
//!
//! Built once by [`ModelConfig::build`](super::config::ModelConfig::build) and
//! shared read-only (`Arc<Model>`) by every compilation. All lookups go
//! through index tables constructed at build time.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Long,
    Double,
    Decimal,
    String,
    Bool,
    #[serde(rename = "datetime")]
    DateTime,
    Guid,
    /// Schema-less payload; members beyond it resolve to dynamic fields
    Json,
    /// Collection of primitives stored inline
    Array,
    /// Type not known statically (dynamic field reads, parameters)
    Unknown,
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Int | ValueType::Long | ValueType::Double | ValueType::Decimal
        )
    }

    /// Values that hold nested structure rather than a scalar
    pub fn is_structured(&self) -> bool {
        matches!(self, ValueType::Json | ValueType::Array)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationKind {
    Required,
    Optional,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub name: String,
    /// Column name, or JSON key for properties of owned entities
    pub column: String,
    pub value_type: ValueType,
    pub nullable: bool,
}

/// A relationship from the declaring entity type to `target`.
///
/// For reference navigations `foreign_key` lives on the declaring entity and
/// `principal_key` on the target; for collection navigations the foreign key
/// lives on the target and the principal key on the declaring entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Navigation {
    pub name: String,
    pub target: String,
    pub kind: NavigationKind,
    pub foreign_key: Vec<String>,
    pub principal_key: Vec<String>,
    /// Embedded in the owner's document or JSON column
    pub owned: bool,
    /// JSON key (owned navigations only)
    pub column: String,
}

impl Navigation {
    pub fn is_collection(&self) -> bool {
        self.kind == NavigationKind::Collection
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discriminator {
    pub property: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityType {
    pub name: String,
    pub table: Option<String>,
    pub schema: Option<String>,
    pub key: Vec<String>,
    pub owned: bool,
    pub discriminator: Option<Discriminator>,
    properties: Vec<Property>,
    navigations: Vec<Navigation>,
    #[serde(skip)]
    property_index: HashMap<String, usize>,
    #[serde(skip)]
    navigation_index: HashMap<String, usize>,
}

impl EntityType {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        table: Option<String>,
        schema: Option<String>,
        key: Vec<String>,
        owned: bool,
        discriminator: Option<Discriminator>,
        properties: Vec<Property>,
        navigations: Vec<Navigation>,
    ) -> Self {
        let property_index = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        let navigation_index = navigations
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        EntityType {
            name,
            table,
            schema,
            key,
            owned,
            discriminator,
            properties,
            navigations,
            property_index,
            navigation_index,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.property_index.get(name).map(|&i| &self.properties[i])
    }

    pub fn navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigation_index.get(name).map(|&i| &self.navigations[i])
    }

    /// Properties in declaration order
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn navigations(&self) -> &[Navigation] {
        &self.navigations
    }

    pub fn key_properties(&self) -> Vec<&Property> {
        self.key.iter().filter_map(|k| self.property(k)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub name: String,
    entity_types: BTreeMap<String, EntityType>,
    /// Entity set name -> entity type name
    entity_sets: BTreeMap<String, String>,
    /// Hex SHA-256 of the serialized model
    #[serde(skip)]
    fingerprint: String,
}

impl Model {
    pub(crate) fn new(
        name: String,
        entity_types: BTreeMap<String, EntityType>,
        entity_sets: BTreeMap<String, String>,
    ) -> Result<Self, serde_json::Error> {
        let mut model = Model {
            name,
            entity_types,
            entity_sets,
            fingerprint: String::new(),
        };
        let bytes = serde_json::to_vec(&model)?;
        model.fingerprint = hex::encode(Sha256::digest(&bytes));
        Ok(model)
    }

    /// Content fingerprint; two builds of the same definition agree, any
    /// change to a mapping or relationship yields a different value
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(name)
    }

    pub fn entity_type_for_set(&self, set: &str) -> Option<&EntityType> {
        self.entity_sets
            .get(set)
            .and_then(|name| self.entity_types.get(name))
    }

    /// (set name, entity type name) pairs in name order
    pub fn entity_sets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entity_sets
            .iter()
            .map(|(set, ty)| (set.as_str(), ty.as_str()))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entity_types.values()
    }
}
