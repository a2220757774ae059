//! Row shapes: what the current select's rows mean to the source query.

use std::collections::HashMap;

use crate::model::{EntityType, Property, ValueType};
use crate::sql_ir::{PathSegment, SelectExpression, Shaper, SqlExpr};

/// How an entity's properties are read
#[derive(Debug, Clone, PartialEq)]
pub enum EntityStorage {
    /// One expression per member (properties, then owned JSON columns)
    Columns(Vec<(String, SqlExpr)>),
    /// A document or JSON object; members are read by path
    Document(SqlExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityProjection {
    pub entity_type: String,
    /// Distinguishes two occurrences of the same entity type in one query
    pub instance: u32,
    pub storage: EntityStorage,
    /// Reached through an outer join
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowShape {
    Entity(EntityProjection),
    Scalar(SqlExpr),
    Object(Vec<(String, RowShape)>),
    /// Result of GroupBy before projection
    Group {
        key: Box<RowShape>,
        element: Box<RowShape>,
    },
    /// A collection materialized as a single array value
    Collection { value: SqlExpr, element: Shaper },
}

/// Navigation joins already added to a select, by (owner instance, navigation)
pub type Expansions = HashMap<(u32, String), EntityProjection>;

/// A select together with the meaning of its rows
#[derive(Debug, Clone)]
pub struct ShapedQuery {
    pub select: SelectExpression,
    pub shape: RowShape,
    pub expansions: Expansions,
}

impl ShapedQuery {
    pub fn new(select: SelectExpression, shape: RowShape) -> Self {
        ShapedQuery {
            select,
            shape,
            expansions: HashMap::new(),
        }
    }
}

/// Appends a path segment to a JSON-valued expression. A member of a whole
/// document source is a plain column read (`c["Name"]`).
pub fn extend_path(base: &SqlExpr, segment: PathSegment, value_type: ValueType, nullable: bool) -> SqlExpr {
    match (base, segment) {
        (SqlExpr::SourceRef(source), PathSegment::Property(name)) => {
            SqlExpr::column(source.alias.clone(), name, value_type, nullable)
        }
        (SqlExpr::DynamicField(field), segment) => {
            let mut path = field.path.clone();
            path.push(segment);
            SqlExpr::dynamic_field((*field.base).clone(), path, value_type)
        }
        (base, segment) => SqlExpr::dynamic_field(base.clone(), vec![segment], value_type),
    }
}

impl EntityProjection {
    /// Column-backed projection over a table alias
    pub fn for_table(entity: &EntityType, alias: &str, instance: u32, nullable: bool) -> Self {
        let mut members: Vec<(String, SqlExpr)> = entity
            .properties()
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    SqlExpr::column(alias, p.column.clone(), p.value_type, p.nullable || nullable),
                )
            })
            .collect();
        members.extend(entity.navigations().iter().filter(|n| n.owned).map(|n| {
            (
                n.name.clone(),
                SqlExpr::column(alias, n.column.clone(), ValueType::Json, true),
            )
        }));
        EntityProjection {
            entity_type: entity.name.clone(),
            instance,
            storage: EntityStorage::Columns(members),
            nullable,
        }
    }

    pub fn for_document(entity: &EntityType, document: SqlExpr, instance: u32, nullable: bool) -> Self {
        EntityProjection {
            entity_type: entity.name.clone(),
            instance,
            storage: EntityStorage::Document(document),
            nullable,
        }
    }

    /// Reads a stored member (property column or owned JSON key)
    pub fn member(&self, name: &str, column: &str, value_type: ValueType, nullable: bool) -> Option<SqlExpr> {
        match &self.storage {
            EntityStorage::Columns(members) => members
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, expr)| expr.clone()),
            EntityStorage::Document(base) => Some(extend_path(
                base,
                PathSegment::Property(column.to_string()),
                value_type,
                nullable || self.nullable,
            )),
        }
    }

    pub fn property(&self, property: &Property) -> Option<SqlExpr> {
        self.member(&property.name, &property.column, property.value_type, property.nullable)
    }
}
