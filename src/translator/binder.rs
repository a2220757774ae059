//! Member-access binding.
//!
//! The binder resolves `param.m1.m2...` against the row shape the parameter
//! ranges over. It never mutates the IR: when a reference navigation has not
//! been expanded in the current select yet, it reports a [`JoinRequest`] and
//! the translator adds the join before binding again.

use crate::model::{Model, Navigation, ValueType};
use crate::sql_ir::{PathSegment, SqlExpr};

use super::row_shape::{extend_path, EntityProjection, Expansions, RowShape};

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub owner: EntityProjection,
    pub navigation: Navigation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionBinding {
    pub owner: EntityProjection,
    pub navigation: Navigation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberBinding {
    Shape(RowShape),
    Join(JoinRequest),
    Collection(CollectionBinding),
    /// Not bindable on the server; the caller decides how to surface it
    NotBindable { chain: String, reason: String },
}

pub struct Binder<'a> {
    model: &'a Model,
}

impl<'a> Binder<'a> {
    pub fn new(model: &'a Model) -> Self {
        Binder { model }
    }

    /// Binds `members` starting from `root`, the shape `root_name` ranges over
    pub fn bind(
        &self,
        root_name: &str,
        root: &RowShape,
        members: &[&str],
        expansions: &Expansions,
    ) -> MemberBinding {
        let chain = |upto: usize| {
            std::iter::once(root_name)
                .chain(members[..=upto].iter().copied())
                .collect::<Vec<_>>()
                .join(".")
        };
        let not_bindable = |upto: usize, reason: String| MemberBinding::NotBindable {
            chain: chain(upto),
            reason,
        };

        let mut current = root.clone();
        for (i, member) in members.iter().enumerate() {
            let is_last = i + 1 == members.len();
            current = match current {
                RowShape::Entity(entity) => {
                    let Some(entity_type) = self.model.entity_type(&entity.entity_type) else {
                        return not_bindable(i, format!("unknown entity type '{}'", entity.entity_type));
                    };
                    if let Some(property) = entity_type.property(member) {
                        match entity.property(property) {
                            Some(expr) => RowShape::Scalar(expr),
                            None => {
                                return not_bindable(i, format!("property '{}' is not projected", member))
                            }
                        }
                    } else if let Some(navigation) = entity_type.navigation(member) {
                        if navigation.is_collection() {
                            if !is_last {
                                return not_bindable(
                                    i,
                                    format!("'{}' is a collection; use a query operator to reach its elements", member),
                                );
                            }
                            return MemberBinding::Collection(CollectionBinding {
                                owner: entity,
                                navigation: navigation.clone(),
                            });
                        }
                        if navigation.owned {
                            match self.owned_reference(&entity, navigation) {
                                Some(owned) => RowShape::Entity(owned),
                                None => {
                                    return not_bindable(i, format!("owned navigation '{}' is not projected", member))
                                }
                            }
                        } else if let Some(target) =
                            expansions.get(&(entity.instance, navigation.name.clone()))
                        {
                            RowShape::Entity(target.clone())
                        } else {
                            return MemberBinding::Join(JoinRequest {
                                owner: entity,
                                navigation: navigation.clone(),
                            });
                        }
                    } else {
                        return not_bindable(
                            i,
                            format!("no property or navigation '{}' on '{}'", member, entity.entity_type),
                        );
                    }
                }
                RowShape::Scalar(expr) if is_dynamic(&expr) => RowShape::Scalar(extend_path(
                    &expr,
                    PathSegment::Property(member.to_string()),
                    ValueType::Unknown,
                    true,
                )),
                RowShape::Scalar(expr) => {
                    return not_bindable(
                        i,
                        format!("scalar of type {:?} has no member '{}'", expr.value_type(), member),
                    )
                }
                RowShape::Object(fields) => match fields.into_iter().find(|(name, _)| name == member) {
                    Some((_, shape)) => shape,
                    None => return not_bindable(i, format!("anonymous object has no member '{}'", member)),
                },
                RowShape::Group { key, .. } if *member == "Key" => *key,
                RowShape::Group { .. } => {
                    return not_bindable(i, format!("a grouping exposes only 'Key', not '{}'", member))
                }
                RowShape::Collection { .. } => {
                    return not_bindable(i, format!("collection value has no member '{}'", member))
                }
            };
        }
        MemberBinding::Shape(current)
    }

    /// Owned reference navigation: a nested entity read from the owner's JSON
    fn owned_reference(&self, owner: &EntityProjection, navigation: &Navigation) -> Option<EntityProjection> {
        let target = self.model.entity_type(&navigation.target)?;
        let document = owner.member(&navigation.name, &navigation.column, ValueType::Json, true)?;
        let nullable = owner.nullable || navigation.kind != crate::model::NavigationKind::Required;
        Some(EntityProjection::for_document(target, document, owner.instance, nullable))
    }

    /// Array-valued expression behind an owned collection navigation
    pub fn owned_collection(&self, owner: &EntityProjection, navigation: &Navigation) -> Option<SqlExpr> {
        owner.member(&navigation.name, &navigation.column, ValueType::Array, true)
    }
}

/// Values whose members are read by JSON path rather than bound to the model
pub(crate) fn is_dynamic(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::DynamicField(field) => {
            matches!(field.value_type, ValueType::Json | ValueType::Unknown)
        }
        other => other.value_type() == ValueType::Json,
    }
}
