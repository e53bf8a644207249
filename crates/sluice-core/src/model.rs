//! Logical schema: models, entities and attributes.
//!
//! The model describes data independently of any physical format. Ids are
//! stable; names are for humans and compare case-insensitively.

use crate::record::EntityData;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A named column of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    /// Id of the owning entity.
    pub entity_id: String,
    pub name: String,
    /// Optional type label (informational only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl Attribute {
    pub fn new(
        id: impl Into<String>,
        entity_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_id: entity_id.into(),
            name: name.into(),
            data_type: None,
        }
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }
}

/// A named logical record type with an ordered set of attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Add an attribute owned by this entity.
    pub fn attribute(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let attribute = Attribute::new(id, self.id.clone(), name);
        self.attributes.push(attribute);
        self
    }

    /// Add an attribute as given, keeping its owning-entity reference.
    pub fn push_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// The full logical schema available to a flow.
///
/// Read-only once a flow execution starts; shared behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Model {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            entities: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entity_by_id(&self, entity_id: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.id.eq_ignore_ascii_case(entity_id))
    }

    pub fn entity_by_name(&self, entity_name: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(entity_name))
    }

    pub fn attribute_by_id(&self, attribute_id: &str) -> Option<&Attribute> {
        self.attributes()
            .map(|(_, a)| a)
            .find(|a| a.id.eq_ignore_ascii_case(attribute_id))
    }

    /// Look up an attribute by name, disambiguated by its entity's name.
    pub fn attribute_by_name(&self, entity_name: &str, attribute_name: &str) -> Option<&Attribute> {
        self.entity_by_name(entity_name)?
            .attribute_by_name(attribute_name)
    }

    /// All attributes with the given name, across every entity.
    pub fn attributes_by_name(&self, attribute_name: &str) -> Vec<&Attribute> {
        self.attributes()
            .map(|(_, a)| a)
            .filter(|a| a.name.eq_ignore_ascii_case(attribute_name))
            .collect()
    }

    /// Resolve an attribute together with its owning entity.
    pub fn resolve_attribute(&self, attribute_id: &str) -> Option<(&Entity, &Attribute)> {
        let attribute = self.attribute_by_id(attribute_id)?;
        let entity = self.entity_by_id(&attribute.entity_id)?;
        Some((entity, attribute))
    }

    /// Iterate `(entity, attribute)` pairs in declared order.
    pub fn attributes(&self) -> impl Iterator<Item = (&Entity, &Attribute)> {
        self.entities
            .iter()
            .flat_map(|e| e.attributes.iter().map(move |a| (e, a)))
    }

    /// Check the model's referential integrity.
    ///
    /// Run at component start; a model that fails here never reaches the
    /// record path.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut entity_ids = HashSet::new();
        let mut entity_names = HashSet::new();
        let mut attribute_ids = HashSet::new();

        for entity in &self.entities {
            if !entity_ids.insert(entity.id.to_lowercase()) {
                return Err(ModelError::DuplicateEntityId(entity.id.clone()));
            }
            if !entity_names.insert(entity.name.to_lowercase()) {
                return Err(ModelError::DuplicateEntityName(entity.name.clone()));
            }

            let mut attribute_names = HashSet::new();
            for attribute in &entity.attributes {
                if !attribute_ids.insert(attribute.id.to_lowercase()) {
                    return Err(ModelError::DuplicateAttributeId(attribute.id.clone()));
                }
                if !attribute_names.insert(attribute.name.to_lowercase()) {
                    return Err(ModelError::DuplicateAttributeName {
                        entity: entity.name.clone(),
                        attribute: attribute.name.clone(),
                    });
                }
            }
        }

        for entity in &self.entities {
            for attribute in &entity.attributes {
                if attribute.entity_id.eq_ignore_ascii_case(&entity.id) {
                    continue;
                }
                return Err(if self.entity_by_id(&attribute.entity_id).is_some() {
                    ModelError::MisplacedAttribute {
                        attribute: attribute.id.clone(),
                        declared_in: entity.id.clone(),
                        owner: attribute.entity_id.clone(),
                    }
                } else {
                    ModelError::DanglingEntityReference {
                        attribute: attribute.id.clone(),
                        entity: attribute.entity_id.clone(),
                    }
                });
            }
        }

        Ok(())
    }

    /// Convert a record into a name-keyed row.
    ///
    /// Keys are attribute names, or `ENTITY.ATTRIBUTE` when qualified.
    /// Attribute ids unknown to this model are skipped.
    pub fn to_row(&self, data: &EntityData, qualify_with_entity_name: bool) -> IndexMap<String, Value> {
        let mut row = IndexMap::with_capacity(data.len());
        for (attribute_id, value) in data.iter() {
            let Some((entity, attribute)) = self.resolve_attribute(attribute_id) else {
                continue;
            };
            let key = if qualify_with_entity_name {
                format!("{}.{}", entity.name, attribute.name)
            } else {
                attribute.name.clone()
            };
            row.insert(key, value.clone());
        }
        row
    }
}

/// Referential-integrity problems found by [`Model::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("duplicate entity id: {0}")]
    DuplicateEntityId(String),

    #[error("duplicate entity name: {0}")]
    DuplicateEntityName(String),

    #[error("duplicate attribute id: {0}")]
    DuplicateAttributeId(String),

    #[error("duplicate attribute name {attribute} in entity {entity}")]
    DuplicateAttributeName { entity: String, attribute: String },

    #[error("attribute {attribute} references unknown entity {entity}")]
    DanglingEntityReference { attribute: String, entity: String },

    #[error("attribute {attribute} is declared in entity {declared_in} but owned by {owner}")]
    MisplacedAttribute {
        attribute: String,
        declared_in: String,
        owner: String,
    },
}
