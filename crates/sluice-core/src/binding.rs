//! Attribute format bindings: attribute → ordinal (+ optional transform).
//!
//! Built once from a step's attribute settings, sorted once by ordinal, and
//! then held as an immutable slice for the component's lifetime.

use crate::error::ConfigError;
use crate::model::{Attribute, Entity, Model};
use crate::settings::{AttributeSetting, parse_usize};
use crate::transform::{Transform, TransformRegistry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How to treat two attributes bound to the same ordinal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Raise a configuration error.
    #[default]
    Reject,
    /// Keep only the last-registered binding at that ordinal.
    LastWins,
}

impl CollisionPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(CollisionPolicy::Reject),
            "last_wins" | "last-wins" | "overwrite" => Some(CollisionPolicy::LastWins),
            _ => None,
        }
    }
}

/// Setting names used to read bindings out of attribute settings.
#[derive(Debug, Clone, Copy)]
pub struct BindingKeys<'a> {
    pub ordinal: &'a str,
    pub transform: &'a str,
}

/// One resolved binding.
#[derive(Debug, Clone)]
pub struct AttributeBinding {
    pub attribute: Attribute,
    pub entity: Entity,
    pub ordinal: usize,
    pub transform: Option<Transform>,
}

impl AttributeBinding {
    pub fn attribute_id(&self) -> &str {
        &self.attribute.id
    }
}

/// Bindings sorted ascending by ordinal.
///
/// Ordinals fix relative order only: the n-th binding owns the n-th token.
#[derive(Debug, Clone, Default)]
pub struct BindingSet {
    bindings: Arc<[AttributeBinding]>,
}

struct PendingBinding<'m> {
    entity: &'m Entity,
    attribute: &'m Attribute,
    ordinal: Option<usize>,
    transform: Option<String>,
}

impl BindingSet {
    /// Resolve attribute settings against a model.
    ///
    /// Settings with names other than `keys` are ignored. Settings are keyed
    /// by the attribute they resolve to, so ids differing only in case name
    /// the same binding. Unknown attributes, missing ordinals, unknown
    /// transforms and (under [`CollisionPolicy::Reject`]) shared ordinals are
    /// configuration errors.
    pub fn resolve(
        settings: &[AttributeSetting],
        keys: BindingKeys<'_>,
        model: &Model,
        transforms: &TransformRegistry,
        policy: CollisionPolicy,
    ) -> Result<Self, ConfigError> {
        let mut pending: IndexMap<&str, PendingBinding<'_>> = IndexMap::new();

        for setting in settings {
            let is_ordinal = setting.name.eq_ignore_ascii_case(keys.ordinal);
            let is_transform = setting.name.eq_ignore_ascii_case(keys.transform);
            if !is_ordinal && !(is_transform && !setting.value.trim().is_empty()) {
                continue;
            }
            let (entity, attribute) = model
                .resolve_attribute(&setting.attribute_id)
                .ok_or_else(|| ConfigError::UnknownAttribute(setting.attribute_id.clone()))?;
            let entry = pending
                .entry(attribute.id.as_str())
                .or_insert_with(|| PendingBinding {
                    entity,
                    attribute,
                    ordinal: None,
                    transform: None,
                });
            if is_ordinal {
                let ordinal = parse_usize(&setting.name, &setting.value)?;
                if entry.ordinal.replace(ordinal).is_some() {
                    return Err(ConfigError::DuplicateBinding(attribute.id.clone()));
                }
            } else {
                entry.transform = Some(setting.value.trim().to_string());
            }
        }

        let mut bindings = Vec::with_capacity(pending.len());
        for (attribute_id, entry) in pending {
            let ordinal = entry
                .ordinal
                .ok_or_else(|| ConfigError::MissingOrdinal(attribute_id.to_string()))?;
            let transform = entry
                .transform
                .map(|id| {
                    transforms
                        .get(&id)
                        .ok_or(ConfigError::UnknownTransform(id))
                })
                .transpose()?;
            bindings.push(AttributeBinding {
                attribute: entry.attribute.clone(),
                entity: entry.entity.clone(),
                ordinal,
                transform,
            });
        }

        // Stable: equal ordinals stay in registration order.
        bindings.sort_by_key(|b| b.ordinal);

        let mut resolved: Vec<AttributeBinding> = Vec::with_capacity(bindings.len());
        for binding in bindings {
            match resolved.last_mut() {
                Some(previous) if previous.ordinal == binding.ordinal => match policy {
                    CollisionPolicy::Reject => {
                        return Err(ConfigError::OrdinalCollision {
                            ordinal: binding.ordinal,
                            first: previous.attribute.id.clone(),
                            second: binding.attribute.id.clone(),
                        });
                    }
                    CollisionPolicy::LastWins => *previous = binding,
                },
                _ => resolved.push(binding),
            }
        }

        Ok(Self {
            bindings: resolved.into(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeBinding> {
        self.bindings.iter()
    }

    pub fn as_slice(&self) -> &[AttributeBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: BindingKeys<'static> = BindingKeys {
        ordinal: "ordinal",
        transform: "function",
    };

    fn model() -> Model {
        Model::new("m").entity(
            Entity::new("e", "E")
                .attribute("a", "A")
                .attribute("b", "B")
                .attribute("c", "C"),
        )
    }

    fn resolve(
        settings: &[AttributeSetting],
        policy: CollisionPolicy,
    ) -> Result<BindingSet, ConfigError> {
        BindingSet::resolve(
            settings,
            KEYS,
            &model(),
            &TransformRegistry::with_builtins(),
            policy,
        )
    }

    fn ids(set: &BindingSet) -> Vec<&str> {
        set.iter().map(|b| b.attribute_id()).collect()
    }

    #[test]
    fn test_sorted_by_ordinal() {
        let set = resolve(
            &[
                AttributeSetting::new("c", "ordinal", "30"),
                AttributeSetting::new("a", "ordinal", "100"),
                AttributeSetting::new("b", "ordinal", "5"),
            ],
            CollisionPolicy::Reject,
        )
        .unwrap();

        assert_eq!(ids(&set), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_transform_resolved() {
        let set = resolve(
            &[
                AttributeSetting::new("a", "function", "trim"),
                AttributeSetting::new("a", "ordinal", "1"),
            ],
            CollisionPolicy::Reject,
        )
        .unwrap();

        assert_eq!(set.as_slice()[0].transform.as_ref().unwrap().id(), "trim");
        assert_eq!(set.as_slice()[0].entity.id, "e");
    }

    #[test]
    fn test_collision_rejected() {
        let err = resolve(
            &[
                AttributeSetting::new("a", "ordinal", "1"),
                AttributeSetting::new("b", "ordinal", "1"),
            ],
            CollisionPolicy::Reject,
        )
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::OrdinalCollision {
                ordinal: 1,
                first: "a".into(),
                second: "b".into()
            }
        );
    }

    #[test]
    fn test_collision_last_wins() {
        let set = resolve(
            &[
                AttributeSetting::new("a", "ordinal", "1"),
                AttributeSetting::new("c", "ordinal", "0"),
                AttributeSetting::new("b", "ordinal", "1"),
            ],
            CollisionPolicy::LastWins,
        )
        .unwrap();

        assert_eq!(ids(&set), vec!["c", "b"]);
    }

    #[test]
    fn test_configuration_errors() {
        assert_eq!(
            resolve(&[AttributeSetting::new("zz", "ordinal", "1")], CollisionPolicy::Reject)
                .unwrap_err(),
            ConfigError::UnknownAttribute("zz".into())
        );
        assert_eq!(
            resolve(&[AttributeSetting::new("a", "function", "trim")], CollisionPolicy::Reject)
                .unwrap_err(),
            ConfigError::MissingOrdinal("a".into())
        );
        assert_eq!(
            resolve(
                &[
                    AttributeSetting::new("a", "ordinal", "1"),
                    AttributeSetting::new("a", "function", "nope"),
                ],
                CollisionPolicy::Reject
            )
            .unwrap_err(),
            ConfigError::UnknownTransform("nope".into())
        );
        assert_eq!(
            resolve(
                &[
                    AttributeSetting::new("a", "ordinal", "1"),
                    AttributeSetting::new("a", "ordinal", "2"),
                ],
                CollisionPolicy::Reject
            )
            .unwrap_err(),
            ConfigError::DuplicateBinding("a".into())
        );
        assert!(matches!(
            resolve(&[AttributeSetting::new("a", "ordinal", "x")], CollisionPolicy::Reject),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_ids_differing_in_case_bind_one_attribute() {
        assert_eq!(
            resolve(
                &[
                    AttributeSetting::new("A", "ordinal", "1"),
                    AttributeSetting::new("a", "ordinal", "2"),
                ],
                CollisionPolicy::LastWins
            )
            .unwrap_err(),
            ConfigError::DuplicateBinding("a".into())
        );

        let set = resolve(
            &[
                AttributeSetting::new("B", "function", "trim"),
                AttributeSetting::new("b", "ordinal", "4"),
            ],
            CollisionPolicy::Reject,
        )
        .unwrap();
        assert_eq!(ids(&set), vec!["b"]);
        assert!(set.as_slice()[0].transform.is_some());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(CollisionPolicy::parse("Last_Wins"), Some(CollisionPolicy::LastWins));
        assert_eq!(CollisionPolicy::parse("reject"), Some(CollisionPolicy::Reject));
        assert_eq!(CollisionPolicy::parse("merge"), None);
    }
}
