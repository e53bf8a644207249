//! Flow definitions.
//!
//! A flow is a directed acyclic graph of steps joined by links. Flows are
//! serializable and load from JSON, YAML or TOML:
//!
//! ```yaml
//! id: orders
//! models:
//!   - id: m
//!     entities: [...]
//! steps:
//!   - id: read
//!     type: content
//!     settings: { content: "a,b" }
//!   - id: parse
//!     type: parse-delimited
//!     output_model: m
//! links:
//!   - { from: read, to: parse }
//! ```

use crate::component::ComponentDecl;
use crate::error::{ComponentError, ConfigError};
use crate::message::MessageType;
use crate::model::Model;
use crate::registry::ComponentRegistry;
use crate::settings::{AttributeSetting, Settings};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A complete flow definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub links: Vec<FlowLink>,
}

/// A component instance placed in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Registered component type name.
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub attribute_settings: Vec<AttributeSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_model: Option<String>,
    /// Fail when this step emits output but nothing is linked downstream.
    #[serde(default)]
    pub require_target: bool,
}

/// A directed edge between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLink {
    pub from: String,
    pub to: String,
}

impl FlowStep {
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            component_type: component_type.into(),
            settings: Settings::new(),
            attribute_settings: Vec::new(),
            input_model: None,
            output_model: None,
            require_target: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(name, value);
        self
    }

    pub fn attribute_setting(
        mut self,
        attribute_id: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attribute_settings
            .push(AttributeSetting::new(attribute_id, name, value));
        self
    }

    pub fn input_model(mut self, model_id: impl Into<String>) -> Self {
        self.input_model = Some(model_id.into());
        self
    }

    pub fn output_model(mut self, model_id: impl Into<String>) -> Self {
        self.output_model = Some(model_id.into());
        self
    }

    pub fn require_target(mut self) -> Self {
        self.require_target = true;
        self
    }

    /// Name for display: the step name, or its id when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

impl Flow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    pub fn step(mut self, step: FlowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn link(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.links.push(FlowLink {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn step_by_id(&self, step_id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn model_by_id(&self, model_id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Ids of steps linked into `step_id`, in link order.
    pub fn upstream(&self, step_id: &str) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| l.to == step_id)
            .map(|l| l.from.as_str())
            .collect()
    }

    /// Ids of steps `step_id` links to, in link order.
    pub fn downstream(&self, step_id: &str) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| l.from == step_id)
            .map(|l| l.to.as_str())
            .collect()
    }

    /// Steps with no inbound links.
    pub fn heads(&self) -> impl Iterator<Item = &FlowStep> {
        self.steps
            .iter()
            .filter(|s| !self.links.iter().any(|l| l.to == s.id))
    }

    /// Steps with no outbound links.
    pub fn terminals(&self) -> impl Iterator<Item = &FlowStep> {
        self.steps
            .iter()
            .filter(|s| !self.links.iter().any(|l| l.from == s.id))
    }

    /// Steps in dependency order (every step after all its upstreams).
    pub fn topological_order(&self) -> Result<Vec<&FlowStep>, FlowError> {
        let mut indegree: IndexMap<&str, usize> =
            self.steps.iter().map(|s| (s.id.as_str(), 0)).collect();
        for link in &self.links {
            if let Some(count) = indegree.get_mut(link.to.as_str()) {
                *count += 1;
            }
        }

        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.reverse();

        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(id) = ready.pop() {
            if let Some(step) = self.step_by_id(id) {
                order.push(step);
            }
            for next in self.downstream(id) {
                if let Some(count) = indegree.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(next);
                    }
                }
            }
        }

        if order.len() != self.steps.len() {
            let placed: HashSet<&str> = order.iter().map(|s| s.id.as_str()).collect();
            let stuck = self
                .steps
                .iter()
                .find(|s| !placed.contains(s.id.as_str()))
                .map(|s| s.id.clone())
                .unwrap_or_default();
            return Err(FlowError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Check the flow's structure against the registered component types.
    ///
    /// Covers unique step ids, known link ends, acyclicity, known component
    /// types and model references, declared settings, and payload type
    /// compatibility along every link.
    pub fn validate(&self, registry: &ComponentRegistry) -> Result<(), FlowError> {
        if self.steps.is_empty() {
            return Err(FlowError::EmptyFlow(self.id.clone()));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(FlowError::DuplicateStep(step.id.clone()));
            }
        }
        let mut model_ids = HashSet::new();
        for model in &self.models {
            if !model_ids.insert(model.id.as_str()) {
                return Err(FlowError::DuplicateModel(model.id.clone()));
            }
        }

        let mut links = HashSet::new();
        for link in &self.links {
            if !links.insert((link.from.as_str(), link.to.as_str())) {
                return Err(FlowError::DuplicateLink {
                    from: link.from.clone(),
                    to: link.to.clone(),
                });
            }
            for end in [&link.from, &link.to] {
                if !ids.contains(end.as_str()) {
                    return Err(FlowError::UnknownStep(end.clone()));
                }
            }
            if link.from == link.to {
                return Err(FlowError::Cycle(link.from.clone()));
            }
        }
        self.topological_order()?;

        for step in &self.steps {
            let decl = registry
                .get_decl(&step.component_type)
                .ok_or_else(|| FlowError::UnknownComponentType {
                    step: step.id.clone(),
                    component_type: step.component_type.clone(),
                })?;
            for model_id in [&step.input_model, &step.output_model].into_iter().flatten() {
                if self.model_by_id(model_id).is_none() {
                    return Err(FlowError::UnknownModel {
                        step: step.id.clone(),
                        model: model_id.clone(),
                    });
                }
            }
            decl.check_settings(&step.settings)
                .map_err(|source| FlowError::InvalidSettings {
                    step: step.id.clone(),
                    source,
                })?;
        }

        for link in &self.links {
            let produced = self.step_type(registry, &link.from).map(|d| d.output);
            let expected = self.step_type(registry, &link.to).map(|d| d.input);
            match (produced, expected) {
                (Some(produced), Some(expected)) if !expected.accepts(produced) => {
                    return Err(FlowError::IncompatibleLink {
                        from: link.from.clone(),
                        to: link.to.clone(),
                        produced,
                        expected,
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn step_type<'r>(
        &self,
        registry: &'r ComponentRegistry,
        step_id: &str,
    ) -> Option<&'r ComponentDecl> {
        self.step_by_id(step_id)
            .and_then(|s| registry.get_decl(&s.component_type))
    }

    /// Parse a flow from bytes, choosing the format from the path's extension
    /// (YAML when unknown).
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, FlowError> {
        let format = path.and_then(detect_format).unwrap_or("yaml");
        Self::from_bytes_format(data, format)
    }

    /// Parse a flow from bytes in an explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, FlowError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| FlowError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| FlowError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| FlowError::Parse(format!("Invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| FlowError::Parse(e.to_string()))
            }
            _ => Err(FlowError::Parse(format!("Unsupported flow format: {}", format))),
        }
    }

    /// Serialize the flow.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, FlowError> {
        match format {
            "json" => serde_json::to_vec_pretty(self).map_err(|e| FlowError::Parse(e.to_string())),
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(String::into_bytes)
                .map_err(|e| FlowError::Parse(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(String::into_bytes)
                .map_err(|e| FlowError::Parse(e.to_string())),
            _ => Err(FlowError::Parse(format!("Unsupported flow format: {}", format))),
        }
    }
}

fn detect_format(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "toml" => Some("toml"),
        _ => None,
    }
}

/// Errors from loading, validating or running a flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("failed to parse flow: {0}")]
    Parse(String),

    #[error("flow '{0}' has no steps")]
    EmptyFlow(String),

    #[error("duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("duplicate model id: {0}")]
    DuplicateModel(String),

    #[error("steps '{from}' and '{to}' are linked more than once")]
    DuplicateLink { from: String, to: String },

    #[error("link references unknown step '{0}'")]
    UnknownStep(String),

    #[error("flow contains a cycle through step '{0}'")]
    Cycle(String),

    #[error("step '{step}' uses unknown component type '{component_type}'")]
    UnknownComponentType { step: String, component_type: String },

    #[error("step '{step}' references unknown model '{model}'")]
    UnknownModel { step: String, model: String },

    #[error("link {from} -> {to}: '{to}' expects {expected} but '{from}' produces {produced}")]
    IncompatibleLink {
        from: String,
        to: String,
        produced: MessageType,
        expected: MessageType,
    },

    #[error("step '{step}' has invalid settings: {source}")]
    InvalidSettings {
        step: String,
        #[source]
        source: ConfigError,
    },

    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: ComponentError,
    },

    #[error("execution cancelled")]
    Cancelled,
}
