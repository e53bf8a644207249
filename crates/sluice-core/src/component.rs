//! Component contract.
//!
//! A component is one processing node of a flow. The runtime drives each
//! instance through `start`, then `handle` once per inbound message, then
//! `stop`. Calls on one instance never overlap.

use crate::error::{ComponentError, ConfigError};
use crate::flow::FlowStep;
use crate::message::{Message, MessageType};
use crate::model::Model;
use crate::settings::{AttributeSetting, SettingDefinition, Settings};
use crate::target::MessageTarget;
use crate::tracking::{ExecutionTracker, LogLevel, NoOpTracker};
use crate::transform::TransformRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A pluggable processing node.
pub trait Component: Send {
    /// Declaration of this component type.
    fn decl(&self) -> &ComponentDecl;

    /// Resolve and validate configuration. Called once.
    ///
    /// Every configuration problem must surface here as
    /// [`ComponentError::Configuration`], never later from `handle`.
    fn start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError>;

    /// Process one inbound message, sending zero or more messages to `target`.
    ///
    /// When `message` is flagged last, the component must put exactly one
    /// message flagged last after all its other output.
    fn handle(
        &mut self,
        message: &Message,
        target: &mut dyn MessageTarget,
        unit_of_work_boundary: bool,
    ) -> Result<(), ComponentError>;

    /// Release resources. Called exactly once, even after a failed start.
    fn stop(&mut self) {}
}

/// What a component instance sees of its step and execution.
#[derive(Clone)]
pub struct ComponentContext {
    pub execution_id: String,
    pub step: Arc<FlowStep>,
    pub input_model: Option<Arc<Model>>,
    pub output_model: Option<Arc<Model>>,
    pub tracker: Arc<dyn ExecutionTracker>,
    pub transforms: Arc<TransformRegistry>,
    pub cancel: CancellationToken,
}

impl ComponentContext {
    /// Context with no models, no tracking, the built-in transforms and a
    /// fresh cancellation token.
    pub fn new(execution_id: impl Into<String>, step: impl Into<Arc<FlowStep>>) -> Self {
        Self {
            execution_id: execution_id.into(),
            step: step.into(),
            input_model: None,
            output_model: None,
            tracker: Arc::new(NoOpTracker),
            transforms: Arc::new(TransformRegistry::with_builtins()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_input_model(mut self, model: impl Into<Arc<Model>>) -> Self {
        self.input_model = Some(model.into());
        self
    }

    pub fn with_output_model(mut self, model: impl Into<Arc<Model>>) -> Self {
        self.output_model = Some(model.into());
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ExecutionTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_transforms(mut self, transforms: Arc<TransformRegistry>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn step_id(&self) -> &str {
        &self.step.id
    }

    pub fn settings(&self) -> &Settings {
        &self.step.settings
    }

    pub fn attribute_settings(&self) -> &[AttributeSetting] {
        &self.step.attribute_settings
    }

    /// The input model, validated.
    pub fn require_input_model(&self) -> Result<Arc<Model>, ConfigError> {
        self.require_model(self.input_model.as_ref(), "input")
    }

    /// The output model, validated.
    pub fn require_output_model(&self) -> Result<Arc<Model>, ConfigError> {
        self.require_model(self.output_model.as_ref(), "output")
    }

    fn require_model(
        &self,
        model: Option<&Arc<Model>>,
        direction: &str,
    ) -> Result<Arc<Model>, ConfigError> {
        let model = model.ok_or_else(|| ConfigError::MissingModel {
            step: self.step.id.clone(),
            direction: direction.to_string(),
        })?;
        model.validate()?;
        Ok(Arc::clone(model))
    }

    /// Send a log line to the execution tracker, tagged with this step.
    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        self.tracker
            .log(&self.execution_id, level, Some(&self.step.id), message.as_ref());
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("execution_id", &self.execution_id)
            .field("step", &self.step.id)
            .field("input_model", &self.input_model.as_ref().map(|m| &m.id))
            .field("output_model", &self.output_model.as_ref().map(|m| &m.id))
            .finish()
    }
}

/// Lifecycle state of a component instance, tracked by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Created,
    Started,
    Handling,
    Stopped,
}

/// Message and item counters for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatistics {
    pub inbound_messages: u64,
    /// Records or lines received.
    pub inbound_items: u64,
    pub outbound_messages: u64,
    /// Records or lines sent.
    pub outbound_items: u64,
}

impl ComponentStatistics {
    pub fn record_inbound(&mut self, message: &Message) {
        self.inbound_messages += 1;
        self.inbound_items += message.payload().len() as u64;
    }

    pub fn record_outbound(&mut self, message: &Message) {
        self.outbound_messages += 1;
        self.outbound_items += message.payload().len() as u64;
    }
}

/// Broad role of a component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentCategory {
    Source,
    Parser,
    Formatter,
    Transformer,
    Sink,
}

impl fmt::Display for ComponentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentCategory::Source => "source",
            ComponentCategory::Parser => "parser",
            ComponentCategory::Formatter => "formatter",
            ComponentCategory::Transformer => "transformer",
            ComponentCategory::Sink => "sink",
        })
    }
}

/// Declaration of a component type: what it consumes, what it produces, and
/// which settings it reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDecl {
    /// Type name used in flow definitions.
    pub type_name: String,
    #[serde(default)]
    pub description: String,
    pub category: ComponentCategory,
    pub input: MessageType,
    pub output: MessageType,
    #[serde(default)]
    pub settings: Vec<SettingDefinition>,
    #[serde(default)]
    pub attribute_settings: Vec<SettingDefinition>,
}

impl ComponentDecl {
    pub fn new(
        type_name: impl Into<String>,
        category: ComponentCategory,
        input: MessageType,
        output: MessageType,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            description: String::new(),
            category,
            input,
            output,
            settings: Vec::new(),
            attribute_settings: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn setting(mut self, definition: SettingDefinition) -> Self {
        self.settings.push(definition);
        self
    }

    pub fn attribute_setting(mut self, definition: SettingDefinition) -> Self {
        self.attribute_settings.push(definition);
        self
    }

    /// Check a step's flat settings against the declared definitions.
    pub fn check_settings(&self, settings: &Settings) -> Result<(), ConfigError> {
        self.settings.iter().try_for_each(|d| d.check(settings))
    }
}

/// Shared cancellation flag.
///
/// A child token is cancelled on its own or together with its parent;
/// cancelling a child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh token that also observes this one.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.flag)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::SeqCst))
    }

    /// `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self) -> Result<(), ComponentError> {
        if self.is_cancelled() {
            Err(ComponentError::Cancelled)
        } else {
            Ok(())
        }
    }
}
