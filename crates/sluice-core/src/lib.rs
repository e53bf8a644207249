//! Sluice core: schema model, records, messages, the component contract and
//! the flow runtime.
//!
//! A flow is a graph of [`Component`] instances joined by links. Components
//! exchange [`Message`]s carrying batches of [`EntityData`] records or raw
//! text lines; the [`FlowRuntime`] drives their lifecycle and delivery.

mod binding;
mod component;
mod content;
mod error;
mod flow;
mod message;
mod model;
mod record;
mod registry;
mod runtime;
mod settings;
mod store;
mod target;
mod tracking;
mod transform;
mod value;

pub use binding::{AttributeBinding, BindingKeys, BindingSet, CollisionPolicy};
pub use component::{
    CancellationToken, Component, ComponentCategory, ComponentContext, ComponentDecl,
    ComponentState, ComponentStatistics,
};
pub use content::ContentSource;
pub use error::{CodecError, ComponentError, ConfigError};
pub use flow::{Flow, FlowError, FlowLink, FlowStep};
pub use message::{Message, MessageHeader, MessageType, Payload};
pub use model::{Attribute, Entity, Model, ModelError};
pub use record::{ChangeKind, EntityData};
pub use registry::{ComponentFactory, ComponentRegistry};
pub use runtime::{EdgeTracker, FlowOutcome, FlowRuntime, run_component};
pub use settings::{AttributeSetting, SettingDefinition, SettingType, Settings};
pub use store::{ExecutionRecord, ExecutionStore, MemoryExecutionStore, StepLog, StepRecord, StoreError};
pub use target::{CollectingTarget, MessageTarget, Router, RoutingError, Sequencer};
pub use tracking::{ExecutionStatus, ExecutionTracker, LogLevel, NoOpTracker, TracingTracker};
pub use transform::{Transform, TransformError, TransformInput, TransformRegistry};
pub use value::Value;

/// Setting names understood by the content source.
pub mod content_settings {
    pub use crate::content::{CONTENT, PATH, ROWS_PER_MESSAGE};
}
