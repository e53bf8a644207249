//! Registry of component types.

use crate::component::{Component, ComponentDecl};
use crate::content::ContentSource;
use indexmap::IndexMap;
use std::sync::Arc;

/// Creates a fresh, unstarted component instance.
pub type ComponentFactory = Arc<dyn Fn() -> Box<dyn Component> + Send + Sync>;

/// Component types available to flows, keyed by type name.
///
/// Every step gets its own instance from the type's factory, so instances
/// never share mutable state.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    declarations: IndexMap<String, ComponentDecl>,
    factories: IndexMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the component types defined in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register::<ContentSource>();
        registry
    }

    /// Register a default-constructible component type.
    pub fn register<C>(&mut self)
    where
        C: Component + Default + 'static,
    {
        let decl = C::default().decl().clone();
        self.register_factory(decl, || Box::new(C::default()));
    }

    /// Register a component type with an explicit factory.
    pub fn register_factory<F>(&mut self, decl: ComponentDecl, factory: F)
    where
        F: Fn() -> Box<dyn Component> + Send + Sync + 'static,
    {
        let type_name = decl.type_name.clone();
        self.declarations.insert(type_name.clone(), decl);
        self.factories.insert(type_name, Arc::new(factory));
    }

    pub fn get_decl(&self, type_name: &str) -> Option<&ComponentDecl> {
        self.declarations.get(type_name)
    }

    /// Instantiate a component of the given type.
    pub fn create(&self, type_name: &str) -> Option<Box<dyn Component>> {
        self.factories.get(type_name).map(|factory| factory())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.declarations.contains_key(type_name)
    }

    /// Iterate over all declarations in registration order.
    pub fn declarations(&self) -> impl Iterator<Item = &ComponentDecl> {
        self.declarations.values()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}
