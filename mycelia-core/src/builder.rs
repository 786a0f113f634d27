//! Topological capability builder.
//!
//! A subsystem declares the capabilities it needs as a dependency
//! graph; [`CapabilityRegistry::resolve`] performs a Kahn's-algorithm
//! topological sort (ties broken by registration order), detects
//! cycles and missing dependencies up front, and builds each
//! capability in dependency order. The resulting [`CapabilityContext`]
//! exposes capabilities by name, with no further runtime dispatch
//! required.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::CapabilityError;

type BuildResult = Result<Arc<dyn Any + Send + Sync>, CapabilityError>;
type AsyncBuildFuture = Pin<Box<dyn Future<Output = BuildResult> + Send>>;

enum Producer {
    Value(Arc<dyn Any + Send + Sync>),
    Sync(Box<dyn Fn(&CapabilityContext) -> BuildResult + Send + Sync>),
    Async(Box<dyn Fn(&CapabilityContext) -> AsyncBuildFuture + Send + Sync>),
}

struct Entry {
    name: &'static str,
    dependencies: Vec<&'static str>,
    producer: Producer,
}

/// A type-erased, name-keyed store of resolved capabilities.
#[derive(Default)]
pub struct CapabilityContext {
    values: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl CapabilityContext {
    pub fn new() -> Self {
        CapabilityContext {
            values: HashMap::new(),
        }
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.values.get(name).and_then(|v| Arc::clone(v).downcast::<T>().ok())
    }

    pub fn try_get<T: Any + Send + Sync>(
        &self,
        name: &'static str,
    ) -> Result<Arc<T>, CapabilityError> {
        self.get(name)
            .ok_or(CapabilityError::MissingDependency {
                capability: "<lookup>",
                dependency: name,
            })
    }
}

/// Declares capabilities and the dependency graph between them, then
/// resolves a build order and instantiates them.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: Vec<Entry>,
    registered: HashSet<&'static str>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        CapabilityRegistry {
            entries: Vec::new(),
            registered: HashSet::new(),
        }
    }

    /// Registers an already-built value with no dependencies.
    pub fn provide<T: Any + Send + Sync>(
        &mut self,
        name: &'static str,
        value: T,
    ) -> Result<(), CapabilityError> {
        self.insert_entry(name, Vec::new(), Producer::Value(Arc::new(value)))
    }

    /// Registers a synchronous capability with the given dependencies.
    pub fn register<T, F>(
        &mut self,
        name: &'static str,
        dependencies: Vec<&'static str>,
        build: F,
    ) -> Result<(), CapabilityError>
    where
        T: Any + Send + Sync,
        F: Fn(&CapabilityContext) -> Result<T, CapabilityError> + Send + Sync + 'static,
    {
        let producer = Producer::Sync(Box::new(move |ctx: &CapabilityContext| {
            build(ctx).map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>)
        }));
        self.insert_entry(name, dependencies, producer)
    }

    /// Registers a capability whose build step is asynchronous.
    pub fn register_async<T, F, Fut>(
        &mut self,
        name: &'static str,
        dependencies: Vec<&'static str>,
        build: F,
    ) -> Result<(), CapabilityError>
    where
        T: Any + Send + Sync,
        F: Fn(&CapabilityContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CapabilityError>> + Send + 'static,
    {
        let producer = Producer::Async(Box::new(move |ctx: &CapabilityContext| {
            let fut = build(ctx);
            Box::pin(async move { fut.await.map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>) })
                as AsyncBuildFuture
        }));
        self.insert_entry(name, dependencies, producer)
    }

    fn insert_entry(
        &mut self,
        name: &'static str,
        dependencies: Vec<&'static str>,
        producer: Producer,
    ) -> Result<(), CapabilityError> {
        if !self.registered.insert(name) {
            return Err(CapabilityError::DuplicateCapability { name });
        }
        self.entries.push(Entry {
            name,
            dependencies,
            producer,
        });
        Ok(())
    }

    /// Validates the dependency graph, computes a topological build
    /// order and instantiates every capability in that order.
    pub async fn resolve(mut self) -> Result<CapabilityContext, CapabilityError> {
        let order = self.topological_order()?;
        let mut by_name: HashMap<&'static str, Entry> =
            HashMap::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            by_name.insert(entry.name, entry);
        }

        let mut ctx = CapabilityContext::new();
        for name in order {
            let entry = by_name
                .remove(name)
                .expect("topological order only names registered capabilities");
            let value = match entry.producer {
                Producer::Value(value) => value,
                Producer::Sync(build) => build(&ctx)?,
                Producer::Async(build) => build(&ctx).await?,
            };
            ctx.values.insert(entry.name, value);
        }
        Ok(ctx)
    }

    fn topological_order(&self) -> Result<Vec<&'static str>, CapabilityError> {
        for entry in &self.entries {
            for dependency in &entry.dependencies {
                if !self.registered.contains(dependency) {
                    return Err(CapabilityError::MissingDependency {
                        capability: entry.name,
                        dependency,
                    });
                }
            }
        }

        let mut remaining: HashMap<&'static str, HashSet<&'static str>> = self
            .entries
            .iter()
            .map(|entry| (entry.name, entry.dependencies.iter().copied().collect()))
            .collect();
        let mut order: Vec<&'static str> = Vec::with_capacity(self.entries.len());

        loop {
            let mut progressed = false;
            for entry in &self.entries {
                if order.contains(&entry.name) {
                    continue;
                }
                let ready = remaining
                    .get(entry.name)
                    .map(|deps| deps.is_empty())
                    .unwrap_or(false);
                if ready {
                    order.push(entry.name);
                    remaining.remove(entry.name);
                    for deps in remaining.values_mut() {
                        deps.remove(entry.name);
                    }
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        if order.len() != self.entries.len() {
            let mut cycle: Vec<&'static str> = remaining.keys().copied().collect();
            cycle.sort_unstable();
            return Err(CapabilityError::CyclicDependency { cycle });
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_simple_dependency_graph() {
        let mut registry = CapabilityRegistry::new();
        registry.provide("base", 7_i32).unwrap();
        registry
            .register::<i32, _>("doubled", vec!["base"], |ctx| {
                Ok(*ctx.try_get::<i32>("base")? * 2)
            })
            .unwrap();

        let ctx = registry.resolve().await.unwrap();
        assert_eq!(*ctx.get::<i32>("doubled").unwrap(), 14);
    }

    #[tokio::test]
    async fn missing_dependency_is_rejected_before_building() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register::<i32, _>("doubled", vec!["base"], |ctx| {
                Ok(*ctx.try_get::<i32>("base")? * 2)
            })
            .unwrap();

        let err = registry.resolve().await.unwrap_err();
        assert!(matches!(err, CapabilityError::MissingDependency { .. }));
    }

    #[test]
    fn duplicate_capability_is_rejected_at_registration() {
        let mut registry = CapabilityRegistry::new();
        registry.provide("base", 1_i32).unwrap();
        let err = registry.provide("base", 2_i32).unwrap_err();
        assert!(matches!(err, CapabilityError::DuplicateCapability { .. }));
    }

    #[tokio::test]
    async fn cyclic_dependency_is_detected() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register::<i32, _>("a", vec!["b"], |ctx| Ok(*ctx.try_get::<i32>("b")?))
            .unwrap();
        registry
            .register::<i32, _>("b", vec!["a"], |ctx| Ok(*ctx.try_get::<i32>("a")?))
            .unwrap();

        let err = registry.resolve().await.unwrap_err();
        assert!(matches!(err, CapabilityError::CyclicDependency { .. }));
    }

    #[tokio::test]
    async fn async_capability_builds_in_order() {
        let mut registry = CapabilityRegistry::new();
        registry.provide("base", 3_i32).unwrap();
        registry
            .register_async::<i32, _, _>("tripled", vec!["base"], |ctx| {
                let base = *ctx.try_get::<i32>("base").unwrap();
                async move { Ok(base * 3) }
            })
            .unwrap();

        let ctx = registry.resolve().await.unwrap();
        assert_eq!(*ctx.get::<i32>("tripled").unwrap(), 9);
    }
}
