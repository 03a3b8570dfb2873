//! Self-contained device features, each owning one GATT service.
//!
//! Bootstrap is two-phase: features are first declared in order, then
//! instantiated once the server exists. A feature's constructor may look up
//! previously instantiated features by type, so declaration order doubles as
//! the dependency order.

pub mod battery;
pub mod hid;
pub mod pointer;

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use log::info;

use crate::gatt::server::AttributeServer;

/// A named device feature.
pub trait Feature: Any + Send + Sync {
    fn name() -> &'static str
    where
        Self: Sized;
}

/// A feature that can be built from the registry during bootstrap.
pub trait RegisteredFeature: Feature {
    /// Declare the feature's service tree on `server` and construct the
    /// feature. Runs before [`AttributeServer::initialize`].
    fn build(registry: &FeatureRegistry, server: &Arc<AttributeServer>) -> Result<Arc<Self>>;
}

type Factory = Box<
    dyn FnOnce(&FeatureRegistry, &Arc<AttributeServer>) -> Result<Arc<dyn Any + Send + Sync>>
        + Send,
>;

/// Ordered feature bootstrap and by-type lookup of live instances.
#[derive(Default)]
pub struct FeatureRegistry {
    factories: Mutex<Vec<(&'static str, Factory)>>,
    instances: Mutex<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `T` for instantiation, after everything declared before it.
    pub fn declare<T: RegisteredFeature>(&self) {
        self.factories.lock().unwrap().push((
            T::name(),
            Box::new(|registry, server| {
                T::build(registry, server).map(|f| f as Arc<dyn Any + Send + Sync>)
            }),
        ));
    }

    /// Run every queued factory in declaration order. Fails on the first
    /// feature that cannot be built.
    pub fn instantiate_all(&self, server: &Arc<AttributeServer>) -> Result<()> {
        let factories = std::mem::take(&mut *self.factories.lock().unwrap());
        for (name, factory) in factories {
            let instance =
                factory(self, server).with_context(|| format!("building feature {name}"))?;
            info!("feature {name} ready");
            self.instances.lock().unwrap().insert(name, instance);
        }
        Ok(())
    }

    /// The live instance of `T`, if it has been built.
    pub fn get<T: Feature>(&self) -> Option<Arc<T>> {
        let instance = self.instances.lock().unwrap().get(T::name())?.clone();
        instance.downcast::<T>().ok()
    }
}
