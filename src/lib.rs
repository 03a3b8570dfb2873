//! A BLE peripheral exposing battery, HID mouse, and pointer-event GATT
//! services on top of an external protocol stack.
//!
//! The crate is stack-agnostic: the radio is reached only through the
//! [`gatt::stack::GattStack`] trait, and the stack's callbacks are fed back
//! in as [`gatt::stack::StackEvent`]s. Everything runs on plain threads; the
//! engine is safe to drive from the stack's callback thread while features
//! push value updates from their own.

pub mod core;
pub mod features;
pub mod gatt;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::core::address::DeviceAddress;
use crate::features::battery::Battery;
use crate::features::hid::Hid;
use crate::features::pointer::Pointer;
use crate::features::FeatureRegistry;
use crate::gatt::server::AttributeServer;
use crate::gatt::stack::{GattStack, StackEvent};

/// The assembled peripheral: the attribute server plus its standard feature
/// set, brought up and advertising.
pub struct Peripheral {
    server: Arc<AttributeServer>,
    features: FeatureRegistry,
}

impl Peripheral {
    /// Build and bring up the peripheral. The identity address is loaded
    /// from `identity_path`, or generated and persisted there on first run.
    pub fn start(stack: Arc<dyn GattStack>, identity_path: &Path) -> Result<Self> {
        let identity = DeviceAddress::load_or_generate(identity_path);
        let server = AttributeServer::new(stack, identity);
        let features = FeatureRegistry::new();
        features.declare::<Battery>();
        features.declare::<Hid>();
        features.declare::<Pointer>();
        features.instantiate_all(&server)?;
        server.initialize()?;
        Ok(Self { server, features })
    }

    pub fn server(&self) -> &Arc<AttributeServer> {
        &self.server
    }

    pub fn features(&self) -> &FeatureRegistry {
        &self.features
    }

    /// Feed one stack callback into the engine.
    pub fn handle_event(&self, event: StackEvent) {
        self.server.handle_event(event);
    }
}
