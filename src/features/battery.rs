//! Battery Service (0x180F): a single Battery Level characteristic the
//! central can read or subscribe to.

use std::sync::Arc;

use anyhow::Result;

use crate::core::uuid::Uuid;
use crate::gatt::server::attribute::{AttPermissions, Attribute, CharacteristicProperties};
use crate::gatt::server::{AttributeServer, CharacteristicRef};

use super::{Feature, FeatureRegistry, RegisteredFeature};

const BATTERY_SERVICE: Uuid = Uuid::new(0x180F);
const BATTERY_LEVEL: Uuid = Uuid::new(0x2A19);
const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = Uuid::new(0x2902);

const FULL: u8 = 100;

pub struct Battery {
    server: Arc<AttributeServer>,
    level: CharacteristicRef,
}

impl Feature for Battery {
    fn name() -> &'static str {
        "battery"
    }
}

impl RegisteredFeature for Battery {
    fn build(_registry: &FeatureRegistry, server: &Arc<AttributeServer>) -> Result<Arc<Self>> {
        let service = server.create_service(Self::name(), BATTERY_SERVICE)?;
        let level = server.add_characteristic(
            &service,
            Attribute::characteristic(
                BATTERY_LEVEL,
                AttPermissions::READABLE,
                CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                1,
                &[FULL],
            ),
        );
        server.add_descriptor(
            &level,
            Attribute::descriptor(
                CLIENT_CHARACTERISTIC_CONFIGURATION,
                AttPermissions::READABLE | AttPermissions::WRITABLE,
                2,
                &[0, 0],
            ),
        );
        Ok(Arc::new(Self { server: server.clone(), level }))
    }
}

impl Battery {
    /// The currently reported charge percentage.
    pub fn level(&self) -> u8 {
        self.level.attribute.snapshot_value().first().copied().unwrap_or(0)
    }

    /// Update the reported charge, clamped to 100%. Does not push an update;
    /// call [`Self::notify`] for that.
    pub fn set_level(&self, percent: u8) {
        self.level
            .attribute
            .set_value(&[percent.min(FULL)])
            .expect("level fits its one-byte attribute");
    }

    /// Push the current level to the connected central.
    pub fn notify(&self) -> bool {
        self.server.send(&self.level, false)
    }
}
