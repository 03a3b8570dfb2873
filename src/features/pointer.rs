//! A vendor pointer-event service (0xEF00) that lets a companion app drive
//! the HID mouse by writing event characteristics: click (0xEF01), relative
//! move (0xEF02), and wheel (0xEF03).
//!
//! Each characteristic carries a write hook that translates the committed
//! value into HID input reports. Hooks run on the stack's callback thread
//! once the triggering write has completed.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::uuid::Uuid;
use crate::gatt::server::attribute::{
    AccessKind, AttPermissions, Attribute, CharacteristicProperties,
};
use crate::gatt::server::{AttributeServer, CharacteristicRef};

use super::hid::Hid;
use super::{Feature, FeatureRegistry, RegisteredFeature};

const POINTER_SERVICE: Uuid = Uuid::new(0xEF00);
const CLICK: Uuid = Uuid::new(0xEF01);
const MOVE: Uuid = Uuid::new(0xEF02);
const WHEEL: Uuid = Uuid::new(0xEF03);

/// Largest displacement honored per write on each axis. The hook walks the
/// delta on the stack's callback thread, so the walk must stay bounded.
const MAX_MOVE_DELTA: i32 = 4096;

fn le_u16(bytes: &[u8]) -> u16 {
    let mut buf = [0u8; 2];
    let n = bytes.len().min(2);
    buf[..n].copy_from_slice(&bytes[..n]);
    u16::from_le_bytes(buf)
}

fn le_i32(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    i32::from_le_bytes(buf)
}

pub struct Pointer {
    click: CharacteristicRef,
    move_event: CharacteristicRef,
    wheel: CharacteristicRef,
}

impl Feature for Pointer {
    fn name() -> &'static str {
        "pointer"
    }
}

impl RegisteredFeature for Pointer {
    fn build(registry: &FeatureRegistry, server: &Arc<AttributeServer>) -> Result<Arc<Self>> {
        let hid = registry
            .get::<Hid>()
            .context("pointer events require the hid feature to be declared first")?;
        let service = server.create_service(Self::name(), POINTER_SERVICE)?;

        let permissions = AttPermissions::READABLE | AttPermissions::WRITABLE;
        let properties = CharacteristicProperties::READ
            | CharacteristicProperties::WRITE
            | CharacteristicProperties::NOTIFY;

        let click_hid = hid.clone();
        let click = server.add_characteristic(
            &service,
            Attribute::characteristic(CLICK, permissions, properties, 2, &[0, 0]).with_hook(
                Arc::new(move |kind, attribute| {
                    if kind != AccessKind::Write {
                        return;
                    }
                    let buttons = le_u16(&attribute.snapshot_value());
                    click_hid.click(buttons as u8);
                }),
            ),
        );

        let move_hid = hid.clone();
        let move_event = server.add_characteristic(
            &service,
            Attribute::characteristic(MOVE, permissions, properties, 8, &[0; 8]).with_hook(
                Arc::new(move |kind, attribute| {
                    if kind != AccessKind::Write {
                        return;
                    }
                    let value = attribute.snapshot_value();
                    let mut x = le_i32(&value).clamp(-MAX_MOVE_DELTA, MAX_MOVE_DELTA);
                    let mut y = le_i32(&value[value.len().min(4)..])
                        .clamp(-MAX_MOVE_DELTA, MAX_MOVE_DELTA);
                    // deltas beyond one report's range are walked in steps
                    while x != 0 || y != 0 {
                        let step_x = x.clamp(-128, 127) as i8;
                        let step_y = y.clamp(-128, 127) as i8;
                        move_hid.move_rel(step_x, step_y);
                        x -= step_x as i32;
                        y -= step_y as i32;
                    }
                    attribute.set_value(&[0; 8]).expect("reset fits the move attribute");
                }),
            ),
        );

        let wheel_hid = hid.clone();
        let wheel = server.add_characteristic(
            &service,
            Attribute::characteristic(WHEEL, permissions, properties, 1, &[0]).with_hook(
                Arc::new(move |kind, attribute| {
                    if kind != AccessKind::Write {
                        return;
                    }
                    let steps = attribute.snapshot_value().first().copied().unwrap_or(0);
                    wheel_hid.wheel(steps as i8);
                }),
            ),
        );

        Ok(Arc::new(Self { click, move_event, wheel }))
    }
}
