//! HID over GATT (0x1812) exposing a boot-style mouse.
//!
//! The report map declares a keyboard (report 1, unused for now) and a
//! three-button relative mouse (report 2). Input reports are pushed as
//! notifications on the Report characteristic; the Report Reference
//! descriptor ties it to report 2.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::core::uuid::Uuid;
use crate::gatt::server::attribute::{AttPermissions, Attribute, CharacteristicProperties};
use crate::gatt::server::{AttributeServer, CharacteristicRef};

use super::{Feature, FeatureRegistry, RegisteredFeature};

const HID_SERVICE: Uuid = Uuid::new(0x1812);
const HID_INFORMATION: Uuid = Uuid::new(0x2A4A);
const REPORT_MAP: Uuid = Uuid::new(0x2A4B);
const PROTOCOL_MODE: Uuid = Uuid::new(0x2A4E);
const REPORT: Uuid = Uuid::new(0x2A4D);
const CONTROL_POINT: Uuid = Uuid::new(0x2A4C);
const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = Uuid::new(0x2902);
const REPORT_REFERENCE: Uuid = Uuid::new(0x2908);

/// bcdHID 1.11, no country code, normally connectable.
const HID_INFO: [u8; 4] = [0x11, 0x01, 0x00, 0x01];

/// Report protocol mode, per HOGP 1.0 section 4.4.
const REPORT_PROTOCOL: u8 = 0x01;

/// Input report 2.
const MOUSE_REPORT_REFERENCE: [u8; 2] = [0x02, 0x01];

#[rustfmt::skip]
const MOUSE_REPORT_MAP: [u8; 95] = [
    0x05, 0x01,       // USAGE_PAGE (Generic Desktop)
    0x09, 0x06,       // USAGE (Keyboard)
    0xa1, 0x01,       // COLLECTION (Application)
    0x85, 0x01,       //   REPORT_ID (1)
    0x05, 0x07,       //   USAGE_PAGE (Keyboard)
    0x19, 0xe0,       //   USAGE_MINIMUM (Keyboard LeftControl)
    0x29, 0xe7,       //   USAGE_MAXIMUM (Keyboard Right GUI)
    0x15, 0x00,       //   LOGICAL_MINIMUM (0)
    0x25, 0x01,       //   LOGICAL_MAXIMUM (1)
    0x75, 0x01,       //   REPORT_SIZE (1)
    0x95, 0x08,       //   REPORT_COUNT (8)
    0x81, 0x02,       //   INPUT (Data,Var,Abs)
    0x95, 0x06,       //   REPORT_COUNT (6)
    0x75, 0x08,       //   REPORT_SIZE (8)
    0x15, 0x00,       //   LOGICAL_MINIMUM (0)
    0x25, 0x65,       //   LOGICAL_MAXIMUM (101)
    0x05, 0x07,       //   USAGE_PAGE (Keyboard)
    0x19, 0x00,       //   USAGE_MINIMUM (Reserved)
    0x29, 0x65,       //   USAGE_MAXIMUM (Keyboard Application)
    0x81, 0x00,       //   INPUT (Data,Ary,Abs)
    0xc0,             // END_COLLECTION
    0x05, 0x01,       // USAGE_PAGE (Generic Desktop)
    0x09, 0x02,       // USAGE (Mouse)
    0xa1, 0x01,       // COLLECTION (Application)
    0x85, 0x02,       //   REPORT_ID (2)
    0x09, 0x01,       //   USAGE (Pointer)
    0xa1, 0x00,       //   COLLECTION (Physical)
    0x05, 0x09,       //     USAGE_PAGE (Button)
    0x19, 0x01,       //     USAGE_MINIMUM (Button 1)
    0x29, 0x03,       //     USAGE_MAXIMUM (Button 3)
    0x15, 0x00,       //     LOGICAL_MINIMUM (0)
    0x25, 0x01,       //     LOGICAL_MAXIMUM (1)
    0x95, 0x03,       //     REPORT_COUNT (3)
    0x75, 0x01,       //     REPORT_SIZE (1)
    0x81, 0x02,       //     INPUT (Data,Var,Abs)
    0x95, 0x01,       //     REPORT_COUNT (1)
    0x75, 0x05,       //     REPORT_SIZE (5)
    0x81, 0x03,       //     INPUT (Cnst,Var,Abs)
    0x05, 0x01,       //     USAGE_PAGE (Generic Desktop)
    0x09, 0x30,       //     USAGE (X)
    0x09, 0x31,       //     USAGE (Y)
    0x09, 0x38,       //     USAGE (Wheel)
    0x15, 0x81,       //     LOGICAL_MINIMUM (-127)
    0x25, 0x7f,       //     LOGICAL_MAXIMUM (127)
    0x75, 0x08,       //     REPORT_SIZE (8)
    0x95, 0x03,       //     REPORT_COUNT (3)
    0x81, 0x06,       //     INPUT (Data,Var,Rel)
    0xc0,             //   END_COLLECTION
    0xc0,             // END_COLLECTION
];

/// Wire layout of the mouse input report: buttons, x, y, wheel.
const MOUSE_REPORT_LEN: usize = 4;

/// Gap between successive input reports so the central sees them as
/// distinct events.
const REPORT_PACING: Duration = Duration::from_millis(1);

pub struct Hid {
    server: Arc<AttributeServer>,
    mouse_report: CharacteristicRef,
}

impl Feature for Hid {
    fn name() -> &'static str {
        "hid"
    }
}

impl RegisteredFeature for Hid {
    fn build(_registry: &FeatureRegistry, server: &Arc<AttributeServer>) -> Result<Arc<Self>> {
        let service = server.create_service(Self::name(), HID_SERVICE)?;
        server.add_characteristic(
            &service,
            Attribute::characteristic(
                HID_INFORMATION,
                AttPermissions::READABLE,
                CharacteristicProperties::READ,
                HID_INFO.len(),
                &HID_INFO,
            ),
        );
        server.add_characteristic(
            &service,
            Attribute::characteristic(
                REPORT_MAP,
                AttPermissions::READABLE,
                CharacteristicProperties::READ,
                MOUSE_REPORT_MAP.len(),
                &MOUSE_REPORT_MAP,
            ),
        );
        server.add_characteristic(
            &service,
            Attribute::characteristic(
                PROTOCOL_MODE,
                AttPermissions::READABLE,
                CharacteristicProperties::READ | CharacteristicProperties::WRITE_NO_RESPONSE,
                1,
                &[REPORT_PROTOCOL],
            ),
        );
        let mouse_report = server.add_characteristic(
            &service,
            Attribute::characteristic(
                REPORT,
                AttPermissions::READABLE,
                CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                MOUSE_REPORT_LEN,
                &[0; MOUSE_REPORT_LEN],
            ),
        );
        server.add_descriptor(
            &mouse_report,
            Attribute::descriptor(
                CLIENT_CHARACTERISTIC_CONFIGURATION,
                AttPermissions::READABLE | AttPermissions::WRITABLE,
                2,
                &[0, 0],
            ),
        );
        server.add_descriptor(
            &mouse_report,
            Attribute::descriptor(
                REPORT_REFERENCE,
                AttPermissions::READABLE,
                MOUSE_REPORT_REFERENCE.len(),
                &MOUSE_REPORT_REFERENCE,
            ),
        );
        server.add_characteristic(
            &service,
            Attribute::characteristic(
                CONTROL_POINT,
                AttPermissions::WRITABLE_NO_RESPONSE,
                CharacteristicProperties::WRITE_NO_RESPONSE,
                1,
                &[0],
            ),
        );
        Ok(Arc::new(Self { server: server.clone(), mouse_report }))
    }
}

impl Hid {
    /// Press and release the given button bits, as two input reports.
    pub fn click(&self, buttons: u8) {
        thread::sleep(REPORT_PACING);
        self.update_report(|report| report[0] |= buttons);
        self.server.send(&self.mouse_report, false);
        self.update_report(|report| report[0] = 0);
        self.server.send(&self.mouse_report, false);
    }

    /// Move the pointer by one relative step. The report is zeroed again
    /// afterwards without a second notification.
    pub fn move_rel(&self, x: i8, y: i8) {
        thread::sleep(REPORT_PACING);
        self.update_report(|report| {
            report[1] = x as u8;
            report[2] = y as u8;
        });
        self.server.send(&self.mouse_report, false);
        self.update_report(|report| {
            report[1] = 0;
            report[2] = 0;
        });
    }

    /// Scroll vertically by one relative step.
    pub fn wheel(&self, steps: i8) {
        thread::sleep(REPORT_PACING);
        self.update_report(|report| report[3] = steps as u8);
        self.server.send(&self.mouse_report, false);
        self.update_report(|report| report[3] = 0);
    }

    fn update_report(&self, mutate: impl FnOnce(&mut [u8; MOUSE_REPORT_LEN])) {
        let mut report = [0u8; MOUSE_REPORT_LEN];
        let current = self.mouse_report.attribute.snapshot_value();
        report[..current.len()].copy_from_slice(&current);
        mutate(&mut report);
        self.mouse_report
            .attribute
            .set_value(&report)
            .expect("input report fits its attribute");
    }
}
