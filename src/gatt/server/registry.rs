//! The declarative tree of services and the lookup state built around it:
//! the interface map and handle index populated as creation events arrive,
//! and the record of the single active connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::core::address::DeviceAddress;
use crate::core::uuid::Uuid;
use crate::gatt::ids::{AppId, AttHandle, ConnectionId, InterfaceId};

use super::attribute::Attribute;

/// The minimum transfer unit assumed until negotiation enlarges it.
pub const DEFAULT_MTU: u16 = 23;

/// A characteristic value attribute together with its descriptors, in
/// declaration order.
pub struct Characteristic {
    pub attribute: Arc<Attribute>,
    pub descriptors: Vec<Arc<Attribute>>,
}

/// The registration lifecycle of one service. Transitions are driven
/// exclusively by stack events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Unregistered,
    Registered,
    Created { handle: AttHandle },
    AttributesAdding { handle: AttHandle, remaining: usize },
    Started { handle: AttHandle },
    /// The stack rejected a bring-up command; this service stays down while
    /// the rest of the tree continues.
    Failed,
}

/// One service: a feature's declared attribute tree plus the identity the
/// stack assigns to it during registration.
pub struct Service {
    pub name: &'static str,
    pub uuid: Uuid,
    pub is_primary: bool,
    pub app_id: AppId,
    interface: OnceLock<InterfaceId>,
    state: Mutex<ServiceState>,
    connection: AtomicU16,
    /// Mutated only during bootstrap, before the engine is initialized.
    characteristics: RwLock<Vec<Characteristic>>,
    /// Handles confirmed while the service is still assembling. They reach
    /// the registry's handle index only once the service has started, so no
    /// peer traffic is served against a half-built service.
    staged: Mutex<Vec<(AttHandle, Arc<Attribute>)>>,
}

impl Service {
    pub fn new(name: &'static str, uuid: Uuid, app_id: AppId) -> Self {
        Self {
            name,
            uuid,
            is_primary: true,
            app_id,
            interface: OnceLock::new(),
            state: Mutex::new(ServiceState::Unregistered),
            connection: AtomicU16::new(ConnectionId::NONE.0),
            characteristics: RwLock::new(vec![]),
            staged: Mutex::new(vec![]),
        }
    }

    pub(crate) fn stage_attribute(&self, handle: AttHandle, attribute: Arc<Attribute>) {
        self.staged.lock().unwrap().push((handle, attribute));
    }

    pub(crate) fn take_staged(&self) -> Vec<(AttHandle, Arc<Attribute>)> {
        std::mem::take(&mut *self.staged.lock().unwrap())
    }

    pub fn interface(&self) -> Option<InterfaceId> {
        self.interface.get().copied()
    }

    /// Record the stack-assigned interface. Returns false on a duplicate
    /// registration event.
    pub(crate) fn assign_interface(&self, interface: InterfaceId) -> bool {
        self.interface.set(interface).is_ok()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: ServiceState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn connection(&self) -> ConnectionId {
        ConnectionId(self.connection.load(Ordering::Acquire))
    }

    pub(crate) fn set_connection(&self, conn: ConnectionId) {
        self.connection.store(conn.0, Ordering::Release);
    }

    pub(crate) fn push_characteristic(&self, characteristic: Characteristic) {
        self.characteristics.write().unwrap().push(characteristic);
    }

    pub(crate) fn push_descriptor(&self, value_uuid: Uuid, descriptor: Arc<Attribute>) -> bool {
        let mut characteristics = self.characteristics.write().unwrap();
        match characteristics.iter_mut().find(|c| c.attribute.uuid == value_uuid) {
            Some(characteristic) => {
                characteristic.descriptors.push(descriptor);
                true
            }
            None => false,
        }
    }

    /// Run `f` over the characteristics in declaration order.
    pub fn with_characteristics<R>(&self, f: impl FnOnce(&[Characteristic]) -> R) -> R {
        f(&self.characteristics.read().unwrap())
    }

    /// The characteristic value attribute with the given UUID, if declared.
    pub fn characteristic_by_uuid(&self, uuid: Uuid) -> Option<Arc<Attribute>> {
        self.with_characteristics(|characteristics| {
            characteristics.iter().find(|c| c.attribute.uuid == uuid).map(|c| c.attribute.clone())
        })
    }

    /// The descriptor with the given UUID, searched across all
    /// characteristics of the service.
    pub fn descriptor_by_uuid(&self, uuid: Uuid) -> Option<Arc<Attribute>> {
        self.with_characteristics(|characteristics| {
            characteristics
                .iter()
                .flat_map(|c| c.descriptors.iter())
                .find(|d| d.uuid == uuid)
                .cloned()
        })
    }

    /// Attribute slots the stack must reserve: one for the service
    /// declaration, two per characteristic (declaration + value), one per
    /// descriptor.
    pub fn expected_attribute_count(&self) -> u16 {
        self.with_characteristics(|characteristics| {
            let descriptors: usize = characteristics.iter().map(|c| c.descriptors.len()).sum();
            (1 + 2 * characteristics.len() + descriptors) as u16
        })
    }

    /// Addition events still outstanding once the service is created: one
    /// per characteristic, one per descriptor.
    pub fn expected_addition_events(&self) -> usize {
        self.with_characteristics(|characteristics| {
            characteristics.len() + characteristics.iter().map(|c| c.descriptors.len()).sum::<usize>()
        })
    }
}

/// The single active link.
#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    pub conn: ConnectionId,
    pub mtu: u16,
    pub peer: Option<DeviceAddress>,
}

impl Default for ConnectionRecord {
    fn default() -> Self {
        Self { conn: ConnectionId::NONE, mtu: DEFAULT_MTU, peer: None }
    }
}

/// Process-wide registry: the frozen service tree plus the lookup tables the
/// registration sequence populates.
#[derive(Default)]
pub struct ServiceRegistry {
    /// Insertion-ordered; appended only during bootstrap.
    services: RwLock<Vec<Arc<Service>>>,
    by_interface: Mutex<HashMap<InterfaceId, Arc<Service>>>,
    /// Populated only from confirmed handles, once their service has
    /// started; handles are never guessed.
    handle_index: Mutex<HashMap<AttHandle, Arc<Attribute>>>,
    connection: Mutex<ConnectionRecord>,
}

impl ServiceRegistry {
    pub fn push_service(&self, service: Arc<Service>) {
        self.services.write().unwrap().push(service);
    }

    pub fn services(&self) -> Vec<Arc<Service>> {
        self.services.read().unwrap().clone()
    }

    pub fn service_by_app(&self, app: AppId) -> Option<Arc<Service>> {
        self.services.read().unwrap().iter().find(|s| s.app_id == app).cloned()
    }

    pub fn index_interface(&self, interface: InterfaceId, service: Arc<Service>) {
        self.by_interface.lock().unwrap().insert(interface, service);
    }

    pub fn service_by_interface(&self, interface: InterfaceId) -> Option<Arc<Service>> {
        self.by_interface.lock().unwrap().get(&interface).cloned()
    }

    pub fn index_attribute(&self, handle: AttHandle, attribute: Arc<Attribute>) {
        self.handle_index.lock().unwrap().insert(handle, attribute);
    }

    pub fn attribute_by_handle(&self, handle: AttHandle) -> Option<Arc<Attribute>> {
        self.handle_index.lock().unwrap().get(&handle).cloned()
    }

    pub fn connection(&self) -> ConnectionRecord {
        self.connection.lock().unwrap().clone()
    }

    pub fn on_connect(&self, conn: ConnectionId, peer: DeviceAddress) {
        let mut record = self.connection.lock().unwrap();
        record.conn = conn;
        record.peer = Some(peer);
        for service in self.services() {
            service.set_connection(conn);
        }
    }

    /// Reset the connection record. Safe to call when already disconnected.
    pub fn on_disconnect(&self) {
        *self.connection.lock().unwrap() = ConnectionRecord::default();
        for service in self.services() {
            service.set_connection(ConnectionId::NONE);
        }
    }

    /// Record the negotiated transfer unit. Negotiation only ever enlarges
    /// it, so values below the default are ignored.
    pub fn set_mtu(&self, mtu: u16) {
        self.connection.lock().unwrap().mtu = mtu.max(DEFAULT_MTU);
    }

    pub fn mtu(&self) -> u16 {
        self.connection.lock().unwrap().mtu
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::gatt::server::attribute::{AttPermissions, CharacteristicProperties};

    const SERVICE_UUID: Uuid = Uuid::new(0x180F);
    const CHARACTERISTIC_UUID: Uuid = Uuid::new(0x2A19);
    const DESCRIPTOR_UUID: Uuid = Uuid::new(0x2902);

    fn service_with_tree() -> Service {
        let service = Service::new("battery", SERVICE_UUID, AppId(0));
        service.push_characteristic(Characteristic {
            attribute: Arc::new(Attribute::characteristic(
                CHARACTERISTIC_UUID,
                AttPermissions::READABLE,
                CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                1,
                &[100],
            )),
            descriptors: vec![],
        });
        assert!(service.push_descriptor(
            CHARACTERISTIC_UUID,
            Arc::new(Attribute::descriptor(
                DESCRIPTOR_UUID,
                AttPermissions::READABLE | AttPermissions::WRITABLE,
                2,
                &[0, 0],
            )),
        ));
        service
    }

    #[test]
    fn test_expected_attribute_count() {
        let service = service_with_tree();

        // 1 declaration + 2 for the characteristic + 1 descriptor
        assert_eq!(service.expected_attribute_count(), 4);
        assert_eq!(service.expected_addition_events(), 2);
    }

    #[test]
    fn test_descriptor_for_unknown_characteristic_is_rejected() {
        let service = service_with_tree();

        let attached = service.push_descriptor(
            Uuid::new(0xFFFF),
            Arc::new(Attribute::descriptor(DESCRIPTOR_UUID, AttPermissions::READABLE, 2, &[0, 0])),
        );

        assert!(!attached);
    }

    #[test]
    fn test_interface_assignment_is_single_shot() {
        let service = service_with_tree();

        assert!(service.assign_interface(InterfaceId(3)));
        assert!(!service.assign_interface(InterfaceId(4)));
        assert_eq!(service.interface(), Some(InterfaceId(3)));
    }

    #[test]
    fn test_disconnect_resets_connection_record_and_services() {
        let registry = ServiceRegistry::default();
        registry.push_service(Arc::new(service_with_tree()));
        registry.on_connect(ConnectionId(7), DeviceAddress([0xC0, 0, 0, 0, 0, 1]));
        registry.set_mtu(185);

        registry.on_disconnect();

        let record = registry.connection();
        assert_eq!(record.conn, ConnectionId::NONE);
        assert_eq!(record.mtu, DEFAULT_MTU);
        assert_eq!(record.peer, None);
        assert_eq!(registry.services()[0].connection(), ConnectionId::NONE);
    }

    #[test]
    fn test_staged_attributes_drain_once() {
        let service = service_with_tree();
        let attribute = service.characteristic_by_uuid(CHARACTERISTIC_UUID).unwrap();

        service.stage_attribute(AttHandle(42), attribute);

        assert_eq!(service.take_staged().len(), 1);
        assert!(service.take_staged().is_empty());
    }

    #[test]
    fn test_mtu_negotiation_never_shrinks_below_default() {
        let registry = ServiceRegistry::default();

        registry.set_mtu(5);
        assert_eq!(registry.mtu(), DEFAULT_MTU);

        registry.set_mtu(185);
        assert_eq!(registry.mtu(), 185);
    }

    #[test]
    fn test_handle_index_lookup() {
        let registry = ServiceRegistry::default();
        let service = Arc::new(service_with_tree());
        let attribute = service.characteristic_by_uuid(CHARACTERISTIC_UUID).unwrap();
        registry.push_service(service);

        registry.index_attribute(AttHandle(42), attribute.clone());

        assert!(registry.attribute_by_handle(AttHandle(42)).is_some());
        assert!(registry.attribute_by_handle(AttHandle(43)).is_none());
    }
}
