//! The attribute server engine.
//!
//! [`AttributeServer`] owns the declared service tree and drives each
//! service through its registration lifecycle by reacting to stack events.
//! Bring-up is fully event-driven: every command issued to the stack is
//! answered by a later event, and no attribute handle is ever assumed before
//! the stack confirms it. A service whose bring-up command is rejected is
//! parked in [`ServiceState::Failed`] while the rest of the tree continues.

pub mod attribute;
pub mod registry;
mod transactions;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{debug, info, warn};

use crate::core::address::DeviceAddress;
use crate::core::uuid::Uuid;

use self::attribute::Attribute;
use self::registry::{Service, ServiceRegistry, ServiceState};
use super::ids::{AppId, AttHandle, ConnectionId};
use super::stack::{GattStack, StackEvent};

/// A characteristic within its owning service, as handed back to features at
/// declaration time. Cheap to clone and hold across threads.
#[derive(Clone)]
pub struct CharacteristicRef {
    service: Arc<Service>,
    pub attribute: Arc<Attribute>,
}

/// The server engine. Shared behind an [`Arc`] between the stack's callback
/// thread (events) and feature threads (value updates and notifications).
pub struct AttributeServer {
    stack: Arc<dyn GattStack>,
    registry: ServiceRegistry,
    identity: DeviceAddress,
    initialized: AtomicBool,
}

impl AttributeServer {
    pub fn new(stack: Arc<dyn GattStack>, identity: DeviceAddress) -> Arc<Self> {
        Arc::new(Self {
            stack,
            registry: ServiceRegistry::default(),
            identity,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> DeviceAddress {
        self.identity
    }

    /// Declare a new primary service. Only valid before [`Self::initialize`].
    pub fn create_service(&self, name: &'static str, uuid: Uuid) -> Result<Arc<Service>> {
        if self.initialized.load(Ordering::Acquire) {
            bail!("cannot declare service {name} after initialization");
        }
        let app = AppId(self.registry.services().len() as u16);
        let service = Arc::new(Service::new(name, uuid, app));
        self.registry.push_service(service.clone());
        Ok(service)
    }

    /// Declare a characteristic on `service`, in declaration order.
    pub fn add_characteristic(
        &self,
        service: &Arc<Service>,
        attribute: Attribute,
    ) -> CharacteristicRef {
        let attribute = Arc::new(attribute);
        service.push_characteristic(registry::Characteristic {
            attribute: attribute.clone(),
            descriptors: vec![],
        });
        CharacteristicRef { service: service.clone(), attribute }
    }

    /// Declare a descriptor on an already declared characteristic.
    pub fn add_descriptor(
        &self,
        characteristic: &CharacteristicRef,
        attribute: Attribute,
    ) -> Arc<Attribute> {
        let attribute = Arc::new(attribute);
        let attached =
            characteristic.service.push_descriptor(characteristic.attribute.uuid, attribute.clone());
        debug_assert!(attached, "descriptor declared for unknown characteristic");
        attribute
    }

    /// Freeze the declared tree and begin bring-up: publish the identity
    /// address, register every service application, and start advertising.
    /// Individual registration failures park that service as failed; the
    /// call only errors when nothing could be registered at all.
    pub fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            bail!("attribute server already initialized");
        }
        self.stack.set_local_address(self.identity)?;
        info!("bringing up attribute server as {}", self.identity);

        let mut registered = 0usize;
        for service in self.registry.services() {
            match self.stack.register_application(service.app_id) {
                Ok(()) => registered += 1,
                Err(e) => {
                    warn!("failed to register service {}: {e}", service.name);
                    service.set_state(ServiceState::Failed);
                }
            }
        }
        if registered == 0 {
            bail!("no service could be registered");
        }
        self.stack.start_advertising()?;
        Ok(())
    }

    /// React to one stack event. Invoked on the stack's callback thread.
    pub fn handle_event(&self, event: StackEvent) {
        debug!("stack event {event:?}");
        match event {
            StackEvent::RegistrationComplete { app, interface } => {
                let Some(service) = self.registry.service_by_app(app) else {
                    warn!("registration completed for unknown application {app:?}");
                    return;
                };
                if !service.assign_interface(interface) {
                    warn!("duplicate registration event for service {}", service.name);
                    return;
                }
                self.registry.index_interface(interface, service.clone());
                service.set_state(ServiceState::Registered);
                let created = self.stack.create_service(
                    interface,
                    service.uuid,
                    service.is_primary,
                    service.expected_attribute_count(),
                );
                if let Err(e) = created {
                    warn!("failed to create service {}: {e}", service.name);
                    service.set_state(ServiceState::Failed);
                }
            }
            StackEvent::ServiceCreated { interface, handle } => {
                let Some(service) = self.registry.service_by_interface(interface) else {
                    warn!("service created on unknown interface {interface:?}");
                    return;
                };
                if service.state() != ServiceState::Registered {
                    warn!(
                        "unexpected creation event for service {} in {:?}",
                        service.name,
                        service.state()
                    );
                    return;
                }
                service.set_state(ServiceState::Created { handle });
                let remaining = service.expected_addition_events();
                if remaining > 0 {
                    // entered before the add commands go out, as the stack
                    // may deliver addition events synchronously
                    service.set_state(ServiceState::AttributesAdding { handle, remaining });
                }
                if let Err(e) = self.populate_service(&service, handle) {
                    warn!("failed to populate service {}: {e}", service.name);
                    service.set_state(ServiceState::Failed);
                    return;
                }
                if remaining == 0 {
                    self.start_service(&service, handle);
                }
            }
            StackEvent::CharacteristicAdded { interface, uuid, handle } => {
                let Some(service) = self.registry.service_by_interface(interface) else {
                    warn!("characteristic added on unknown interface {interface:?}");
                    return;
                };
                let Some(attribute) = service.characteristic_by_uuid(uuid) else {
                    warn!("addition event for undeclared characteristic {uuid:?}");
                    return;
                };
                self.note_attribute_added(&service, attribute, handle);
            }
            StackEvent::DescriptorAdded { interface, uuid, handle } => {
                let Some(service) = self.registry.service_by_interface(interface) else {
                    warn!("descriptor added on unknown interface {interface:?}");
                    return;
                };
                let Some(attribute) = service.descriptor_by_uuid(uuid) else {
                    warn!("addition event for undeclared descriptor {uuid:?}");
                    return;
                };
                self.note_attribute_added(&service, attribute, handle);
            }
            StackEvent::Connected { conn, peer } => {
                info!("central {peer} connected as {conn:?}");
                self.registry.on_connect(conn, peer);
                if let Err(e) = self.stack.request_encryption(peer) {
                    warn!("failed to request encryption with {peer}: {e}");
                }
                if let Err(e) = self.stack.stop_advertising() {
                    warn!("failed to stop advertising: {e}");
                }
                if let Err(e) = self.stack.exchange_mtu(conn) {
                    warn!("failed to start transfer-unit negotiation: {e}");
                }
            }
            StackEvent::Disconnected { conn } => {
                if self.registry.connection().conn != conn {
                    warn!("disconnect for stale connection {conn:?}");
                } else {
                    info!("central disconnected from {conn:?}");
                }
                // teardown is idempotent; even a stale or duplicate
                // disconnect leaves the server advertising again
                self.registry.on_disconnect();
                if let Err(e) = self.stack.start_advertising() {
                    warn!("failed to resume advertising: {e}");
                }
            }
            StackEvent::MtuChanged { conn, mtu } => {
                info!("transfer unit for {conn:?} is now {mtu}");
                self.registry.set_mtu(mtu);
            }
            ref event @ StackEvent::Read { .. } => {
                transactions::handle_read(&*self.stack, &self.registry, event);
            }
            ref event @ StackEvent::Write { .. } => {
                transactions::handle_write(&*self.stack, &self.registry, event);
            }
            StackEvent::ExecuteWrite { conn, trans } => {
                transactions::handle_execute_write(&*self.stack, conn, trans);
            }
            StackEvent::IndicationConfirmed { conn } => {
                debug!("indication confirmed by {conn:?}");
            }
        }
    }

    /// Issue the addition command for every attribute of a freshly created
    /// service, characteristics interleaved with their descriptors so each
    /// descriptor attaches to the preceding characteristic.
    fn populate_service(
        &self,
        service: &Arc<Service>,
        service_handle: AttHandle,
    ) -> Result<()> {
        service.with_characteristics(|characteristics| {
            for characteristic in characteristics {
                let attribute = &characteristic.attribute;
                self.stack.add_characteristic(
                    service_handle,
                    attribute.uuid,
                    attribute.permissions,
                    attribute.properties,
                    &attribute.snapshot_value(),
                    attribute.max_len(),
                )?;
                for descriptor in &characteristic.descriptors {
                    self.stack.add_descriptor(
                        service_handle,
                        descriptor.uuid,
                        descriptor.permissions,
                        &descriptor.snapshot_value(),
                        descriptor.max_len(),
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Record a confirmed attribute handle. Once every declared attribute of
    /// the service is confirmed, the service is started.
    fn note_attribute_added(
        &self,
        service: &Arc<Service>,
        attribute: Arc<Attribute>,
        handle: AttHandle,
    ) {
        let ServiceState::AttributesAdding { handle: service_handle, remaining } = service.state()
        else {
            warn!(
                "unexpected addition event for service {} in {:?}",
                service.name,
                service.state()
            );
            return;
        };
        if !attribute.assign_handle(handle) {
            warn!("duplicate addition event for {:?} on service {}", attribute.uuid, service.name);
            return;
        }
        service.stage_attribute(handle, attribute);
        let remaining = remaining - 1;
        if remaining > 0 {
            service.set_state(ServiceState::AttributesAdding { handle: service_handle, remaining });
            return;
        }
        self.start_service(service, service_handle);
    }

    /// Start a fully assembled service. Only now do its confirmed handles
    /// enter the handle index and begin serving peer traffic.
    fn start_service(&self, service: &Arc<Service>, service_handle: AttHandle) {
        match self.stack.start_service(service_handle) {
            Ok(()) => {
                for (handle, attribute) in service.take_staged() {
                    self.registry.index_attribute(handle, attribute);
                }
                info!("service {} started at {service_handle:?}", service.name);
                service.set_state(ServiceState::Started { handle: service_handle });
            }
            Err(e) => {
                warn!("failed to start service {}: {e}", service.name);
                service.set_state(ServiceState::Failed);
            }
        }
    }

    /// Push the characteristic's current value to the connected central as a
    /// notification, or an indication when `confirm` is set. Returns whether
    /// the update was handed to the stack.
    pub fn send(&self, characteristic: &CharacteristicRef, confirm: bool) -> bool {
        let service = &characteristic.service;
        let uuid = characteristic.attribute.uuid;
        if !matches!(service.state(), ServiceState::Started { .. }) {
            debug!("dropping update for {uuid:?}: service {} not started", service.name);
            return false;
        }
        let conn = service.connection();
        if conn == ConnectionId::NONE {
            debug!("dropping update for {uuid:?}: no central connected");
            return false;
        }
        let (Some(interface), Some(handle)) =
            (service.interface(), characteristic.attribute.handle())
        else {
            return false;
        };
        let value = characteristic.attribute.snapshot_value();
        match self.stack.send_value(interface, conn, handle, &value, confirm) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to push update for {handle:?}: {e}");
                false
            }
        }
    }
}
