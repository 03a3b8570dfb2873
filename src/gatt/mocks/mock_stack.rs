//! A [`GattStack`] that records every issued command for later inspection.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::core::address::DeviceAddress;
use crate::core::uuid::Uuid;
use crate::gatt::ids::{AppId, AttHandle, ConnectionId, InterfaceId, TransactionId};
use crate::gatt::server::attribute::{AttPermissions, CharacteristicProperties};
use crate::gatt::stack::{AttStatus, AttributeData, GattStack, StackError};

/// One recorded stack command, mirroring the [`GattStack`] surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackCommand {
    SetLocalAddress {
        address: DeviceAddress,
    },
    RegisterApplication {
        app: AppId,
    },
    CreateService {
        interface: InterfaceId,
        uuid: Uuid,
        is_primary: bool,
        reserved_handles: u16,
    },
    AddCharacteristic {
        service_handle: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
        properties: CharacteristicProperties,
        value: Vec<u8>,
        max_len: usize,
    },
    AddDescriptor {
        service_handle: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
        value: Vec<u8>,
        max_len: usize,
    },
    StartService {
        service_handle: AttHandle,
    },
    SendResponse {
        conn: ConnectionId,
        trans: TransactionId,
        status: AttStatus,
        data: Option<AttributeData>,
    },
    SendValue {
        interface: InterfaceId,
        conn: ConnectionId,
        handle: AttHandle,
        value: Vec<u8>,
        confirm: bool,
    },
    StartAdvertising,
    StopAdvertising,
    RequestEncryption {
        peer: DeviceAddress,
    },
    ExchangeMtu {
        conn: ConnectionId,
    },
}

/// Records every command; commands named via [`MockStack::fail_command`]
/// are rejected instead of recorded.
#[derive(Default)]
pub struct MockStack {
    commands: Mutex<Vec<StackCommand>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl MockStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent invocation of `command` return a [`StackError`].
    pub fn fail_command(&self, command: &'static str) {
        self.failing.lock().unwrap().insert(command);
    }

    /// Drain and return all commands recorded so far.
    pub fn take_commands(&self) -> Vec<StackCommand> {
        std::mem::take(&mut self.commands.lock().unwrap())
    }

    fn record(&self, name: &'static str, command: StackCommand) -> Result<(), StackError> {
        if self.failing.lock().unwrap().contains(name) {
            return Err(StackError { command: name, reason: "mock failure".into() });
        }
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

impl GattStack for MockStack {
    fn set_local_address(&self, address: DeviceAddress) -> Result<(), StackError> {
        self.record("set_local_address", StackCommand::SetLocalAddress { address })
    }

    fn register_application(&self, app: AppId) -> Result<(), StackError> {
        self.record("register_application", StackCommand::RegisterApplication { app })
    }

    fn create_service(
        &self,
        interface: InterfaceId,
        uuid: Uuid,
        is_primary: bool,
        reserved_handles: u16,
    ) -> Result<(), StackError> {
        self.record(
            "create_service",
            StackCommand::CreateService { interface, uuid, is_primary, reserved_handles },
        )
    }

    fn add_characteristic(
        &self,
        service_handle: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
        properties: CharacteristicProperties,
        value: &[u8],
        max_len: usize,
    ) -> Result<(), StackError> {
        self.record(
            "add_characteristic",
            StackCommand::AddCharacteristic {
                service_handle,
                uuid,
                permissions,
                properties,
                value: value.to_vec(),
                max_len,
            },
        )
    }

    fn add_descriptor(
        &self,
        service_handle: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
        value: &[u8],
        max_len: usize,
    ) -> Result<(), StackError> {
        self.record(
            "add_descriptor",
            StackCommand::AddDescriptor {
                service_handle,
                uuid,
                permissions,
                value: value.to_vec(),
                max_len,
            },
        )
    }

    fn start_service(&self, service_handle: AttHandle) -> Result<(), StackError> {
        self.record("start_service", StackCommand::StartService { service_handle })
    }

    fn send_response(
        &self,
        conn: ConnectionId,
        trans: TransactionId,
        status: AttStatus,
        data: Option<AttributeData>,
    ) -> Result<(), StackError> {
        self.record("send_response", StackCommand::SendResponse { conn, trans, status, data })
    }

    fn send_value(
        &self,
        interface: InterfaceId,
        conn: ConnectionId,
        handle: AttHandle,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), StackError> {
        self.record(
            "send_value",
            StackCommand::SendValue { interface, conn, handle, value: value.to_vec(), confirm },
        )
    }

    fn start_advertising(&self) -> Result<(), StackError> {
        self.record("start_advertising", StackCommand::StartAdvertising)
    }

    fn stop_advertising(&self) -> Result<(), StackError> {
        self.record("stop_advertising", StackCommand::StopAdvertising)
    }

    fn request_encryption(&self, peer: DeviceAddress) -> Result<(), StackError> {
        self.record("request_encryption", StackCommand::RequestEncryption { peer })
    }

    fn exchange_mtu(&self, conn: ConnectionId) -> Result<(), StackError> {
        self.record("exchange_mtu", StackCommand::ExchangeMtu { conn })
    }
}
