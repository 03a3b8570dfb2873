//! The boundary to the external radio/protocol stack.
//!
//! The server core never owns the radio: it issues commands through
//! [`GattStack`] and reacts to [`StackEvent`] callbacks delivered on the
//! stack's own thread. Commands return immediately; their outcomes arrive
//! later as further events.

use thiserror::Error;

use crate::core::{address::DeviceAddress, uuid::Uuid};

use super::{
    ids::{AppId, AttHandle, ConnectionId, InterfaceId, TransactionId},
    server::attribute::{AttPermissions, CharacteristicProperties},
};

/// ATT protocol status codes surfaced to the remote peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttStatus {
    Ok,
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidAttributeLength,
    InvalidOffset,
    UnlikelyError,
}

/// A command the stack refused to accept.
#[derive(Debug, Error)]
#[error("stack rejected {command}: {reason}")]
pub struct StackError {
    /// The command that failed, for diagnostics.
    pub command: &'static str,
    /// Stack-specific failure description.
    pub reason: String,
}

/// The payload of a read response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeData {
    pub handle: AttHandle,
    pub offset: u16,
    pub value: Vec<u8>,
}

/// The command surface the server core issues to the external stack.
///
/// Implementations must be callable from any thread and must not block for
/// unbounded time.
pub trait GattStack: Send + Sync {
    /// Set the local static-random device address before advertising starts.
    fn set_local_address(&self, address: DeviceAddress) -> Result<(), StackError>;

    /// Register an application; completion arrives as
    /// [`StackEvent::RegistrationComplete`].
    fn register_application(&self, app: AppId) -> Result<(), StackError>;

    /// Create a service sized to `reserved_handles` attributes; completion
    /// arrives as [`StackEvent::ServiceCreated`].
    fn create_service(
        &self,
        interface: InterfaceId,
        uuid: Uuid,
        is_primary: bool,
        reserved_handles: u16,
    ) -> Result<(), StackError>;

    /// Add a characteristic to a created service; completion arrives as
    /// [`StackEvent::CharacteristicAdded`], correlated by UUID.
    fn add_characteristic(
        &self,
        service_handle: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
        properties: CharacteristicProperties,
        value: &[u8],
        max_len: usize,
    ) -> Result<(), StackError>;

    /// Add a descriptor to the most recently added characteristic of a
    /// service; completion arrives as [`StackEvent::DescriptorAdded`].
    fn add_descriptor(
        &self,
        service_handle: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
        value: &[u8],
        max_len: usize,
    ) -> Result<(), StackError>;

    /// Start a fully populated service, making it visible to the peer.
    fn start_service(&self, service_handle: AttHandle) -> Result<(), StackError>;

    /// Respond to a read/write transaction that demanded a response.
    fn send_response(
        &self,
        conn: ConnectionId,
        trans: TransactionId,
        status: AttStatus,
        data: Option<AttributeData>,
    ) -> Result<(), StackError>;

    /// Push an unsolicited value update (notification, or indication when
    /// `confirm` is set) to the peer.
    fn send_value(
        &self,
        interface: InterfaceId,
        conn: ConnectionId,
        handle: AttHandle,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), StackError>;

    fn start_advertising(&self) -> Result<(), StackError>;
    fn stop_advertising(&self) -> Result<(), StackError>;

    /// Request an encrypted link upgrade with the connected peer.
    fn request_encryption(&self, peer: DeviceAddress) -> Result<(), StackError>;

    /// Kick off transfer-unit negotiation; the outcome arrives as
    /// [`StackEvent::MtuChanged`].
    fn exchange_mtu(&self, conn: ConnectionId) -> Result<(), StackError>;
}

/// The callback surface the external stack delivers to
/// [`AttributeServer::handle_event`](super::server::AttributeServer::handle_event).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackEvent {
    /// An application registration completed and was assigned an interface.
    RegistrationComplete { app: AppId, interface: InterfaceId },
    /// A service was created and assigned its declaration handle.
    ServiceCreated { interface: InterfaceId, handle: AttHandle },
    /// A characteristic value attribute was added; correlate by UUID.
    CharacteristicAdded { interface: InterfaceId, uuid: Uuid, handle: AttHandle },
    /// A descriptor attribute was added; correlate by UUID.
    DescriptorAdded { interface: InterfaceId, uuid: Uuid, handle: AttHandle },
    /// A central connected.
    Connected { conn: ConnectionId, peer: DeviceAddress },
    /// The central disconnected (or the link dropped).
    Disconnected { conn: ConnectionId },
    /// Transfer-unit negotiation completed.
    MtuChanged { conn: ConnectionId, mtu: u16 },
    /// The peer is reading an attribute, possibly one fragment of a long read.
    Read {
        conn: ConnectionId,
        trans: TransactionId,
        handle: AttHandle,
        offset: u16,
        needs_response: bool,
    },
    /// The peer is writing an attribute. `prepared` marks a staged fragment
    /// of a long write.
    Write {
        conn: ConnectionId,
        trans: TransactionId,
        handle: AttHandle,
        offset: u16,
        value: Vec<u8>,
        prepared: bool,
        needs_response: bool,
    },
    /// The peer committed (or cancelled) a long-write sequence.
    ExecuteWrite { conn: ConnectionId, trans: TransactionId },
    /// The peer confirmed a previously sent indication.
    IndicationConfirmed { conn: ConnectionId },
}
