//! These are strongly-typed identifiers representing the various objects
//! correlated across stack callbacks

/// The application id assigned to a service at build time; correlates the
/// registration-completion event back to the declaring service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AppId(pub u16);

/// The interface id the stack assigns to a registered application. All later
/// registration-phase events for the service carry it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u16);

/// The handle of a given ATT attribute, authoritative only once the stack has
/// confirmed creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttHandle(pub u16);

/// The id of the active connection. Zero means "not connected".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u16);

impl ConnectionId {
    /// The sentinel value used while no central is connected.
    pub const NONE: ConnectionId = ConnectionId(0);
}

/// The id of an in-flight ATT transaction, echoed back in the response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u32);
