//! GATT server implementation: the attribute server engine, the boundary
//! trait to the external stack, and mocks for testing against it.

pub mod ids;
pub mod mocks;
pub mod server;
pub mod stack;
