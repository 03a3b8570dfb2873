//! Mocked implementations of the stack boundary, for use in test

pub mod mock_stack;
