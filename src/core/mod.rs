//! Core types shared across modules

pub mod address;
pub mod uuid;
