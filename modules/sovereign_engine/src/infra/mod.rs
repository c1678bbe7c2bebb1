//! Infrastructure layer - adapters for the domain ports

pub mod memory;
