//! API layer - in-process adapters over the domain service

pub mod native;
