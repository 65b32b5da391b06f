//! Canary Core
//!
//! Core types and abstractions for the Canary release-testing system.
//!
//! This crate contains:
//! - Domain types: stored objects (Release, TestJob) and the worker records they drive
//! - DTOs: Data transfer objects for inter-service communication

pub mod domain;
pub mod dto;
