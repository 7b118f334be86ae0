//! Taskboard Core - Shared domain types.
//!
//! This crate provides the types passed between the Taskboard components:
//! - `session` - Session/profile store and its remote adapters
//! - `cli` - Command-line front end
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no async
//! runtime. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Identity, session, profile and the newtypes they are built from

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
