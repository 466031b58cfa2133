//! # ipa-core
//!
//! Core types shared by the IPA directory crates.
//!
//! This crate provides the error taxonomy surfaced to callers of the directory layer and the
//! configuration structure used to reach a directory server.
//!
//! ## Modules
//!
//! - [`error`] - Domain error kinds and their machine-readable codes
//! - [`config`] - Validated directory connection configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{BindCredentials, DirectoryConfig};
pub use error::{Error, Result};
