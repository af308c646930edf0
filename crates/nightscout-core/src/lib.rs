//! # Nightscout MCP Core Library
//!
//! Domain logic shared by the gateway and the server binary.
//!
//! ## Modules
//!
//! - `domain` - Configuration, glucose entries, carbohydrate treatments
//! - `service` - Nightscout REST client and the per-user site directory

pub mod domain;
pub mod service;

// Re-export commonly used types
pub use domain::*;
pub use service::*;
