//! Data model shared by the tootles media crates.
#![allow(missing_docs)]

pub mod error;
pub mod format;
pub mod key;
pub mod media_ref;
pub mod priority;
pub mod tier;

pub use error::{ModelError, Result as ModelResult};
pub use format::{MediaKind, file_extension};
pub use key::ResourceKey;
pub use media_ref::MediaRef;
pub use priority::Priority;
pub use tier::Tier;
