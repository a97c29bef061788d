//! Core types and traits for the Linkvault URL store.
//!
//! This crate provides the storage contract and the value types shared by
//! every backend engine and by the identifier generator.

pub mod error;
pub mod repository;
pub mod user;

pub use error::{Result, StorageError};
pub use repository::{NewUrl, Resolution, UrlStorage, UserUrl};
pub use user::UserId;
