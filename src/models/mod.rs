//! # Domain Models
//!
//! Credential types shared by the locator, the protocol client and the
//! environment mirror.
//!
//! ## Security Design
//!
//! The [`SecureString`] type carries manager secrets:
//! - Secret data is zeroed on drop
//! - Never exposed in `Debug`, `Display` or `Serialize` output; only the
//!   masked prefix from [`mask_secret`] is ever surfaced

pub mod credentials;

pub use credentials::{mask_secret, Credential, SecureString, Username};
