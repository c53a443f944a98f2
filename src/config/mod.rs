//! Native manager configuration: parsing, editing and credential lookup
//!
//! - [`document`]: lossless model of the section-based file format
//! - [`editor`]: the [`ConfigEditor`] seam over the file on disk
//! - [`locator`]: which user section holds the canonical credential

pub mod document;
pub mod editor;
pub mod locator;

pub use document::{ConfigDocument, KeyValue, Line, LineEnding, LineKind};
pub use editor::{ConfigEditor, FileConfigEditor};
pub use locator::{endpoint, is_enabled, locate, locate_section};
