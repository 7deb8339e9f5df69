#![forbid(unsafe_code)]

//! Pure building blocks for displaying untrusted diagram markup.
//!
//! Everything in this crate is synchronous and side-effect free:
//! - [`sanitize`]: allow-list SVG sanitizer; the only way to obtain an [`SvgElement`]
//! - [`dimensions`]: `viewBox` / `width` / `height` resolution with a fixed fallback
//! - [`markup`]: read and edit the root `<svg>` start tag without touching the rest
//! - [`filename`]: export filename derivation from a display title

pub mod dimensions;
pub mod error;
pub mod filename;
pub mod markup;
pub mod sanitize;

pub use dimensions::{Dimensions, resolve_dimensions};
pub use error::{Error, Result};
pub use filename::export_filename;
pub use sanitize::{SvgElement, sanitize_svg};
