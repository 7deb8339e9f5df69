#![forbid(unsafe_code)]

//! `svgate` turns untrusted diagram text into something safe to show and to download.
//!
//! Pipeline: diagram text → [`LayoutEngine`] (external, fallible) → sanitizer
//! ([`svgate_core::sanitize`]) → the render target of a [`DiagramRenderer`] slot → on demand,
//! [`RasterExporter`] → PNG handed to a [`DownloadSink`].
//!
//! All futures in this crate are runtime-agnostic and meant to be driven on a single thread
//! (e.g. `futures::executor::block_on` or a `LocalPool`). CPU-heavy export stages run on a
//! worker thread and are awaited through a oneshot channel.

pub mod config;
pub mod engine;
pub mod export;
pub mod renderer;
mod task;
pub mod viewer;

pub use svgate_core::{Dimensions, SvgElement, export_filename, resolve_dimensions, sanitize_svg};

pub use config::{ConfigError, EngineSettings, ExportSettings, SvgateConfig};
pub use engine::{CommandEngine, EngineError, LayoutEngine, RenderId};
pub use export::download::{DirectorySink, DownloadSink};
pub use export::{ExportError, ExportJob, Raster, RasterExporter};
pub use renderer::{
    DiagramRenderer, DiagramView, ErrorPanel, RenderError, RenderOutcome, RenderResult,
    RenderState,
};
pub use viewer::{Key, KeyDisposition, SessionSignal, ViewerSession, ViewerState};
