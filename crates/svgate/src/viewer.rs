//! A full-size viewer over one diagram: its own render slot, zoom, fullscreen, a cancel-key
//! capture, and export of whatever it currently shows.

use crate::engine::{LayoutEngine, RenderId};
use crate::export::download::DownloadSink;
use crate::export::{ExportError, RasterExporter};
use crate::renderer::{DiagramRenderer, DiagramView, RenderError, RenderOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use svgate_core::export_filename;

pub const MIN_ZOOM: f64 = 0.2;
pub const MAX_ZOOM: f64 = 3.0;
pub const ZOOM_STEP: f64 = 0.2;

/// Role prefix of viewer render identifiers; keeps them apart from inline previews.
const VIEWER_ROLE: &str = "viewer";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerState {
    pub is_fullscreen: bool,
    pub zoom_scale: f64,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            is_fullscreen: false,
            zoom_scale: 1.0,
        }
    }
}

impl ViewerState {
    fn step_zoom(&mut self, delta: f64) -> f64 {
        let next = ((self.zoom_scale + delta) * 10.0).round() / 10.0;
        self.zoom_scale = next.clamp(MIN_ZOOM, MAX_ZOOM);
        self.zoom_scale
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Escape,
    Enter,
    Tab,
    Char(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// The host should unmount the viewer.
    Unmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDisposition {
    /// The session handled the key; no other handler should see it.
    Consumed(SessionSignal),
    Propagate,
}

pub struct ViewerSession<E: LayoutEngine, S: DownloadSink> {
    engine: Arc<E>,
    exporter: RasterExporter<S>,
    renderer: Option<DiagramRenderer<E>>,
    title: String,
    state: ViewerState,
    capturing_keys: bool,
}

impl<E: LayoutEngine, S: DownloadSink> std::fmt::Debug for ViewerSession<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("renderer", &self.renderer)
            .field("title", &self.title)
            .field("state", &self.state)
            .field("capturing_keys", &self.capturing_keys)
            .finish_non_exhaustive()
    }
}

impl<E: LayoutEngine, S: DownloadSink> ViewerSession<E, S> {
    pub fn new(engine: Arc<E>, exporter: RasterExporter<S>) -> Self {
        Self {
            engine,
            exporter,
            renderer: None,
            title: String::new(),
            state: ViewerState::default(),
            capturing_keys: false,
        }
    }

    /// Opens (or reopens) the viewer on `source` and renders it in a fresh slot.
    pub async fn open(&mut self, source: &str, title: &str) -> Result<RenderOutcome, RenderError> {
        if let Some(previous) = self.renderer.take() {
            previous.teardown();
        }
        self.state = ViewerState::default();
        self.title = title.to_string();
        self.capturing_keys = true;

        let renderer = self
            .renderer
            .insert(DiagramRenderer::new(Arc::clone(&self.engine), VIEWER_ROLE));
        tracing::debug!(id = %renderer.id(), title, "viewer opened");
        renderer.render(source).await
    }

    /// Tears the slot down and releases the key capture. Safe to call when already closed.
    pub fn close(&mut self) -> SessionSignal {
        if let Some(renderer) = self.renderer.take() {
            renderer.teardown();
            tracing::debug!(id = %renderer.id(), "viewer closed");
        }
        self.capturing_keys = false;
        SessionSignal::Unmount
    }

    pub fn is_open(&self) -> bool {
        self.renderer.is_some()
    }

    /// Sees keys before any other handler while the viewer is open.
    pub fn handle_key(&mut self, key: &Key) -> KeyDisposition {
        if !self.capturing_keys {
            return KeyDisposition::Propagate;
        }
        match key {
            Key::Escape => KeyDisposition::Consumed(self.close()),
            _ => KeyDisposition::Propagate,
        }
    }

    pub fn zoom_in(&mut self) -> f64 {
        self.state.step_zoom(ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> f64 {
        self.state.step_zoom(-ZOOM_STEP)
    }

    pub fn reset_zoom(&mut self) -> f64 {
        self.state.zoom_scale = 1.0;
        self.state.zoom_scale
    }

    pub fn toggle_fullscreen(&mut self) -> bool {
        self.state.is_fullscreen = !self.state.is_fullscreen;
        self.state.is_fullscreen
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn render_id(&self) -> Option<&RenderId> {
        self.renderer.as_ref().map(DiagramRenderer::id)
    }

    pub fn renderer(&self) -> Option<&DiagramRenderer<E>> {
        self.renderer.as_ref()
    }

    pub fn exporter(&self) -> &RasterExporter<S> {
        &self.exporter
    }

    /// The current display; a failed render carries the diagram text it failed on.
    pub fn view(&self) -> DiagramView {
        let Some(renderer) = &self.renderer else {
            return DiagramView::Empty;
        };
        match renderer.view() {
            DiagramView::Error(mut panel) => {
                panel.source = renderer.source();
                DiagramView::Error(panel)
            }
            view => view,
        }
    }

    /// Exports the displayed diagram as `<title>.png`. The on-screen element is not touched.
    pub async fn export(&self) -> Result<PathBuf, ExportError> {
        let element = self
            .renderer
            .as_ref()
            .and_then(DiagramRenderer::current_element)
            .ok_or(ExportError::NothingToExport)?;
        let filename = export_filename(&self.title);
        self.exporter.export(&element, &filename).await
    }
}

impl<E: LayoutEngine, S: DownloadSink> Drop for ViewerSession<E, S> {
    fn drop(&mut self) {
        self.close();
    }
}
