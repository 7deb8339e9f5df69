//! Sanitized SVG element → PNG download.
//!
//! The exporter never touches the element it is given: it works on a duplicate, pins the
//! duplicate's namespace and pixel size, decodes it back from a `data:` URI on a worker thread,
//! paints it onto a white surface at the supersampling scale and encodes the surface as PNG on
//! another worker thread.

pub mod download;
mod fallback;

use crate::config::ExportSettings;
use crate::task::offload;
use base64::Engine as _;
use download::DownloadSink;
use std::path::PathBuf;
use std::sync::Arc;
use svgate_core::markup::{RootEdit, SVG_NAMESPACE, XLINK_NAMESPACE, edit_root};
use svgate_core::{Dimensions, SvgElement, resolve_dimensions};
use tracing::Instrument as _;

pub const DEFAULT_SCALE: f32 = 2.0;

/// 64 megapixels (256 MiB of RGBA).
pub const DEFAULT_MAX_PIXELS: u64 = 64 * 1024 * 1024;

const DATA_URI_PREFIX: &str = "data:image/svg+xml;base64,";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("cannot allocate a {width}x{height} drawing surface")]
    NoSurfaceContext { width: f64, height: f64 },
    #[error("failed to decode SVG image: {0}")]
    ImageDecodeFailed(String),
    #[error("failed to encode PNG: {0}")]
    BlobEncodeFailed(String),
    #[error("failed to save {filename}: {source}")]
    DownloadFailed {
        filename: String,
        #[source]
        source: std::io::Error,
    },
    #[error("there is no rendered diagram to export")]
    NothingToExport,
}

/// One export request. Lives for a single export call.
#[derive(Debug, Clone, Copy)]
pub struct ExportJob<'a> {
    pub element: &'a SvgElement,
    pub scale: f32,
    pub filename: &'a str,
}

/// An encoded PNG and its pixel size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub struct RasterExporter<S: DownloadSink> {
    settings: ExportSettings,
    sink: S,
    fontdb: Arc<usvg::fontdb::Database>,
}

impl<S: DownloadSink> std::fmt::Debug for RasterExporter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterExporter")
            .field("settings", &self.settings)
            .field("fonts", &self.fontdb.len())
            .finish_non_exhaustive()
    }
}

impl<S: DownloadSink> RasterExporter<S> {
    pub fn new(settings: ExportSettings, sink: S) -> Self {
        let mut fontdb = usvg::fontdb::Database::new();
        if settings.load_system_fonts {
            fontdb.load_system_fonts();
        }
        Self {
            settings,
            sink,
            fontdb: Arc::new(fontdb),
        }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Exports `element` at the configured scale and hands the PNG to the sink as `filename`.
    pub async fn export(
        &self,
        element: &SvgElement,
        filename: &str,
    ) -> Result<PathBuf, ExportError> {
        self.run(ExportJob {
            element,
            scale: self.settings.scale,
            filename,
        })
        .await
    }

    pub async fn run(&self, job: ExportJob<'_>) -> Result<PathBuf, ExportError> {
        let span = tracing::debug_span!("export", filename = job.filename, scale = job.scale);
        async {
            let raster = self.rasterize(&job).await?;
            let path = self
                .sink
                .deliver(job.filename, &raster.png)
                .map_err(|source| ExportError::DownloadFailed {
                    filename: job.filename.to_string(),
                    source,
                })?;
            tracing::debug!(width = raster.width, height = raster.height, "export finished");
            Ok::<_, ExportError>(path)
        }
        .instrument(span)
        .await
    }

    /// Rasterizes without delivering anything.
    pub async fn rasterize(&self, job: &ExportJob<'_>) -> Result<Raster, ExportError> {
        let (markup, dims) = prepare(job.element)?;

        let scale = job.scale;
        let surface_w = (dims.width * f64::from(scale)).ceil();
        let surface_h = (dims.height * f64::from(scale)).ceil();
        let mut pixmap = surface_size(surface_w, surface_h, self.settings.max_pixels)
            .and_then(|(w, h)| tiny_skia::Pixmap::new(w, h))
            .ok_or(ExportError::NoSurfaceContext {
                width: surface_w,
                height: surface_h,
            })?;

        let markup = fallback::foreign_object_text_fallback(&markup, &self.settings.font_family);
        let uri = to_data_uri(&markup);
        let fontdb = Arc::clone(&self.fontdb);
        let font_family = self.settings.font_family.clone();
        let tree = offload("decode", move || decode_data_uri(&uri, fontdb, font_family))
            .await
            .ok_or_else(|| ExportError::ImageDecodeFailed("decoder stopped".to_string()))??;

        let background = parse_color(&self.settings.background)
            .filter(|color| color.is_opaque())
            .unwrap_or(tiny_skia::Color::WHITE);
        pixmap.fill(background);
        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(scale, scale),
            &mut pixmap.as_mut(),
        );

        let (width, height) = (pixmap.width(), pixmap.height());
        let png = offload("encode", move || pixmap.encode_png())
            .await
            .ok_or_else(|| ExportError::BlobEncodeFailed("encoder stopped".to_string()))?
            .map_err(|err| ExportError::BlobEncodeFailed(err.to_string()))?;

        Ok(Raster { png, width, height })
    }
}

/// Duplicates the element's markup with namespaces and the resolved size pinned on the root.
fn prepare(element: &SvgElement) -> Result<(String, Dimensions), ExportError> {
    let source = element.as_str();
    let mut edits = vec![RootEdit::SetIfMissing("xmlns", SVG_NAMESPACE)];
    if source.contains("xlink:") {
        edits.push(RootEdit::SetIfMissing("xmlns:xlink", XLINK_NAMESPACE));
    }
    let markup = edit_root(source, &edits)
        .map_err(|err| ExportError::ImageDecodeFailed(err.to_string()))?;

    let dims = resolve_dimensions(&markup);
    let width = dims.width.to_string();
    let height = dims.height.to_string();
    let markup = edit_root(
        &markup,
        &[RootEdit::Set("width", &width), RootEdit::Set("height", &height)],
    )
    .map_err(|err| ExportError::ImageDecodeFailed(err.to_string()))?;
    Ok((markup, dims))
}

fn surface_size(width: f64, height: f64, max_pixels: u64) -> Option<(u32, u32)> {
    let fits = |v: f64| v.is_finite() && v >= 1.0 && v <= f64::from(u32::MAX);
    if !(fits(width) && fits(height)) {
        return None;
    }
    let (w, h) = (width as u32, height as u32);
    (u64::from(w) * u64::from(h) <= max_pixels).then_some((w, h))
}

fn to_data_uri(markup: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(markup.as_bytes());
    format!("{DATA_URI_PREFIX}{encoded}")
}

fn decode_data_uri(
    uri: &str,
    fontdb: Arc<usvg::fontdb::Database>,
    font_family: String,
) -> Result<usvg::Tree, ExportError> {
    let payload = uri
        .strip_prefix(DATA_URI_PREFIX)
        .ok_or_else(|| ExportError::ImageDecodeFailed("not an SVG data URI".to_string()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|err| ExportError::ImageDecodeFailed(err.to_string()))?;

    let mut opt = usvg::Options::default();
    opt.fontdb = fontdb;
    opt.font_family = font_family;
    usvg::Tree::from_data(&bytes, &opt)
        .map_err(|err| ExportError::ImageDecodeFailed(err.to_string()))
}

/// Parses `white`, `black` and `#rgb`/`#rgba`/`#rrggbb`/`#rrggbbaa`. Backgrounds must also be
/// opaque; see [`tiny_skia::Color::is_opaque`].
pub fn parse_color(text: &str) -> Option<tiny_skia::Color> {
    let s = text.trim().to_ascii_lowercase();
    match s.as_str() {
        "white" => return Some(tiny_skia::Color::WHITE),
        "black" => return Some(tiny_skia::Color::BLACK),
        _ => {}
    }

    let digits = s
        .strip_prefix('#')?
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()?;
    let pair = |hi: u8, lo: u8| (hi << 4) | lo;
    let [r, g, b, a] = match *digits.as_slice() {
        [r, g, b] => [r * 17, g * 17, b * 17, 255],
        [r, g, b, a] => [r * 17, g * 17, b * 17, a * 17],
        [r1, r2, g1, g2, b1, b2] => [pair(r1, r2), pair(g1, g2), pair(b1, b2), 255],
        [r1, r2, g1, g2, b1, b2, a1, a2] => {
            [pair(r1, r2), pair(g1, g2), pair(b1, b2), pair(a1, a2)]
        }
        _ => return None,
    };
    Some(tiny_skia::Color::from_rgba8(r, g, b, a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MemorySink {
        files: RefCell<Vec<(String, Vec<u8>)>>,
    }

    impl DownloadSink for MemorySink {
        fn deliver(&self, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
            self.files
                .borrow_mut()
                .push((filename.to_string(), bytes.to_vec()));
            Ok(PathBuf::from(filename))
        }
    }

    fn exporter() -> RasterExporter<MemorySink> {
        let settings = ExportSettings {
            load_system_fonts: false,
            ..ExportSettings::default()
        };
        RasterExporter::new(settings, MemorySink::default())
    }

    #[test]
    fn parses_named_and_hex_colors() {
        assert_eq!(parse_color(" White "), Some(tiny_skia::Color::WHITE));
        assert_eq!(
            parse_color("#f00"),
            Some(tiny_skia::Color::from_rgba8(255, 0, 0, 255))
        );
        assert_eq!(
            parse_color("#11223380"),
            Some(tiny_skia::Color::from_rgba8(0x11, 0x22, 0x33, 0x80))
        );
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("plaid"), None);
        assert_eq!(parse_color("#ggg"), None);
        assert_eq!(parse_color("transparent"), None);
    }

    #[test]
    fn surface_area_is_capped() {
        assert_eq!(surface_size(8192.0, 8192.0, DEFAULT_MAX_PIXELS), Some((8192, 8192)));
        assert_eq!(surface_size(8193.0, 8192.0, DEFAULT_MAX_PIXELS), None);
        assert_eq!(surface_size(80000.0, 1.0, DEFAULT_MAX_PIXELS), Some((80000, 1)));
        assert_eq!(surface_size(0.5, 10.0, DEFAULT_MAX_PIXELS), None);
    }

    #[test]
    fn huge_view_boxes_are_refused_without_allocating() {
        let exporter = exporter();
        let element = SvgElement::sanitize(r#"<svg viewBox="0 0 40000 40000"></svg>"#);
        let err = block_on(exporter.export(&element, "big.png")).unwrap_err();
        match err {
            ExportError::NoSurfaceContext { width, height } => {
                assert_eq!((width, height), (80000.0, 80000.0));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(exporter.sink().files.borrow().is_empty());
    }

    #[test]
    fn translucent_background_falls_back_to_white() {
        let settings = ExportSettings {
            load_system_fonts: false,
            background: "#00000000".to_string(),
            ..ExportSettings::default()
        };
        let exporter = RasterExporter::new(settings, MemorySink::default());
        let element = SvgElement::sanitize(r#"<svg viewBox="0 0 2 2"></svg>"#);
        let job = ExportJob {
            element: &element,
            scale: 1.0,
            filename: "x.png",
        };
        let raster = block_on(exporter.rasterize(&job)).unwrap();
        let decoder = png::Decoder::new(std::io::Cursor::new(raster.png));
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf).unwrap();
        assert!(buf[..frame.buffer_size()].iter().all(|b| *b == 255));
    }

    #[test]
    fn prepare_pins_namespace_and_size_on_a_duplicate() {
        let element = SvgElement::sanitize(
            r##"<svg viewBox="0 0 320 240"><use xlink:href="#a"/></svg>"##,
        );
        let before = element.clone();
        let (markup, dims) = prepare(&element).unwrap();
        assert_eq!(element, before);
        assert_eq!((dims.width, dims.height), (320.0, 240.0));
        let doc = roxmltree::Document::parse(&markup).unwrap();
        let root = doc.root_element();
        assert_eq!(root.tag_name().namespace(), Some(SVG_NAMESPACE));
        assert_eq!(root.attribute("width"), Some("320"));
        assert_eq!(root.attribute("height"), Some("240"));
    }

    #[test]
    fn rasterizes_at_twice_the_logical_size_on_white() {
        let exporter = exporter();
        let element = SvgElement::sanitize(
            r#"<svg viewBox="0 0 32 24"><rect x="0" y="0" width="8" height="8" fill="black"/></svg>"#,
        );
        let job = ExportJob {
            element: &element,
            scale: 2.0,
            filename: "x.png",
        };
        let raster = block_on(exporter.rasterize(&job)).unwrap();
        assert_eq!((raster.width, raster.height), (64, 48));
        assert!(raster.png.starts_with(b"\x89PNG\r\n\x1a\n"));

        let again = block_on(exporter.rasterize(&job)).unwrap();
        assert_eq!((again.width, again.height), (64, 48));
    }

    #[test]
    fn fractional_sizes_round_up() {
        let exporter = exporter();
        let element = SvgElement::sanitize(r#"<svg width="10.2" height="3.1"></svg>"#);
        let job = ExportJob {
            element: &element,
            scale: 2.0,
            filename: "x.png",
        };
        let raster = block_on(exporter.rasterize(&job)).unwrap();
        assert_eq!((raster.width, raster.height), (21, 7));
    }

    #[test]
    fn oversized_surfaces_are_refused_before_decoding() {
        let exporter = exporter();
        let element = SvgElement::sanitize(r#"<svg viewBox="0 0 900000000 900000000"></svg>"#);
        let err = block_on(exporter.export(&element, "huge.png")).unwrap_err();
        assert!(matches!(err, ExportError::NoSurfaceContext { .. }), "{err}");
        assert!(exporter.sink().files.borrow().is_empty());
    }

    #[test]
    fn empty_element_fails_to_decode_and_delivers_nothing() {
        let exporter = exporter();
        let element = SvgElement::sanitize("");
        let err = block_on(exporter.export(&element, "empty.png")).unwrap_err();
        assert!(matches!(err, ExportError::ImageDecodeFailed(_)), "{err}");
        assert!(exporter.sink().files.borrow().is_empty());
    }

    #[test]
    fn export_delivers_under_the_given_filename() {
        let exporter = exporter();
        let element = SvgElement::sanitize(r#"<svg viewBox="0 0 10 10"></svg>"#);
        let path = block_on(exporter.export(&element, "order_flow_1.png")).unwrap();
        assert_eq!(path, PathBuf::from("order_flow_1.png"));
        let files = exporter.sink().files.borrow();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "order_flow_1.png");
        assert!(files[0].1.starts_with(b"\x89PNG"));
    }
}
