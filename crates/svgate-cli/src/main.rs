use futures::executor::block_on;
use serde::Serialize;
use std::io::{BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use svgate::engine;
use svgate::{
    CommandEngine, ConfigError, DiagramRenderer, DirectorySink, ErrorPanel, ExportError, Key,
    KeyDisposition, RasterExporter, RenderError, RenderId, RenderOutcome, RenderResult,
    SvgElement, SvgateConfig, ViewerSession,
};
use svgate_core::{export_filename, resolve_dimensions, sanitize_svg};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum CliError {
    Usage(&'static str),
    Io(std::io::Error),
    Config(ConfigError),
    Render(RenderError),
    Export(ExportError),
    Json(serde_json::Error),
    RenderFailed(ErrorPanel),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Config(err) => write!(f, "{err}"),
            CliError::Render(err) => write!(f, "{err}"),
            CliError::Export(err) => write!(f, "export failed: {err}"),
            CliError::Json(err) => write!(f, "JSON error: {err}"),
            CliError::RenderFailed(panel) => write!(f, "{panel}"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<RenderError> for CliError {
    fn from(value: RenderError) -> Self {
        Self::Render(value)
    }
}

impl From<ExportError> for CliError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum Command {
    #[default]
    Render,
    Export,
    Dimensions,
    Sanitize,
    View,
}

#[derive(Debug, Default)]
struct Args {
    command: Command,
    input: Option<String>,
    config: Option<String>,
    diagram_id: Option<String>,
    out: Option<String>,
    out_dir: Option<String>,
    title: Option<String>,
    scale: Option<f32>,
    background: Option<String>,
    from_svg: bool,
}

#[derive(Serialize)]
struct DimensionsOut {
    width: f64,
    height: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewerOut {
    open: bool,
    zoom_scale: f64,
    is_fullscreen: bool,
}

fn usage() -> &'static str {
    "svgate-cli\n\
\n\
USAGE:\n\
  svgate-cli [render] [--config <path>] [--id <render-id>] [--out <path>] [<path>|-]\n\
  svgate-cli export [--config <path>] [--from-svg] [--title <title>] [--scale <n>] [--background <color>] [--out-dir <dir>] [<path>|-]\n\
  svgate-cli dimensions [<path>|-]\n\
  svgate-cli sanitize [--out <path>] [<path>|-]\n\
  svgate-cli view [--config <path>] [--title <title>] [--scale <n>] [--out-dir <dir>] <path>\n\
\n\
NOTES:\n\
  - If <path> is omitted or '-', input is read from stdin.\n\
  - render runs the configured layout engine and prints sanitized SVG.\n\
  - export writes <title>.png into --out-dir (default: current directory); --from-svg skips the\n\
    engine and exports the input as SVG markup.\n\
  - view reads commands from stdin, one per line: + - 0 f e esc (zoom in/out/reset,\n\
    fullscreen, export, close).\n\
  - Logging goes to stderr; set SVGATE_LOG or RUST_LOG (default: warn).\n\
"
}

fn next_value<'a>(it: &mut impl Iterator<Item = &'a String>) -> Result<&'a String, CliError> {
    it.next().ok_or(CliError::Usage(usage()))
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();

    let mut it = argv.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "render" => args.command = Command::Render,
            "export" => args.command = Command::Export,
            "dimensions" => args.command = Command::Dimensions,
            "sanitize" => args.command = Command::Sanitize,
            "view" => args.command = Command::View,
            "--from-svg" => args.from_svg = true,
            "--config" => args.config = Some(next_value(&mut it)?.clone()),
            "--id" => args.diagram_id = Some(next_value(&mut it)?.clone()),
            "--out" => args.out = Some(next_value(&mut it)?.clone()),
            "--out-dir" => args.out_dir = Some(next_value(&mut it)?.clone()),
            "--title" => args.title = Some(next_value(&mut it)?.clone()),
            "--scale" => {
                let scale = next_value(&mut it)?
                    .parse::<f32>()
                    .map_err(|_| CliError::Usage(usage()))?;
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(CliError::Usage(usage()));
                }
                args.scale = Some(scale);
            }
            "--background" => {
                let bg = next_value(&mut it)?;
                if !bg.trim().is_empty() {
                    args.background = Some(bg.trim().to_string());
                }
            }
            "--" => {
                if let Some(rest) = it.next() {
                    if args.input.is_some() {
                        return Err(CliError::Usage(usage()));
                    }
                    args.input = Some(rest.clone());
                }
                if it.next().is_some() {
                    return Err(CliError::Usage(usage()));
                }
            }
            "-" => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some("-".to_string());
            }
            other if other.starts_with('-') => return Err(CliError::Usage(usage())),
            path => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    if matches!(args.command, Command::View) && matches!(args.input.as_deref(), None | Some("-"))
    {
        // stdin carries viewer commands, so the diagram must come from a file.
        return Err(CliError::Usage(usage()));
    }

    Ok(args)
}

fn read_input(input: Option<&str>) -> Result<String, CliError> {
    match input {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn write_text(text: &str, out: Option<&str>) -> Result<(), CliError> {
    match out {
        None => {
            print!("{text}");
            Ok(())
        }
        Some(path) => {
            std::fs::write(path, text)?;
            Ok(())
        }
    }
}

fn load_config(args: &Args) -> Result<SvgateConfig, CliError> {
    let mut config = match args.config.as_deref() {
        Some(path) => SvgateConfig::load(path)?,
        None => SvgateConfig::default(),
    };
    if let Some(scale) = args.scale {
        config.export.scale = scale;
    }
    if let Some(bg) = &args.background {
        config.export.background = bg.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Title for exported files: `--title`, else the input file stem, else `diagram`.
fn export_title(args: &Args) -> String {
    if let Some(title) = &args.title {
        return title.clone();
    }
    args.input
        .as_deref()
        .filter(|p| *p != "-")
        .and_then(|p| Path::new(p).file_stem())
        .and_then(|stem| stem.to_str())
        .unwrap_or("diagram")
        .to_string()
}

fn engine_for(config: &SvgateConfig) -> Arc<CommandEngine> {
    engine::initialize(config.engine.clone());
    Arc::new(CommandEngine::new())
}

fn render_source(
    args: &Args,
    config: &SvgateConfig,
    source: &str,
) -> Result<Option<SvgElement>, CliError> {
    let engine = engine_for(config);
    let renderer = match &args.diagram_id {
        Some(id) => DiagramRenderer::with_id(engine, RenderId::from_raw(id)),
        None => DiagramRenderer::new(engine, "inline"),
    };

    match block_on(renderer.render(source))? {
        RenderOutcome::Applied(RenderResult::Rendered { .. }) => Ok(renderer.current_element()),
        RenderOutcome::Applied(RenderResult::Failed { message }) => {
            Err(CliError::RenderFailed(ErrorPanel {
                message,
                source: Some(source.to_string()),
            }))
        }
        RenderOutcome::Idle | RenderOutcome::Unchanged | RenderOutcome::Superseded => Ok(None),
    }
}

fn run_render(args: &Args) -> Result<(), CliError> {
    let config = load_config(args)?;
    let source = read_input(args.input.as_deref())?;
    if let Some(element) = render_source(args, &config, &source)? {
        write_text(element.as_str(), args.out.as_deref())?;
    }
    Ok(())
}

fn run_export(args: &Args) -> Result<(), CliError> {
    let config = load_config(args)?;
    let input = read_input(args.input.as_deref())?;
    let element = if args.from_svg {
        Some(SvgElement::sanitize(&input))
    } else {
        render_source(args, &config, &input)?
    };
    let element = element
        .filter(|el| !el.is_empty())
        .ok_or(ExportError::NothingToExport)?;

    let out_dir = PathBuf::from(args.out_dir.as_deref().unwrap_or("."));
    let exporter = RasterExporter::new(config.export, DirectorySink::new(out_dir));
    let filename = export_filename(&export_title(args));
    let path = block_on(exporter.export(&element, &filename))?;
    println!("{}", path.display());
    Ok(())
}

fn run_dimensions(args: &Args) -> Result<(), CliError> {
    let markup = read_input(args.input.as_deref())?;
    let dims = resolve_dimensions(&sanitize_svg(&markup));
    serde_json::to_writer(
        std::io::stdout().lock(),
        &DimensionsOut {
            width: dims.width,
            height: dims.height,
        },
    )?;
    println!();
    Ok(())
}

fn run_sanitize(args: &Args) -> Result<(), CliError> {
    let markup = read_input(args.input.as_deref())?;
    write_text(&sanitize_svg(&markup), args.out.as_deref())
}

fn print_viewer<E, S>(viewer: &ViewerSession<E, S>) -> Result<(), CliError>
where
    E: svgate::LayoutEngine,
    S: svgate::DownloadSink,
{
    let state = viewer.state();
    serde_json::to_writer(
        std::io::stdout().lock(),
        &ViewerOut {
            open: viewer.is_open(),
            zoom_scale: state.zoom_scale,
            is_fullscreen: state.is_fullscreen,
        },
    )?;
    println!();
    Ok(())
}

fn run_view(args: &Args) -> Result<(), CliError> {
    let config = load_config(args)?;
    let source = read_input(args.input.as_deref())?;
    let out_dir = PathBuf::from(args.out_dir.as_deref().unwrap_or("."));
    let exporter = RasterExporter::new(config.export.clone(), DirectorySink::new(out_dir));
    let mut viewer = ViewerSession::new(engine_for(&config), exporter);

    block_on(viewer.open(&source, &export_title(args)))?;
    if let svgate::DiagramView::Error(panel) = viewer.view() {
        eprintln!("{panel}");
    }
    print_viewer(&viewer)?;

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        match line.trim() {
            "" => continue,
            "+" | "zoom-in" => {
                viewer.zoom_in();
            }
            "-" | "zoom-out" => {
                viewer.zoom_out();
            }
            "0" | "reset" => {
                viewer.reset_zoom();
            }
            "f" | "fullscreen" => {
                viewer.toggle_fullscreen();
            }
            "e" | "export" => match block_on(viewer.export()) {
                Ok(path) => println!("{}", path.display()),
                Err(err) => eprintln!("export failed: {err}"),
            },
            "esc" | "escape" | "q" => {
                if let KeyDisposition::Consumed(_) = viewer.handle_key(&Key::Escape) {
                    print_viewer(&viewer)?;
                    return Ok(());
                }
            }
            other => {
                let mut chars = other.chars();
                if let (Some(c), None) = (chars.next(), chars.next()) {
                    viewer.handle_key(&Key::Char(c));
                } else {
                    eprintln!("unknown viewer command: {other}");
                }
            }
        }
        print_viewer(&viewer)?;
    }

    viewer.close();
    Ok(())
}

fn run(args: Args) -> Result<(), CliError> {
    match args.command {
        Command::Render => run_render(&args),
        Command::Export => run_export(&args),
        Command::Dimensions => run_dimensions(&args),
        Command::Sanitize => run_sanitize(&args),
        Command::View => run_view(&args),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SVGATE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    init_logging();

    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    match run(args) {
        Ok(()) => {}
        Err(err @ CliError::RenderFailed(_)) => {
            eprintln!("{err}");
            std::process::exit(3);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("svgate-cli")
            .chain(parts.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn render_is_the_default_command() {
        let args = parse_args(&argv(&["diagram.mmd"])).unwrap();
        assert!(matches!(args.command, Command::Render));
        assert_eq!(args.input.as_deref(), Some("diagram.mmd"));
    }

    #[test]
    fn export_flags_are_parsed() {
        let args = parse_args(&argv(&[
            "export", "--from-svg", "--title", "Order Flow", "--scale", "3", "--out-dir", "out", "-",
        ]))
        .unwrap();
        assert!(matches!(args.command, Command::Export));
        assert!(args.from_svg);
        assert_eq!(args.scale, Some(3.0));
        assert_eq!(args.out_dir.as_deref(), Some("out"));
        assert_eq!(args.input.as_deref(), Some("-"));
        assert_eq!(export_title(&args), "Order Flow");
    }

    #[test]
    fn bad_arguments_are_usage_errors() {
        for bad in [
            &["--scale", "0"][..],
            &["--scale"][..],
            &["--bogus"][..],
            &["a.svg", "b.svg"][..],
            &["view"][..],
            &["view", "-"][..],
        ] {
            assert!(
                matches!(parse_args(&argv(bad)), Err(CliError::Usage(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn export_title_falls_back_to_the_file_stem() {
        let args = parse_args(&argv(&["export", "flows/Order Flow.mmd"])).unwrap();
        assert_eq!(export_title(&args), "Order Flow");
        let args = parse_args(&argv(&["export"])).unwrap();
        assert_eq!(export_title(&args), "diagram");
    }
}
