//! The external layout engine seam.
//!
//! The engine is a fallible black box: it turns diagram text into raw SVG for a given render
//! identifier and may keep bookkeeping per identifier until told to release it. Nothing it
//! returns is trusted; callers sanitize the markup before use.

use crate::config::{EngineSettings, ID_PLACEHOLDER};
use crate::task::offload;
use std::collections::HashSet;
use std::future::Future;
use std::io::Write as _;
use std::process::{Command, Stdio};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start layout engine `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("layout engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The engine rejected the diagram (bad syntax or an internal fault).
    #[error("{message}")]
    Rejected { message: String },
    #[error("layout engine produced no SVG")]
    NoMarkup,
    #[error("layout engine worker stopped before answering")]
    WorkerLost,
}

/// Identifier of one render slot. Unique for the slot's lifetime and usable as an SVG `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderId(String);

impl RenderId {
    /// A fresh identifier such as `viewer-3f2a…`.
    pub fn new(role: &str) -> Self {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        Self(sanitize_svg_id(&format!("{role}-{unique}")))
    }

    /// Wraps a caller-chosen identifier, normalized into a valid SVG `id` token.
    pub fn from_raw(raw: &str) -> Self {
        Self(sanitize_svg_id(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Converts an arbitrary string into a conservative SVG `id` token.
///
/// Engines use the root id as a prefix for internal ids (markers, gradients), so two diagrams
/// inlined in the same view must not share one.
fn sanitize_svg_id(raw: &str) -> String {
    let raw = raw.trim();
    let mut out = String::with_capacity(raw.len() + 2);
    for ch in raw.chars() {
        let keep = ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ':' | '.');
        if keep {
            out.push(ch);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.contains("--") {
        out = out.replace("--", "-");
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        return "d-untitled".to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_alphabetic()) {
        trimmed.to_string()
    } else {
        format!("d-{trimmed}")
    }
}

/// An external diagram layout engine.
///
/// `render` may be called repeatedly for the same identifier (every re-render of a slot);
/// `release` is called once when the slot is torn down and must forget everything held for
/// that identifier.
pub trait LayoutEngine {
    fn render(
        &self,
        id: &RenderId,
        source: &str,
    ) -> impl Future<Output = Result<String, EngineError>>;

    fn release(&self, id: &RenderId);
}

static ENGINE_SETTINGS: OnceLock<EngineSettings> = OnceLock::new();

/// Initializes the process-wide engine configuration.
///
/// Idempotent: the first call wins and later calls return the settings already in force.
pub fn initialize(settings: EngineSettings) -> &'static EngineSettings {
    let mut installed = false;
    let current = ENGINE_SETTINGS.get_or_init(|| {
        installed = true;
        settings
    });
    if installed {
        tracing::debug!(command = %current.command, "layout engine initialized");
    } else {
        tracing::debug!("layout engine already initialized; keeping existing settings");
    }
    current
}

/// The settings in force, initializing with defaults on first use.
pub fn settings() -> &'static EngineSettings {
    ENGINE_SETTINGS.get_or_init(|| {
        tracing::debug!("layout engine initialized with defaults");
        EngineSettings::default()
    })
}

pub fn is_initialized() -> bool {
    ENGINE_SETTINGS.get().is_some()
}

/// Runs an external command per render: diagram text on stdin, SVG on stdout, diagnostics on
/// stderr with a non-zero exit status on failure.
#[derive(Debug)]
pub struct CommandEngine {
    settings: &'static EngineSettings,
    live: Mutex<HashSet<RenderId>>,
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandEngine {
    pub fn new() -> Self {
        Self {
            settings: settings(),
            live: Mutex::default(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        self.settings
    }

    /// Whether `id` has engine state that has not been released yet.
    pub fn is_live(&self, id: &RenderId) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(id)
    }

    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn args_for(&self, id: &RenderId) -> Vec<String> {
        self.settings
            .args
            .iter()
            .map(|arg| arg.replace(ID_PLACEHOLDER, id.as_str()))
            .collect()
    }
}

impl LayoutEngine for CommandEngine {
    async fn render(&self, id: &RenderId, source: &str) -> Result<String, EngineError> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone());

        let command = self.settings.command.clone();
        let args = self.args_for(id);
        let source = source.to_string();
        tracing::debug!(%id, %command, "invoking layout engine");

        offload("engine", move || run_command(&command, &args, &source))
            .await
            .ok_or(EngineError::WorkerLost)?
    }

    fn release(&self, id: &RenderId) {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
        if removed {
            tracing::debug!(%id, "released layout engine state");
        }
    }
}

fn run_command(command: &str, args: &[String], source: &str) -> Result<String, EngineError> {
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| EngineError::Spawn {
            command: command.to_string(),
            source,
        })?;

    // Feed stdin from its own thread so a chatty engine cannot deadlock on a full stdout pipe.
    let stdin = child.stdin.take();
    let input = source.to_string();
    let writer = std::thread::spawn(move || -> std::io::Result<()> {
        if let Some(mut stdin) = stdin {
            stdin.write_all(input.as_bytes())?;
        }
        Ok(())
    });

    let output = child.wait_with_output()?;
    // A broken pipe only means the engine stopped reading; its exit status decides.
    let _ = writer.join();

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim();
        let message = if message.is_empty() {
            format!("layout engine exited with {}", output.status)
        } else {
            message.to_string()
        };
        return Err(EngineError::Rejected { message });
    }

    let markup = String::from_utf8(output.stdout).map_err(|_| EngineError::NoMarkup)?;
    if !markup.contains("<svg") {
        return Err(EngineError::NoMarkup);
    }
    Ok(markup)
}
