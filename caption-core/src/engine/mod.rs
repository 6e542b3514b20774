//! `CaptionEngine` — load-once native engine facade.
//!
//! ## Lifecycle
//!
//! ```text
//! CaptionEngine::new(config)
//!     └─► load()                 → addon resolved + loaded (or lazily on
//!         └─► transcribe(req)      first transcribe), handle cached for
//!             └─► transcribe(..)   the process lifetime — never reloaded
//! ```
//!
//! ## Threading
//!
//! The facade is `Send + Sync`; all fields use interior mutability. The
//! addon's invocation surface is stateless but not documented as reentrant,
//! so in-flight calls are serialized through an async mutex — a second
//! `transcribe` awaits rather than racing the native layer. First-use load
//! races are serialized through a one-time-init guard.

pub mod invoke;
pub mod loader;
pub mod native;

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::error::{CaptionError, Result};
use crate::language::Language;
use crate::normalize::{self, Segment};
use crate::subtitle;

pub use invoke::{CancelCheck, ProgressSink};
pub use native::{AddonEngine, EngineParams, NativeCallError, NativeEngine};

/// Environment override for the default model path.
pub(crate) const MODEL_PATH_ENV: &str = "CAPTION_MODEL_PATH";

/// Configuration for `CaptionEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine assets directory holding the addon and bundled models.
    /// Overridable at runtime with `CAPTION_ENGINE_DIR`. Default: `engine`.
    pub assets_dir: PathBuf,
    /// Default model file, relative to `assets_dir`, used when a request
    /// carries no model path and `CAPTION_MODEL_PATH` is unset.
    /// Default: `models/ggml-base.bin`.
    pub default_model: String,
    /// Whether requests use device acceleration unless they say otherwise.
    pub use_gpu: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("engine"),
            default_model: "models/ggml-base.bin".into(),
            use_gpu: true,
        }
    }
}

/// Requested output form for a transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Canonical segments for downstream persistence/display.
    Segments,
    /// SRT text rendered from the canonical segments.
    Subtitle,
}

/// One transcription request.
///
/// The audio file must already exist at `audio_path` as fixed-format PCM
/// (mono 16 kHz s16le) — upstream extraction owns that contract; only
/// existence is verified here.
#[derive(Clone)]
pub struct TranscriptionRequest {
    pub audio_path: PathBuf,
    pub language: Language,
    /// Decoding prompt. Ignored for the Chinese variants, which inject
    /// their own fixed register prompt.
    pub prompt: Option<String>,
    /// Model override; falls back to the configured default.
    pub model_path: Option<PathBuf>,
    /// Device-acceleration override; falls back to the config.
    pub use_gpu: Option<bool>,
    pub output: OutputFormat,
    pub progress: Option<ProgressSink>,
    pub cancel: Option<CancelCheck>,
}

impl TranscriptionRequest {
    pub fn new(audio_path: impl Into<PathBuf>) -> Self {
        Self {
            audio_path: audio_path.into(),
            language: Language::Auto,
            prompt: None,
            model_path: None,
            use_gpu: None,
            output: OutputFormat::Segments,
            progress: None,
            cancel: None,
        }
    }
}

impl std::fmt::Debug for TranscriptionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionRequest")
            .field("audio_path", &self.audio_path)
            .field("language", &self.language)
            .field("model_path", &self.model_path)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// Successful transcription output.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionOutput {
    Segments(Vec<Segment>),
    Subtitle(String),
}

/// The top-level engine facade. Create once (or use [`global`]) and share.
pub struct CaptionEngine {
    config: EngineConfig,
    /// Load-once addon cache. Never reloaded, never torn down mid-process.
    native: OnceLock<Arc<dyn NativeEngine>>,
    /// Serializes racing first loads so the addon's init section runs once.
    load_guard: parking_lot::Mutex<()>,
    /// Serializes in-flight native calls; the addon is not reentrant-safe.
    call_guard: tokio::sync::Mutex<()>,
}

impl CaptionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            native: OnceLock::new(),
            load_guard: parking_lot::Mutex::new(()),
            call_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Build an engine over an already-constructed backend. The seam used
    /// by tests and by embedders that provide their own binding.
    pub fn with_native(config: EngineConfig, native: Arc<dyn NativeEngine>) -> Self {
        let engine = Self::new(config);
        let _ = engine.native.set(native);
        engine
    }

    /// Eagerly resolve and load the addon. Optional — `transcribe` loads
    /// lazily on first use — but lets startup code surface installation
    /// defects before any job runs.
    pub fn load(&self) -> Result<()> {
        self.native().map(|_| ())
    }

    /// Whether the addon and the default model both resolve on this
    /// machine, without raising.
    pub fn is_available(&self) -> bool {
        if self.load().is_err() {
            return false;
        }
        self.resolved_model_path(None).is_file()
    }

    /// Transcribe one audio file.
    ///
    /// Asynchronous; the long-running native call runs on the blocking
    /// pool. One call per engine is in flight at a time — concurrent
    /// callers queue on an internal mutex.
    ///
    /// # Errors
    /// Any [`CaptionError`] category. `Cancelled` is the deliberate outcome
    /// of the request's cancellation predicate, not a failure.
    pub async fn transcribe(&self, request: TranscriptionRequest) -> Result<TranscriptionOutput> {
        let native = self.native()?;
        let model_path = self.resolved_model_path(request.model_path.as_ref());

        if !request.audio_path.is_file() {
            return Err(CaptionError::TranscriptionFailed {
                audio: request.audio_path.clone(),
                model: model_path,
                message: "audio file not found".into(),
            });
        }

        // Language/prompt substitution: Chinese variants collapse to the
        // base code and force their register prompt.
        let language = request.language;
        let params = EngineParams {
            audio_path: request.audio_path.clone(),
            model_path,
            language: language.engine_code().to_owned(),
            prompt: language.effective_prompt(request.prompt.as_deref()),
            use_gpu: request.use_gpu.unwrap_or(self.config.use_gpu),
        };

        info!(
            audio = %params.audio_path.display(),
            model = %params.model_path.display(),
            language = params.language,
            "starting transcription"
        );

        let raw = {
            let _in_flight = self.call_guard.lock().await;
            invoke::run(native, params, request.progress.clone(), request.cancel.clone()).await?
        };

        let segments = normalize::normalize(&raw, language);
        info!(segments = segments.len(), "transcription complete");

        match request.output {
            OutputFormat::Segments => Ok(TranscriptionOutput::Segments(segments)),
            OutputFormat::Subtitle => subtitle::to_subtitle_text(&segments)
                .map(TranscriptionOutput::Subtitle)
                .ok_or_else(|| CaptionError::TranscriptionFailed {
                    audio: request.audio_path.clone(),
                    model: self.resolved_model_path(request.model_path.as_ref()),
                    message: "engine produced no subtitle-eligible segments".into(),
                }),
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// The cached addon handle, loading it on first use. Racing first
    /// loads are serialized by `load_guard`; losers reuse the winner's
    /// handle.
    fn native(&self) -> Result<Arc<dyn NativeEngine>> {
        if let Some(native) = self.native.get() {
            return Ok(Arc::clone(native));
        }
        let _guard = self.load_guard.lock();
        if let Some(native) = self.native.get() {
            return Ok(Arc::clone(native));
        }
        let addon = loader::load(&self.config.assets_dir)?;
        let native: Arc<dyn NativeEngine> = Arc::new(addon);
        let _ = self.native.set(Arc::clone(&native));
        Ok(native)
    }

    fn resolved_model_path(&self, requested: Option<&PathBuf>) -> PathBuf {
        invoke::resolve_model_path(
            requested,
            &loader::effective_assets_dir(&self.config.assets_dir),
            &self.config.default_model,
        )
    }
}

impl std::fmt::Debug for CaptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptionEngine")
            .field("config", &self.config)
            .field("loaded", &self.native.get().is_some())
            .finish()
    }
}

/// Process-wide engine, created on first use with the given config.
/// Subsequent calls return the existing instance regardless of config.
pub fn global(config: EngineConfig) -> &'static CaptionEngine {
    static GLOBAL: OnceLock<CaptionEngine> = OnceLock::new();
    GLOBAL.get_or_init(|| CaptionEngine::new(config))
}
