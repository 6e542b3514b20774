//! Cancellable, progress-reporting native invocation.
//!
//! The native call is the single suspension point of the whole core: it
//! runs for seconds to minutes inside `spawn_blocking` while the async
//! caller awaits. Cancellation is cooperative — the predicate cannot stop
//! the native call, it can only:
//!
//! 1. suppress forwarding of further progress ticks, and
//! 2. force the final outcome to `Cancelled` once the call returns control.
//!
//! The progress relay therefore only writes a shared atomic flag; the
//! `Cancelled` error is constructed by the awaiting code after the call
//! settles, never inside the callback (which must not raise across the
//! native boundary).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classify;
use crate::engine::native::{EngineParams, NativeEngine};
use crate::error::{CaptionError, Result};

/// Caller-supplied cancellation predicate, polled from the progress relay
/// and re-checked after the native call settles.
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Caller-visible progress sink, invoked with 0–100 percentages in
/// non-decreasing order.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// Run one native transcription call to completion.
///
/// Returns the raw engine result for the post-processor, or a classified
/// error. A signalled cancellation always wins over whatever the native
/// call produced.
pub(crate) async fn run(
    native: Arc<dyn NativeEngine>,
    params: EngineParams,
    progress: Option<ProgressSink>,
    cancel: Option<CancelCheck>,
) -> Result<Value> {
    let audio = params.audio_path.clone();
    let model = params.model_path.clone();

    // Arena-style shared state between the awaiting task and the callback
    // closure: the relay sets it, the post-settle check reads it.
    let cancelled = Arc::new(AtomicBool::new(false));

    let relay_cancelled = Arc::clone(&cancelled);
    let relay_cancel = cancel.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let last_forwarded = AtomicI32::new(-1);
        let mut relay = |pct: i32| {
            if relay_cancelled.load(Ordering::Relaxed) {
                return;
            }
            if relay_cancel.as_ref().map_or(false, |check| check()) {
                relay_cancelled.store(true, Ordering::Relaxed);
                return;
            }
            if !(0..=100).contains(&pct) {
                return;
            }
            // Forward only new maxima so the sink sees a clean
            // monotonically non-decreasing sequence.
            if last_forwarded.fetch_max(pct, Ordering::Relaxed) >= pct {
                return;
            }
            if let Some(sink) = &progress {
                sink(pct as u8);
            }
        };
        native.transcribe(&params, &mut relay)
    })
    .await
    .map_err(|join| CaptionError::TranscriptionFailed {
        audio: audio.clone(),
        model: model.clone(),
        message: format!("native call task failed: {join}"),
    })?;

    // Cancellation wins regardless of how the native call settled: the flag
    // may have been set by the relay, or the predicate may have tripped
    // after the last progress tick.
    if cancelled.load(Ordering::Relaxed) || cancel.as_ref().map_or(false, |check| check()) {
        info!(audio = %audio.display(), "transcription cancelled by caller");
        return Err(CaptionError::Cancelled);
    }

    match outcome {
        Ok(Some(payload)) => {
            debug!(bytes = payload.len(), "native call produced a payload");
            Ok(parse_payload(payload))
        }
        // A successful call with no payload is a corruption signal, not an
        // empty-but-valid transcript.
        Ok(None) => {
            warn!(model = %model.display(), "native call returned an empty result");
            Err(CaptionError::ModelCorrupted {
                model,
                message: "engine returned an empty result".into(),
            })
        }
        Err(native_err) => {
            warn!(error = %native_err.message, "native call raised");
            if classify::is_model_corruption(&native_err.message) {
                return Err(CaptionError::ModelCorrupted {
                    model,
                    message: native_err.message,
                });
            }
            Err(classify::classify_call_error(
                &native_err.message,
                &audio,
                &model,
            ))
        }
    }
}

/// Interpret the payload string: structured JSON when it parses, otherwise
/// a plain textual payload for the post-processor's text path.
fn parse_payload(payload: String) -> Value {
    serde_json::from_str(&payload).unwrap_or(Value::String(payload))
}

/// Resolve the model path: request override → `CAPTION_MODEL_PATH` env →
/// fixed default under the assets directory.
pub(crate) fn resolve_model_path(
    requested: Option<&PathBuf>,
    assets_dir: &std::path::Path,
    default_model: &str,
) -> PathBuf {
    if let Some(path) = requested {
        return path.clone();
    }
    if let Ok(env_path) = std::env::var(crate::engine::MODEL_PATH_ENV) {
        if !env_path.trim().is_empty() {
            return PathBuf::from(env_path);
        }
    }
    assets_dir.join(default_model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::native::NativeCallError;
    use parking_lot::Mutex;

    /// Scripted native engine: emits a fixed progress sequence, then settles
    /// with the scripted outcome.
    struct ScriptedEngine {
        ticks: Vec<i32>,
        outcome: Mutex<Option<std::result::Result<Option<String>, NativeCallError>>>,
    }

    impl ScriptedEngine {
        fn new(
            ticks: Vec<i32>,
            outcome: std::result::Result<Option<String>, NativeCallError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                ticks,
                outcome: Mutex::new(Some(outcome)),
            })
        }
    }

    impl NativeEngine for ScriptedEngine {
        fn transcribe(
            &self,
            _params: &EngineParams,
            on_progress: &mut dyn FnMut(i32),
        ) -> std::result::Result<Option<String>, NativeCallError> {
            for tick in &self.ticks {
                on_progress(*tick);
            }
            self.outcome.lock().take().expect("one call per script")
        }
    }

    fn params() -> EngineParams {
        EngineParams {
            audio_path: PathBuf::from("/tmp/audio.wav"),
            model_path: PathBuf::from("/models/ggml-base.bin"),
            language: "en".into(),
            prompt: None,
            use_gpu: false,
        }
    }

    fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Arc::new(move |pct| sink_seen.lock().push(pct));
        (sink, seen)
    }

    #[tokio::test]
    async fn progress_is_forwarded_monotonically_without_repeats() {
        let engine = ScriptedEngine::new(
            vec![0, 10, 10, 5, 50, 120, -3, 100],
            Ok(Some("{\"segments\":[]}".into())),
        );
        let (sink, seen) = collecting_sink();

        run(engine, params(), Some(sink), None)
            .await
            .expect("scripted success");
        assert_eq!(&*seen.lock(), &vec![0, 10, 50, 100]);
    }

    #[tokio::test]
    async fn cancellation_forces_cancelled_even_when_native_call_succeeds() {
        let engine = ScriptedEngine::new(
            vec![10, 20, 30],
            Ok(Some("{\"segments\":[[0.0,1.0,\"hi\"]]}".into())),
        );
        let cancel: CancelCheck = Arc::new(|| true);

        let err = run(engine, params(), None, Some(cancel))
            .await
            .expect_err("must be cancelled");
        assert!(err.is_cancelled(), "got {err:?}");
    }

    #[tokio::test]
    async fn cancellation_forces_cancelled_even_when_native_call_raises() {
        let engine = ScriptedEngine::new(
            vec![10],
            Err(NativeCallError::new("failed to initialize whisper context")),
        );
        let cancel: CancelCheck = Arc::new(|| true);

        let err = run(engine, params(), None, Some(cancel))
            .await
            .expect_err("must be cancelled");
        assert!(err.is_cancelled(), "got {err:?}");
    }

    #[tokio::test]
    async fn cancellation_suppresses_forwarding_from_the_tick_it_trips() {
        let trip_after = Arc::new(AtomicBool::new(false));
        let check_flag = Arc::clone(&trip_after);
        let cancel: CancelCheck = Arc::new(move || check_flag.load(Ordering::Relaxed));

        // The sink itself trips the predicate after the second tick, so the
        // relay must suppress everything from the third onward.
        let (sink, seen) = collecting_sink();
        let sink_trip = Arc::clone(&trip_after);
        let counting_sink: ProgressSink = Arc::new(move |pct| {
            sink(pct);
            if pct >= 20 {
                sink_trip.store(true, Ordering::Relaxed);
            }
        });

        let engine = ScriptedEngine::new(vec![10, 20, 30, 40], Ok(Some("x".into())));
        let err = run(engine, params(), Some(counting_sink), Some(cancel))
            .await
            .expect_err("tripped predicate forces Cancelled");
        assert!(err.is_cancelled());
        assert_eq!(&*seen.lock(), &vec![10, 20]);
    }

    #[tokio::test]
    async fn empty_payload_is_a_corruption_signal() {
        let engine = ScriptedEngine::new(vec![50], Ok(None));
        let err = run(engine, params(), None, None)
            .await
            .expect_err("empty result is corruption");
        assert!(
            matches!(err, CaptionError::ModelCorrupted { .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn corruption_phrases_from_native_errors_are_recategorized() {
        let engine = ScriptedEngine::new(
            vec![],
            Err(NativeCallError::new(
                "whisper_init_from_file: failed to load model '/models/ggml-base.bin'",
            )),
        );
        let err = run(engine, params(), None, None)
            .await
            .expect_err("corruption");
        let CaptionError::ModelCorrupted { model, message } = err else {
            panic!("expected ModelCorrupted");
        };
        assert_eq!(model, PathBuf::from("/models/ggml-base.bin"));
        assert!(message.contains("failed to load model"));
    }

    #[tokio::test]
    async fn unmatched_native_errors_carry_call_context() {
        let engine = ScriptedEngine::new(vec![], Err(NativeCallError::new("mystery failure")));
        let err = run(engine, params(), None, None).await.expect_err("generic");
        let CaptionError::TranscriptionFailed { audio, model, message } = err else {
            panic!("expected TranscriptionFailed");
        };
        assert_eq!(audio, PathBuf::from("/tmp/audio.wav"));
        assert_eq!(model, PathBuf::from("/models/ggml-base.bin"));
        assert_eq!(message, "mystery failure");
    }

    #[tokio::test]
    async fn structured_payloads_parse_and_textual_payloads_pass_through() {
        let engine = ScriptedEngine::new(vec![], Ok(Some("{\"segments\":[]}".into())));
        let raw = run(engine, params(), None, None).await.expect("success");
        assert!(raw.is_object());

        let engine = ScriptedEngine::new(vec![], Ok(Some("not json".into())));
        let raw = run(engine, params(), None, None).await.expect("success");
        assert_eq!(raw, Value::String("not json".into()));
    }

    #[test]
    fn model_path_resolution_prefers_request_then_env_then_default() {
        let assets = PathBuf::from("/opt/engine");
        let override_path = PathBuf::from("/custom/model.bin");

        let resolved = resolve_model_path(Some(&override_path), &assets, "models/ggml-base.bin");
        assert_eq!(resolved, override_path);

        // Env var is intentionally not exercised here — parallel tests share
        // the process environment.
        let resolved = resolve_model_path(None, &assets, "models/ggml-base.bin");
        assert_eq!(resolved, PathBuf::from("/opt/engine/models/ggml-base.bin"));
    }
}
