//! Native engine binding.
//!
//! The `NativeEngine` trait decouples the invoker from the real addon so the
//! cancellation and error-translation paths are testable with scripted
//! engines. `AddonEngine` is the production implementation: a dynamically
//! loaded shared library exposing one C entry point.
//!
//! ## Addon ABI
//!
//! ```c
//! // params_json: UTF-8 JSON document (see EngineParams)
//! // on_progress: invoked with 0–100 percentages during the call
//! // out: on rc == 0 the result payload, on rc != 0 the error text;
//! //      NULL is allowed either way. Ownership transfers to the caller,
//! //      released via caption_engine_free.
//! int32_t caption_engine_transcribe(const char *params_json,
//!                                   void (*on_progress)(int32_t, void *),
//!                                   void *user_data,
//!                                   char **out);
//! void caption_engine_free(char *ptr);
//! ```
//!
//! The progress callback runs on a native thread inside the call. Unwinding
//! out of it would corrupt the native stack, so the trampoline swallows
//! panics; the Rust side communicates cancellation through shared state
//! only, never by raising.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::ptr;

use libloading::Library;
use serde::Serialize;
use tracing::debug;

/// Exported transcription entry point, verified at load time.
pub(crate) const TRANSCRIBE_SYMBOL: &[u8] = b"caption_engine_transcribe\0";
/// Exported deallocator for strings the addon hands back.
pub(crate) const FREE_SYMBOL: &[u8] = b"caption_engine_free\0";

type ProgressFn = extern "C" fn(c_int, *mut c_void);
type TranscribeFn =
    unsafe extern "C" fn(*const c_char, Option<ProgressFn>, *mut c_void, *mut *mut c_char) -> c_int;
type FreeFn = unsafe extern "C" fn(*mut c_char);

/// Fully prepared parameters for one native call. Crosses the FFI boundary
/// as a JSON document; language and prompt substitution have already
/// happened by the time this is built.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineParams {
    pub audio_path: PathBuf,
    pub model_path: PathBuf,
    /// Base engine code (`auto` or ISO); never a Chinese-variant code.
    pub language: String,
    pub prompt: Option<String>,
    pub use_gpu: bool,
}

/// Error raised by the native layer, as raw text. Categorization happens
/// upstream in the invoker/classifier.
#[derive(Debug)]
pub struct NativeCallError {
    pub message: String,
}

impl NativeCallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Contract for the native transcription backend.
///
/// One in-flight call per engine is assumed; the facade serializes callers.
/// `on_progress` receives raw 0–100 ticks and must never panic through the
/// implementation.
pub trait NativeEngine: Send + Sync + 'static {
    /// Run one blocking transcription. `Ok(None)` means the call reported
    /// success but produced no payload — the invoker treats that as a
    /// corruption signal, not an empty transcript.
    fn transcribe(
        &self,
        params: &EngineParams,
        on_progress: &mut dyn FnMut(i32),
    ) -> std::result::Result<Option<String>, NativeCallError>;
}

/// The dynamically loaded addon. Lives for the process lifetime; there is
/// no unload path by design.
#[derive(Debug)]
pub struct AddonEngine {
    path: PathBuf,
    lib: Library,
}

impl AddonEngine {
    /// Load the addon and verify it exposes the expected entry points.
    /// Errors are raw loader text; the caller classifies them.
    pub(crate) fn open(path: &Path) -> std::result::Result<Self, NativeCallError> {
        // Safety: the addon is our own signed artifact resolved from the
        // engine assets directory; its init section must run.
        let lib = unsafe { Library::new(path) }
            .map_err(|e| NativeCallError::new(e.to_string()))?;

        // Verify callability up front so per-request lookups cannot fail
        // with a surprise.
        unsafe {
            lib.get::<TranscribeFn>(TRANSCRIBE_SYMBOL)
                .map_err(|e| NativeCallError::new(format!("missing transcribe entry point: {e}")))?;
            lib.get::<FreeFn>(FREE_SYMBOL)
                .map_err(|e| NativeCallError::new(format!("missing free entry point: {e}")))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            lib,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// C-side progress trampoline. `user_data` points at a `&mut dyn FnMut(i32)`
/// living on the invoking thread's stack for the duration of the call.
extern "C" fn progress_trampoline(pct: c_int, user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }
    // Unwinding across the C boundary is UB and corrupts the native call;
    // the relay closure is written not to panic, this is the backstop.
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let relay = unsafe { &mut *(user_data as *mut &mut dyn FnMut(i32)) };
        relay(pct);
    }));
}

impl NativeEngine for AddonEngine {
    fn transcribe(
        &self,
        params: &EngineParams,
        on_progress: &mut dyn FnMut(i32),
    ) -> std::result::Result<Option<String>, NativeCallError> {
        let params_json = serde_json::to_string(params)
            .map_err(|e| NativeCallError::new(format!("failed to encode engine params: {e}")))?;
        let params_c = CString::new(params_json)
            .map_err(|e| NativeCallError::new(format!("engine params contain NUL: {e}")))?;

        // Symbols were verified at open(); re-resolve per call to keep the
        // struct free of self-borrows.
        let (transcribe, free) = unsafe {
            let t = self
                .lib
                .get::<TranscribeFn>(TRANSCRIBE_SYMBOL)
                .map_err(|e| NativeCallError::new(e.to_string()))?;
            let f = self
                .lib
                .get::<FreeFn>(FREE_SYMBOL)
                .map_err(|e| NativeCallError::new(e.to_string()))?;
            (t, f)
        };

        let mut relay: &mut dyn FnMut(i32) = on_progress;
        let user_data = &mut relay as *mut &mut dyn FnMut(i32) as *mut c_void;

        let mut out: *mut c_char = ptr::null_mut();
        debug!(addon = %self.path.display(), "entering native transcription call");
        let rc = unsafe {
            transcribe(
                params_c.as_ptr(),
                Some(progress_trampoline),
                user_data,
                &mut out,
            )
        };
        debug!(rc, "native transcription call returned");

        let payload = if out.is_null() {
            None
        } else {
            // Copy out, then hand the buffer back to the addon's allocator.
            let text = unsafe { CStr::from_ptr(out) }.to_string_lossy().into_owned();
            unsafe { free(out) };
            Some(text)
        };

        if rc != 0 {
            let message = payload.unwrap_or_else(|| format!("native call failed with code {rc}"));
            return Err(NativeCallError::new(message));
        }

        Ok(payload.filter(|p| !p.trim().is_empty()))
    }
}
