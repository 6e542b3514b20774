//! Native-error classification.
//!
//! The native layer reports failures as free-form text, so routing them to
//! actionable categories is substring matching against versioned phrase
//! tables. The tables are deliberately conservative: a miss falls through
//! to the generic category rather than guessing. Most-specific sets are
//! checked first, because mis-routing a corruption as a version mismatch
//! (or vice versa) sends the user down the wrong repair path.
//!
//! Phrase provenance:
//! - OS-version set: dyld symbol resolution failures seen when the addon
//!   links Metal APIs newer than the host (`MTLResidencySet*` ships in
//!   macOS 15).
//! - Library set: dlopen/LoadLibrary failures and the N-API
//!   "did not self-register" signature of an ABI-mismatched addon.
//! - Corruption set: whisper.cpp context/model init failures.

use std::path::Path;

use crate::error::CaptionError;

/// Minimum OS the bundled addon supports; named in the
/// `OsVersionIncompatible` message so the user knows what to upgrade to.
pub(crate) const MIN_SUPPORTED_MACOS: &str = "15.0";

/// Phrases indicating the addon was built for a newer OS than the host.
const OS_VERSION_PHRASES: &[&str] = &[
    "_objc_class_$_mtlresidencysetdescriptor",
    "mtlresidencyset",
    "symbol not found",
    "which was built for",
    "built for macos",
];

/// Phrases indicating a missing or unloadable dynamic library.
const LIBRARY_MISSING_PHRASES: &[&str] = &[
    "module did not self-register",
    "cannot open shared object file",
    "image not found",
    "library not loaded",
    "the specified module could not be found",
    "dlopen(",
];

/// Phrases indicating a corrupted or truncated model file.
const MODEL_CORRUPTION_PHRASES: &[&str] = &[
    "failed to initialize whisper context",
    "failed to load model",
    "invalid model file",
    "bad magic",
    "tensor data is corrupt",
];

/// `true` when the message matches the corruption phrase set. Used by the
/// invoker to re-categorize call-time exceptions before general
/// classification.
pub(crate) fn is_model_corruption(message: &str) -> bool {
    matches_any(message, MODEL_CORRUPTION_PHRASES)
}

/// Classify a load-time failure. Falls through to `EngineLoadFailed`.
pub fn classify_load_error(message: &str) -> CaptionError {
    classify_with_kernel(message, running_kernel_release().as_deref())
        .unwrap_or_else(|| CaptionError::EngineLoadFailed(message.to_owned()))
}

/// Classify a call-time failure. Falls through to `TranscriptionFailed`
/// carrying both paths for context.
pub fn classify_call_error(message: &str, audio: &Path, model: &Path) -> CaptionError {
    if let Some(err) = classify_with_kernel(message, running_kernel_release().as_deref()) {
        return err;
    }
    if is_model_corruption(message) {
        return CaptionError::ModelCorrupted {
            model: model.to_path_buf(),
            message: message.to_owned(),
        };
    }
    CaptionError::TranscriptionFailed {
        audio: audio.to_path_buf(),
        model: model.to_path_buf(),
        message: message.to_owned(),
    }
}

/// Pure classification core, shared by both entry points and the tests.
/// `kernel_release` is the host's `uname -r` value, when known.
fn classify_with_kernel(message: &str, kernel_release: Option<&str>) -> Option<CaptionError> {
    if matches_any(message, OS_VERSION_PHRASES) {
        return Some(CaptionError::OsVersionIncompatible(os_version_message(
            message,
            kernel_release,
        )));
    }
    if matches_any(message, LIBRARY_MISSING_PHRASES) {
        return Some(CaptionError::LibraryMissing(message.to_owned()));
    }
    None
}

fn matches_any(message: &str, phrases: &[&str]) -> bool {
    let lowered = message.to_ascii_lowercase();
    phrases.iter().any(|p| lowered.contains(p))
}

fn os_version_message(raw: &str, kernel_release: Option<&str>) -> String {
    let running = kernel_release
        .and_then(kernel_major)
        .and_then(macos_version_for_kernel);
    match running {
        Some(version) => format!(
            "this engine requires macOS {MIN_SUPPORTED_MACOS} or later, \
             but this machine is running macOS {version} ({raw})"
        ),
        None => format!("this engine requires macOS {MIN_SUPPORTED_MACOS} or later ({raw})"),
    }
}

fn kernel_major(release: &str) -> Option<u32> {
    release.split('.').next()?.trim().parse().ok()
}

/// Darwin kernel major → marketing macOS version.
/// Darwin 20 = macOS 11, 21 = 12, ...; Darwin 10–19 = macOS 10.6–10.15.
fn macos_version_for_kernel(major: u32) -> Option<String> {
    match major {
        m if m >= 20 => Some(format!("{}.0", m - 9)),
        m if m >= 10 => Some(format!("10.{}", m - 4)),
        _ => None,
    }
}

/// Host kernel release (`uname -r`), for the OS-version message.
#[cfg(unix)]
fn running_kernel_release() -> Option<String> {
    let output = std::process::Command::new("uname").arg("-r").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let release = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if release.is_empty() {
        None
    } else {
        Some(release)
    }
}

#[cfg(not(unix))]
fn running_kernel_release() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("/tmp/audio.wav"), PathBuf::from("/models/ggml-base.bin"))
    }

    #[test]
    fn metal_symbol_failure_is_os_version_incompatible() {
        let (audio, model) = paths();
        let err = classify_call_error(
            "Symbol not found: _OBJC_CLASS_$_MTLResidencySetDescriptor",
            &audio,
            &model,
        );
        let CaptionError::OsVersionIncompatible(message) = err else {
            panic!("expected OsVersionIncompatible, got {err:?}");
        };
        assert!(message.contains(MIN_SUPPORTED_MACOS), "message: {message}");
    }

    #[test]
    fn os_version_message_names_running_macos_from_kernel_release() {
        let err = classify_with_kernel("Symbol not found: _MTLResidencySet", Some("23.4.0"))
            .expect("should classify");
        let CaptionError::OsVersionIncompatible(message) = err else {
            panic!("wrong category");
        };
        assert!(message.contains("macOS 14.0"), "message: {message}");
    }

    #[test]
    fn kernel_offset_table_covers_both_eras() {
        assert_eq!(macos_version_for_kernel(24).as_deref(), Some("15.0"));
        assert_eq!(macos_version_for_kernel(20).as_deref(), Some("11.0"));
        assert_eq!(macos_version_for_kernel(19).as_deref(), Some("10.15"));
        assert_eq!(macos_version_for_kernel(10).as_deref(), Some("10.6"));
        assert_eq!(macos_version_for_kernel(9), None);
    }

    #[test]
    fn self_register_failure_is_library_missing() {
        let (audio, model) = paths();
        let err = classify_call_error("Error: Module did not self-register.", &audio, &model);
        assert!(matches!(err, CaptionError::LibraryMissing(_)), "got {err:?}");
    }

    #[test]
    fn dlopen_failure_is_library_missing() {
        // No symbol phrase in the text, so the OS set does not claim it.
        let err = classify_load_error(
            "dlopen(libcaption.dylib, 5): Library not loaded: @rpath/libggml.dylib",
        );
        assert!(matches!(err, CaptionError::LibraryMissing(_)), "got {err:?}");
    }

    #[test]
    fn whisper_context_failure_is_model_corrupted() {
        let (audio, model) = paths();
        let err = classify_call_error("failed to initialize whisper context", &audio, &model);
        let CaptionError::ModelCorrupted { model: m, message } = err else {
            panic!("expected ModelCorrupted");
        };
        assert_eq!(m, model);
        assert!(message.contains("whisper context"));
    }

    #[test]
    fn matching_is_case_insensitive_substring_search() {
        let (audio, model) = paths();
        let err = classify_call_error("FAILED TO LOAD MODEL at offset 42", &audio, &model);
        assert!(matches!(err, CaptionError::ModelCorrupted { .. }));
    }

    #[test]
    fn unmatched_call_error_falls_through_with_context() {
        let (audio, model) = paths();
        let err = classify_call_error("engine exploded for no reason", &audio, &model);
        let CaptionError::TranscriptionFailed {
            audio: a,
            model: m,
            message,
        } = err
        else {
            panic!("expected TranscriptionFailed");
        };
        assert_eq!(a, audio);
        assert_eq!(m, model);
        assert_eq!(message, "engine exploded for no reason");
    }

    #[test]
    fn unmatched_load_error_falls_through_to_engine_load_failed() {
        let err = classify_load_error("some exotic loader problem");
        assert!(matches!(err, CaptionError::EngineLoadFailed(_)));
    }

    #[test]
    fn os_version_precedence_beats_library_and_corruption_sets() {
        // A message matching several sets must land in the most specific one.
        let err = classify_load_error(
            "dlopen failed: Symbol not found: _MTLResidencySetDescriptor (failed to load model)",
        );
        assert!(matches!(err, CaptionError::OsVersionIncompatible(_)), "got {err:?}");
    }
}
