//! Addon resolution and loading.
//!
//! Exactly one addon filename exists per supported (platform, arch) pair;
//! anything outside the table fails fast with `EngineNotFound` naming the
//! combination. The addon lives in the engine assets directory, overridable
//! with `CAPTION_ENGINE_DIR`. Load happens once per process — the facade
//! caches the handle and never reloads.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::classify;
use crate::engine::native::AddonEngine;
use crate::error::{CaptionError, Result};

/// Environment override for the engine assets directory.
pub(crate) const ENGINE_DIR_ENV: &str = "CAPTION_ENGINE_DIR";

/// Supported (platform, arch) pairs and their addon filenames. Platform and
/// arch use the `std::env::consts` spellings.
const ADDON_TABLE: &[(&str, &str, &str)] = &[
    ("macos", "aarch64", "caption-engine.darwin-arm64.dylib"),
    ("macos", "x86_64", "caption-engine.darwin-x64.dylib"),
    ("windows", "x86_64", "caption-engine.win32-x64.dll"),
    ("linux", "x86_64", "caption-engine.linux-x64.so"),
    ("linux", "aarch64", "caption-engine.linux-arm64.so"),
];

/// Extensions that identify addon binaries when enumerating a directory for
/// the `EngineNotFound` diagnostic.
const ADDON_EXTENSIONS: [&str; 3] = ["dylib", "so", "dll"];

/// Expected addon filename for a (platform, arch) pair. Deterministic over
/// the static table; unsupported pairs are `EngineNotFound`.
pub fn addon_filename(platform: &str, arch: &str) -> Result<&'static str> {
    ADDON_TABLE
        .iter()
        .find(|(p, a, _)| *p == platform && *a == arch)
        .map(|(_, _, name)| *name)
        .ok_or_else(|| {
            CaptionError::EngineNotFound(format!(
                "no transcription addon is built for {platform}/{arch}"
            ))
        })
}

/// Effective assets directory: env override wins over the configured path.
pub(crate) fn effective_assets_dir(configured: &Path) -> PathBuf {
    match std::env::var(ENGINE_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => configured.to_path_buf(),
    }
}

/// Resolve and load the addon for the running process.
///
/// Logs the resolved path and outcome; classification of load failures is
/// delegated to the phrase tables (OS-version and missing-library errors
/// surface as their own categories, everything else as `EngineLoadFailed`).
pub(crate) fn load(assets_dir: &Path) -> Result<AddonEngine> {
    load_for(assets_dir, std::env::consts::OS, std::env::consts::ARCH)
}

fn load_for(assets_dir: &Path, platform: &str, arch: &str) -> Result<AddonEngine> {
    let filename = addon_filename(platform, arch)?;
    let dir = effective_assets_dir(assets_dir);
    let addon_path = dir.join(filename);
    info!(addon = %addon_path.display(), platform, arch, "resolving transcription addon");

    if !addon_path.is_file() {
        let present = list_present_addons(&dir);
        let detail = if present.is_empty() {
            format!("no addon files present in {}", dir.display())
        } else {
            format!(
                "present in {}: {}",
                dir.display(),
                present.join(", ")
            )
        };
        warn!(addon = %addon_path.display(), %detail, "addon file missing");
        return Err(CaptionError::EngineNotFound(format!(
            "expected {filename} ({detail})"
        )));
    }

    match AddonEngine::open(&addon_path) {
        Ok(engine) => {
            info!(addon = %addon_path.display(), "transcription addon loaded");
            Ok(engine)
        }
        Err(e) => {
            warn!(addon = %addon_path.display(), error = %e.message, "addon failed to load");
            Err(classify::classify_load_error(&e.message))
        }
    }
}

/// Addon-like files present in the assets directory, for diagnosability
/// when the expected one is absent.
fn list_present_addons(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ADDON_EXTENSIONS.contains(&ext))
        })
        .collect();
    names.sort();
    names
}
