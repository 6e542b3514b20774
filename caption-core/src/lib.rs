//! # caption-core
//!
//! Transcription invocation core of the caption-generation app.
//!
//! ## Architecture
//!
//! ```text
//! TranscriptionRequest → CaptionEngine
//!                            │ (load-once addon cache)
//!                        loader → AddonEngine (libloading)
//!                            │
//!                        invoke (spawn_blocking, cancellable progress relay)
//!                            │
//!                        classify ◄── native error text
//!                            │
//!                        normalize → Vec<Segment> → subtitle (SRT)
//! ```
//!
//! The native call is the single suspension point; cancellation is
//! cooperative and always wins once signalled. All failure modes surface
//! as one [`CaptionError`] category with an actionable message.

#![warn(clippy::all)]

pub mod classify;
pub mod engine;
pub mod error;
pub mod language;
pub mod normalize;
pub mod subtitle;

// Convenience re-exports for downstream crates
pub use engine::{
    global, CancelCheck, CaptionEngine, EngineConfig, EngineParams, NativeCallError, NativeEngine,
    OutputFormat, ProgressSink, TranscriptionOutput, TranscriptionRequest,
};
pub use error::{CaptionError, Result};
pub use language::Language;
pub use normalize::{normalize, Segment};
pub use subtitle::{format_timecode, parse_subtitle_text, to_subtitle_text};
