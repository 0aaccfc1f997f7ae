//! # Transcription
//!
//! The transcription subsystem: job registry and process control, external
//! engine invocation, transcript output discovery, lexical correction,
//! paragraph formatting, and the job entry point composing them.

pub mod engine;
pub mod formatter;
pub mod job;
pub mod lexicon;
pub mod output;
pub mod registry;

pub use engine::WhisperEngine;
pub use job::{Transcriber, TranscriptionParams, TranscriptionRequest, TranscriptionResult};
pub use lexicon::TermCorrector;
pub use registry::JobRegistry;
