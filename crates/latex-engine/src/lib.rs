//! LaTeX compilation engine
//!
//! This crate turns a logical document project into a compiled PDF by
//! driving an installed TeX toolchain through a bounded, self-correcting
//! compilation protocol:
//! - Project materialization into an isolated scratch directory
//! - Static rejection of shell-escape and file-stream constructs
//! - Compiler selection (pdflatex/xelatex/lualatex) from source content
//! - Multi-pass compilation with bibliography processing
//! - Artifact collection with guaranteed scratch cleanup
//!
//! # Feature Flags
//!
//! - `test-util`: Exposes [`testing`] (scripted tool runner, static asset
//!   fetcher) for crates that want to exercise the engine without TeX.

pub mod collector;
pub mod config;
pub mod error;
pub mod materialize;
pub mod orchestrator;
pub mod project;
pub mod runner;
pub mod security;
pub mod selector;
pub mod service;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use collector::{CompilationResult, Outcome};
pub use config::{EngineConfig, LogPatterns};
pub use error::EngineError;
pub use project::{FileNode, FolderNode, ProjectTree};
pub use selector::Compiler;
pub use service::Engine;
