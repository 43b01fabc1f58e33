//! Crabflow - Hybrid LLM Delegation Core
//!
//! A supervising agent offloads heavy work to cheaper or free language models
//! while keeping its own context window intact. Crabflow is the runtime that
//! makes that safe: it compresses conversation history to a bounded token
//! budget, classifies each task and routes it to the best-fitting model,
//! drives a delegate/validate/retry loop until the output clears a quality
//! threshold, and journals every step to an append-only continuity store so
//! sessions survive interruption.
//!
//! ## Pipeline
//!
//! ```text
//! compress context -> classify -> route -> delegate -> validate
//!                                              ^            |
//!                                              +-- retry ---+
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use crabflow::client::scripted::ScriptedClient;
//! use crabflow::pipeline::{Pipeline, RunOptions};
//! use crabflow::registry::ModelRegistry;
//! use crabflow::router::RoutePolicy;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), crabflow::CoreError> {
//! let client = Arc::new(ScriptedClient::always("fn add(a: i64, b: i64) -> i64 { a + b }"));
//! let pipeline = Pipeline::new(client, ModelRegistry::defaults(), "./state")?;
//! let result = pipeline
//!     .run("Write an add(a, b) function", &[], &RoutePolicy::default(), &RunOptions::default())
//!     .await?;
//! println!("{}", result.artifact);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod compressor;
pub mod continuity;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod tokenizer;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use client::{Completion, ModelClient};
pub use compressor::{CompressedContext, Compressor};
pub use continuity::ContinuityStore;
pub use error::CoreError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use pipeline::{Pipeline, PipelineResult, RunOptions};
pub use registry::{ModelRegistry, ModelSpec};
pub use router::{RoutePolicy, Routing};
pub use types::{Message, Role, TaskKind};
pub use validator::{ValidationResult, Validator};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
