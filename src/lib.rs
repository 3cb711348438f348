//! # Image Backfill
//!
//! Finds placeholder images in a tree of markdown documents, generates a
//! real image for each one from the surrounding text, uploads it to an
//! asset store and rewrites the document to point at the uploaded URL.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌─────────┐
//! │  Scanner │──▶│  Prompt  │──▶│ Generator │──▶│ Uploader │──▶│ Rewrite │
//! │ markdown │   │ synthesis│   │  (Gemini) │   │(Cloudnry)│   │ in place│
//! └──────────┘   └──────────┘   └───────────┘   └──────────┘   └────┬────┘
//!                                                                   ▼
//!                                                             ┌──────────┐
//!                                                             │ Summary  │
//!                                                             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=... CLOUDINARY_CLOUD_NAME=... CLOUDINARY_API_KEY=...
//! backfill scan                       # list placeholders, no network
//! backfill run --root ./posts -v      # replace them
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`markdown`] | Placeholder and context extraction |
//! | [`scan`] | Deterministic document walk |
//! | [`prompt`] | Prompt synthesis |
//! | [`generator`] | Image generation backends |
//! | [`upload`] | Asset store backends |
//! | [`retry`] | Bounded exponential backoff |
//! | [`pacing`] | Global request pacing |
//! | [`guard`] | Timeout, abort and interrupt handling |
//! | [`rewrite`] | Span-based document rewriting |
//! | [`coordinator`] | Worker pool and per-marker state machine |
//! | [`summary`] | Run summary |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod guard;
pub mod logging;
pub mod markdown;
pub mod models;
pub mod pacing;
pub mod prompt;
pub mod retry;
pub mod rewrite;
pub mod scan;
pub mod summary;
pub mod upload;
