//! Natural-language questions over the archive.
//!
//! `synth` turns the question into SQL, `executor` runs it, and for row
//! results `summarize` and `render` produce the answer. `pipeline` drives the
//! whole request.

pub mod executor;
pub mod pipeline;
pub mod render;
pub mod summarize;
pub mod synth;

pub use pipeline::{AskOutcome, AskPipeline, AskRequest};
pub use render::{Responder, SendError, SummaryCard};
pub use summarize::SummarySettings;
