//! Typed Gemini request/response schema for generate-content endpoints.
//!
//! Instead of passing through raw `serde_json::Value`, the gateway parses
//! conversation payloads into properly typed structs. This gives us:
//! - Compile-time access to known fields (e.g. `systemInstruction` for
//!   preamble injection).
//! - Forward compatibility via `extra` catch-all maps at every level.
//! - Validation-friendly request shape (e.g. required `contents`).

mod content;
mod generation;
mod request;
mod response;

pub use content::{Content, Part};
pub use generation::GenerationConfig;
pub use request::GeminiGenerateContentRequest;
pub use response::Candidate;
