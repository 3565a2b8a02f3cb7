pub mod cloudcode;
pub mod gemini;
pub mod openai;

pub use cloudcode::{CloudCodeRequestBody, CloudCodeRequestMeta, CloudCodeResponseBody};
pub use gemini::{Candidate, Content, GeminiGenerateContentRequest, GenerationConfig, Part};
pub use openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ModelList,
};
