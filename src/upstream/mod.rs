pub mod client;
pub mod decode;
pub mod prepare;
pub mod stream;

pub use client::{CloudCodeClient, ExecuteOutcome, StreamStart, UpstreamBody};
pub use prepare::{PreparedRequest, prepare_request};
pub use stream::StreamEvent;
