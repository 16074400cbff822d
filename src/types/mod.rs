//! Public types for the Mimir API.

mod call;
mod message;
mod response;
mod stream;

pub use call::CallOptions;
pub use message::{Message, MessageContent, Role};
pub use response::{CallWarning, FinishReason, GenerateResponse, ResponseMetadata, Usage};
pub use stream::{PartStream, StreamPart, StreamResponse};
