//! OpenAI-compatible chat-completion wire format.

mod chunk;
mod request;

pub(crate) use chunk::ProtocolChunk;
pub(crate) use request::ChatCompletionRequest;
