//! Consuming a streamed chat-completion response.

mod decoder;
mod idle;

pub use decoder::{DeltaSender, StreamDecoder, StreamDelta};
pub use idle::{ActivityClock, IdleTimeout, IdleTimeoutGuard};
