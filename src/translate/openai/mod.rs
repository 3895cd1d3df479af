//! OpenAI Chat Completions ↔ upstream envelope conversion
//!
//! [`request`] rewrites incoming Chat Completions (and normalized Responses)
//! bodies into the upstream envelope; [`response`] drives upstream chunks back
//! out as `chat.completion.chunk` SSE frames or a buffered `chat.completion`.

pub mod request;
pub mod response;
