//! Anthropic Messages ↔ upstream envelope conversion
//!
//! [`request`] rewrites incoming Messages bodies into the upstream envelope;
//! [`response`] drives upstream chunks back out as Anthropic's event-named
//! SSE (`message_start` … `message_stop`) or a buffered message document.

pub mod request;
pub mod response;
