//! Upstream execution - HTTP dispatch and SSE stream reading
//!
//! [`executor`] finishes the translated envelope (identities, project,
//! tool-config) and dispatches it against the cloudcode hosts with base-URL
//! fallback. [`stream`] turns the raw upstream body into a bounded channel of
//! parsed chunks for the response translators.

pub mod executor;
pub mod stream;

pub use executor::Executor;
