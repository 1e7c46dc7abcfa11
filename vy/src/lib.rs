//! volley - iterative HTTP/WebSocket request engine
//!
//! Runs a templated request definition in a loop. Each iteration
//! renders the definition against a mutable context, performs one
//! exchange (unary HTTP or a write+read on a persistent WebSocket),
//! normalizes the response into a uniform queryable value, and checks
//! it against jq-style stop conditions. The normalized response is
//! stored back into the context, so the next iteration's templates can
//! reference it (cursors, continuation tokens). The loop ends on the
//! first matching stop condition, on parameter-list exhaustion, or at
//! the iteration bound.
//!
//! # Modules
//!
//! - [`definition`] - request definitions loaded from YAML
//! - [`context`] - the mutable per-run template context
//! - [`template`] - memoized handlebars rendering
//! - [`response`] - response normalization
//! - [`filter`] - jq-style filter engine over JSON values
//! - [`stop`] - stop-condition evaluation
//! - [`feed`] - lockstep multi-list parameter feed
//! - [`transport`] - HTTP and WebSocket exchange behind one trait
//! - [`engine`] - the iteration controller
//! - [`cli`] - flag definitions for the `vy` binary

pub mod cli;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod feed;
pub mod filter;
pub mod response;
pub mod stop;
pub mod template;
pub mod transport;

// Re-export the types most callers need
pub use context::RunContext;
pub use definition::RequestDefinition;
pub use engine::{Engine, EngineConfig, RunReport};
pub use error::EngineError;
pub use filter::{Filter, FilterError};
pub use response::ResponseSummary;
pub use transport::{BoundRequest, RawResponse, Transport};
