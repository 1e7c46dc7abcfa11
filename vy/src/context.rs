//! Mutable per-run state exposed to templates

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::feed::ListFeed;
use crate::response::ResponseSummary;

/// Everything a template can reference, serialized wholesale per render
///
/// The engine mutates this in place between iterations; callers seed it
/// once before a run. Field names here are the template variable names
/// (`{{host}}`, `{{page}}`, `{{last_response.body_object.cursor}}`, ...),
/// so renames are breaking changes to user definitions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunContext {
    /// Target host, straight from the caller
    pub host: String,
    /// Zero-based iteration counter
    pub iteration: usize,
    /// One-based page counter, `iteration + 1`
    pub page: usize,
    /// Caller-chosen page size
    pub page_size: usize,
    /// `page_size * iteration`
    pub result_offset: usize,
    /// Authentication token, straight from the caller
    pub auth_token: String,
    /// Open-ended caller-supplied key/value data
    pub extra: HashMap<String, Value>,
    /// Current parameter-feed slice, one value per configured list
    pub list_params: Vec<String>,
    /// Most recent normalized response, zero-valued before iteration 0
    pub last_response: ResponseSummary,
}

impl RunContext {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_extra(mut self, extra: HashMap<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// Move the context to `iteration`, refreshing every derived field
    ///
    /// Fails only when the parameter feed cannot cover the iteration.
    /// `last_response` is deliberately untouched; the engine stores the
    /// new response after evaluation, not here.
    pub fn advance(&mut self, iteration: usize, feed: &ListFeed) -> Result<(), EngineError> {
        self.iteration = iteration;
        self.page = iteration + 1;
        self.result_offset = self.page_size * iteration;
        self.list_params = feed.slice_at(iteration)?;
        debug!(
            iteration = self.iteration,
            page = self.page,
            result_offset = self.result_offset,
            "context advanced"
        );
        Ok(())
    }
}
