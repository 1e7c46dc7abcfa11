//! Engine error types

use std::time::Duration;
use thiserror::Error;

use crate::filter::FilterError;

/// Errors that can occur while loading a definition or driving a run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Definition parse error: {0}")]
    Definition(#[from] serde_yaml::Error),

    #[error("Failed to read definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template compile error: {0}")]
    TemplateCompile(#[from] handlebars::TemplateError),

    #[error("Template render error: {0}")]
    TemplateRender(#[from] handlebars::RenderError),

    #[error("Invalid request URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme '{scheme}' in '{url}'")]
    UnsupportedScheme { scheme: String, url: String },

    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("WebSocket closed before a reply arrived")]
    ConnectionClosed,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Stop condition error: {0}")]
    Filter(#[from] FilterError),

    #[error("List {list} exhausted at iteration {iteration}: no value left to substitute")]
    ListExhausted { list: usize, iteration: usize },

    #[error("Max iterations ({0}) reached without a stop condition match")]
    IterationLimit(usize),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Check if this error came from the wire rather than the definition
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EngineError::Http(_)
                | EngineError::WebSocket(_)
                | EngineError::ConnectionClosed
                | EngineError::Timeout(_)
        )
    }

    /// Check if the run ended because iterations or list values ran out
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, EngineError::ListExhausted { .. } | EngineError::IterationLimit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transport() {
        assert!(EngineError::ConnectionClosed.is_transport());
        assert!(EngineError::Timeout(Duration::from_secs(30)).is_transport());

        let err = EngineError::UnsupportedScheme {
            scheme: "ftp".to_string(),
            url: "ftp://example.com".to_string(),
        };
        assert!(!err.is_transport());
    }

    #[test]
    fn test_is_exhaustion() {
        assert!(EngineError::IterationLimit(50).is_exhaustion());
        assert!(
            EngineError::ListExhausted { list: 1, iteration: 3 }.is_exhaustion()
        );
        assert!(!EngineError::ConnectionClosed.is_exhaustion());
    }

    #[test]
    fn test_messages_name_the_culprit() {
        let err = EngineError::ListExhausted { list: 0, iteration: 2 };
        assert!(err.to_string().contains("List 0"));
        assert!(err.to_string().contains("iteration 2"));

        let err = EngineError::UnsupportedScheme {
            scheme: "gopher".to_string(),
            url: "gopher://hole".to_string(),
        };
        assert!(err.to_string().contains("gopher"));
    }
}
