//! Response normalization
//!
//! Every transport response is reduced to one canonical shape before
//! stop conditions see it. Normalization never fails: a body that is
//! not JSON keeps its raw text and leaves both parsed forms null.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::transport::RawResponse;

/// Canonical, queryable form of one exchange's response
///
/// Serialized field names are the names stop-condition filters address
/// (`.status`, `.body_object`, `.request.path`, ...), and the same
/// names templates use under `last_response`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseSummary {
    pub request: RequestInfo,
    /// HTTP status; 0 for WebSocket frames
    pub status: u16,
    pub raw_body: String,
    /// Body parsed as a JSON object, null otherwise
    pub body_object: Option<Value>,
    /// Body parsed as a JSON array, null otherwise
    pub body_array: Option<Value>,
    pub content_type: String,
    pub headers: HashMap<String, Vec<String>>,
}

/// Request-side facts echoed into the summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestInfo {
    pub path: String,
    pub query: HashMap<String, Vec<String>>,
}

impl RequestInfo {
    fn from_url(url: &reqwest::Url) -> Self {
        let mut query: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in url.query_pairs() {
            query.entry(name.into_owned()).or_default().push(value.into_owned());
        }
        Self {
            path: url.path().to_string(),
            query,
        }
    }
}

impl ResponseSummary {
    pub fn from_raw(raw: &RawResponse) -> Self {
        let raw_body = String::from_utf8_lossy(&raw.body).into_owned();

        // one parse attempt; scalars count as neither form
        let (body_object, body_array) = match serde_json::from_str::<Value>(&raw_body) {
            Ok(v @ Value::Object(_)) => (Some(v), None),
            Ok(v @ Value::Array(_)) => (None, Some(v)),
            _ => (None, None),
        };

        let content_type = raw
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in &raw.headers {
            headers.entry(name.clone()).or_default().push(value.clone());
        }

        Self {
            request: raw.url.as_ref().map(RequestInfo::from_url).unwrap_or_default(),
            status: raw.status,
            raw_body,
            body_object,
            body_array,
            content_type,
            headers,
        }
    }

    /// Plain JSON value the stop-condition evaluator inspects
    pub fn to_value(&self) -> Result<Value, EngineError> {
        Ok(serde_json::to_value(self)?)
    }
}
