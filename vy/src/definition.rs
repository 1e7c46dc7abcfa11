//! Request definitions loaded from YAML

use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::EngineError;

/// A declarative request loaded from a YAML document
///
/// Every textual field is a template rendered against the run context
/// before each exchange. The definition itself never changes after
/// loading; derived compiled templates live in the engine's cache.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestDefinition {
    /// Informational name, also used to label output
    #[serde(default)]
    pub name: String,

    /// Target URL template; the rendered scheme picks the transport
    pub url: String,

    /// Header name/value template pairs in document order
    ///
    /// Both sides are templates. Rendered duplicates overwrite earlier
    /// entries, so order matters and a plain map would not do.
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub headers: Vec<(String, String)>,

    /// Sent once over a fresh WebSocket before real traffic
    #[serde(default)]
    pub setup_body: String,

    /// Request body template
    #[serde(default)]
    pub body: String,

    /// HTTP verb; GET when empty, ignored for WebSocket targets
    #[serde(default)]
    pub method: String,

    /// Stop-condition filter expressions, tried in order each iteration
    #[serde(default)]
    pub stop_when: Vec<String>,

    /// Parallel value lists advanced in lockstep, one value per iteration
    #[serde(default)]
    pub lists: Vec<Vec<String>>,
}

impl RequestDefinition {
    /// Parse a definition from document bytes
    pub fn load(bytes: &[u8]) -> Result<Self, EngineError> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    /// Read and parse a definition file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let bytes = std::fs::read(path)?;
        Self::load(&bytes)
    }

    /// Stable identifier prefix for this definition's compiled templates
    pub fn key_prefix(&self) -> String {
        sanitize_key(&format!(
            "{}_{}",
            self.method.to_lowercase(),
            self.url.to_lowercase()
        ))
    }

    /// Cache key for the URL template
    pub fn url_key(&self) -> String {
        format!("{}_url", self.key_prefix())
    }

    /// Cache key for the body template
    pub fn body_key(&self) -> String {
        format!("{}_body", self.key_prefix())
    }

    /// Cache key for the setup-body template
    pub fn setup_body_key(&self) -> String {
        format!("{}_setup_body", self.key_prefix())
    }

    /// Cache key for the name template of the header at `index`
    ///
    /// Keyed by position, not by name: two headers may share a name
    /// template and only differ after rendering.
    pub fn header_name_key(&self, index: usize) -> String {
        format!("{}_header_{}_name", self.key_prefix(), index)
    }

    /// Cache key for the value template of the header at `index`
    pub fn header_value_key(&self, index: usize) -> String {
        format!("{}_header_{}_value", self.key_prefix(), index)
    }
}

/// Strip every character outside `[a-zA-Z0-9_-]`
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Deserialize a YAML mapping into pairs, preserving document order
fn ordered_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairVisitor;

    impl<'de> Visitor<'de> for PairVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a mapping of header templates")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, value)) = access.next_entry::<String, String>()? {
                out.push((name, value));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(PairVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_DOC: &str = r#"
name: paged-listing
url: "http://{{host}}/api/items?page={{page}}"
method: GET
headers:
  Zulu-Header: "z"
  Authorization: "Bearer {{auth_token}}"
  Accept: "application/json"
body: ""
stop_when:
  - ".body_object.done == true"
lists:
  - ["alpha", "beta"]
  - ["one", "two"]
"#;

    #[test]
    fn test_load_full_document() {
        let def = RequestDefinition::load(FULL_DOC.as_bytes()).unwrap();
        assert_eq!(def.name, "paged-listing");
        assert_eq!(def.method, "GET");
        assert_eq!(def.stop_when, vec![".body_object.done == true"]);
        assert_eq!(def.lists.len(), 2);
        assert_eq!(def.lists[0], vec!["alpha", "beta"]);
    }

    #[test]
    fn test_headers_keep_document_order() {
        let def = RequestDefinition::load(FULL_DOC.as_bytes()).unwrap();
        let names: Vec<&str> = def.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Zulu-Header", "Authorization", "Accept"]);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let def = RequestDefinition::load(b"url: \"ws://h/socket\"").unwrap();
        assert_eq!(def.name, "");
        assert_eq!(def.method, "");
        assert_eq!(def.body, "");
        assert_eq!(def.setup_body, "");
        assert!(def.headers.is_empty());
        assert!(def.stop_when.is_empty());
        assert!(def.lists.is_empty());
    }

    #[test]
    fn test_missing_url_is_a_parse_error() {
        let err = RequestDefinition::load(b"name: incomplete").unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn test_malformed_document() {
        assert!(RequestDefinition::load(b"url: [unclosed").is_err());
        assert!(RequestDefinition::load(b"- just\n- a\n- sequence").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_DOC.as_bytes()).unwrap();

        let def = RequestDefinition::load_file(file.path()).unwrap();
        assert_eq!(def.name, "paged-listing");

        assert!(RequestDefinition::load_file("/nonexistent/definition.yml").is_err());
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("get_http://x/{{page}}"), "get_httpxpage");
        assert_eq!(sanitize_key("plain_key-1"), "plain_key-1");
        assert_eq!(sanitize_key("(╯°□°)╯"), "");
    }

    #[test]
    fn test_template_keys() {
        let def = RequestDefinition::load(FULL_DOC.as_bytes()).unwrap();
        let prefix = def.key_prefix();
        assert!(prefix.starts_with("get_http"));
        assert_eq!(def.url_key(), format!("{}_url", prefix));
        assert_eq!(def.header_name_key(1), format!("{}_header_1_name", prefix));
        assert_eq!(def.header_value_key(1), format!("{}_header_1_value", prefix));

        // same definition always derives the same keys
        assert_eq!(def.key_prefix(), prefix);
    }
}
