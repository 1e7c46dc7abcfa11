//! Stop-condition evaluation
//!
//! An existence test over the normalized response: does any configured
//! expression already hold? If yes the run stops; if every expression's
//! output stream runs dry without a truthy value, the run continues.

use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::filter::{Filter, FilterError, Signal, is_truthy};
use crate::response::ResponseSummary;

/// Compiled `stop_when` expressions of one definition
pub struct StopConditions {
    filters: Vec<Filter>,
}

impl StopConditions {
    /// Compile every expression up front; syntax errors surface here,
    /// before any request is sent
    pub fn compile(expressions: &[String]) -> Result<Self, FilterError> {
        let filters = expressions
            .iter()
            .map(|source| Filter::parse(source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Decide whether the run continues after `response`
    ///
    /// An empty condition list means the run stops after one exchange.
    pub fn should_continue(&self, response: &ResponseSummary) -> Result<bool, EngineError> {
        if self.filters.is_empty() {
            return Ok(false);
        }
        let value = response.to_value()?;
        for filter in &self.filters {
            if filter_matches(filter, &value)? {
                debug!(filter = filter.source(), "stop condition matched");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// First truthy output wins; halt-with-null ends the stream unmatched,
/// halt-with-payload counts as a match, evaluation errors are fatal
fn filter_matches(filter: &Filter, value: &Value) -> Result<bool, EngineError> {
    for output in filter.run(value) {
        match output {
            Ok(v) if is_truthy(&v) => return Ok(true),
            Ok(_) => {}
            Err(Signal::Halt(Value::Null)) => return Ok(false),
            Err(Signal::Halt(_)) => return Ok(true),
            Err(Signal::Error(message)) => return Err(filter.eval_error(message).into()),
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RawResponse;

    fn response(body: &str) -> ResponseSummary {
        ResponseSummary::from_raw(&RawResponse {
            status: 200,
            url: None,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.as_bytes().to_vec(),
        })
    }

    fn compile(sources: &[&str]) -> StopConditions {
        let owned: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        StopConditions::compile(&owned).unwrap()
    }

    #[test]
    fn test_empty_list_runs_once() {
        let stop = compile(&[]);
        assert!(stop.is_empty());
        assert!(!stop.should_continue(&response(r#"{"anything": 1}"#)).unwrap());
    }

    #[test]
    fn test_first_truthy_stops() {
        let stop = compile(&[".status == 200"]);
        assert!(!stop.should_continue(&response("{}")).unwrap());
    }

    #[test]
    fn test_false_output_is_not_a_match() {
        let stop = compile(&[".body_object.done == true"]);
        assert!(stop.should_continue(&response(r#"{"done": false}"#)).unwrap());
        assert!(!stop.should_continue(&response(r#"{"done": true}"#)).unwrap());
    }

    #[test]
    fn test_null_output_is_not_a_match() {
        let stop = compile(&[".body_object.cursor"]);
        assert!(stop.should_continue(&response(r#"{"other": 1}"#)).unwrap());
        assert!(!stop.should_continue(&response(r#"{"cursor": "abc"}"#)).unwrap());
    }

    #[test]
    fn test_later_expression_can_match() {
        let stop = compile(&[".body_object.missing", ".status == 200"]);
        assert!(!stop.should_continue(&response("{}")).unwrap());
    }

    #[test]
    fn test_all_streams_dry_means_continue() {
        let stop = compile(&[
            ".body_object.a",
            ".body_array",
            ".body_object.items[]? | select(.done)",
        ]);
        assert!(stop.should_continue(&response(r#"{"items": []}"#)).unwrap());
    }

    #[test]
    fn test_halt_null_is_no_match() {
        let stop = compile(&["halt"]);
        assert!(stop.should_continue(&response("{}")).unwrap());
    }

    #[test]
    fn test_halt_payload_is_a_match() {
        let stop = compile(&[".status | halt_error"]);
        assert!(!stop.should_continue(&response("{}")).unwrap());

        let stop = compile(&[".body_array | halt_error"]);
        assert!(stop.should_continue(&response("{}")).unwrap());
    }

    #[test]
    fn test_eval_error_is_fatal() {
        let stop = compile(&[".raw_body | keys"]);
        let err = stop.should_continue(&response("{}")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Filter(FilterError::Eval { .. })
        ));
    }

    #[test]
    fn test_compile_surfaces_syntax_errors() {
        let sources = vec![".status == 200".to_string(), ".foo &".to_string()];
        assert!(matches!(
            StopConditions::compile(&sources),
            Err(FilterError::Parse { .. })
        ));
    }
}
