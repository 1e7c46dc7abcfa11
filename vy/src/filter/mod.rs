//! jq-style filter expressions
//!
//! Stop conditions are written as a small subset of the jq language and
//! evaluated against the normalized response. Supported: paths (`.a.b`,
//! `.[0]`, `.["key"]`, `.[]`, `?`), pipe, comma, alternative `//`,
//! `and`/`or`, comparisons, `+`/`-`, array construction, and the builtins
//! `length`, `type`, `keys`, `has`, `not`, `empty`, `select`, `first`,
//! `test`, `any`, `all`, `halt`, `halt_error`.

mod eval;
mod parser;

use serde_json::Value;
use thiserror::Error;

/// Errors from parsing or evaluating a filter expression
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Parse error in '{filter}': {message}")]
    Parse { filter: String, message: String },

    #[error("Evaluation error in '{filter}': {message}")]
    Eval { filter: String, message: String },
}

/// Out-of-band outcome carried through an output stream
///
/// `Halt` is the jq halt family: the payload is null for plain `halt` and
/// the current input for `halt_error`. `Error` is a runtime fault such as
/// indexing a number.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Halt(Value),
    Error(String),
}

/// One compiled filter expression
#[derive(Debug, Clone)]
pub struct Filter {
    source: String,
    ast: parser::Ast,
}

impl Filter {
    /// Parse an expression into its compiled form
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let ast = parser::parse(source).map_err(|message| FilterError::Parse {
            filter: source.to_string(),
            message,
        })?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// The original expression text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one input, producing a lazy stream of outputs
    ///
    /// The stream is finite and can be produced again for another input;
    /// evaluation has no side effects.
    pub fn run(&self, input: &Value) -> impl Iterator<Item = Result<Value, Signal>> + '_ {
        eval::eval(&self.ast, input.clone())
    }

    /// Wrap a runtime fault with this filter's source text
    pub fn eval_error(&self, message: impl Into<String>) -> FilterError {
        FilterError::Eval {
            filter: self.source.clone(),
            message: message.into(),
        }
    }
}

/// jq truthiness: every value except `null` and `false`
pub fn is_truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_error_carries_source() {
        let err = Filter::parse(".done ==").unwrap_err();
        match err {
            FilterError::Parse { filter, message } => {
                assert_eq!(filter, ".done ==");
                assert!(!message.is_empty());
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(0)));
        assert!(is_truthy(&json!("")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn test_run_is_restartable() {
        let filter = Filter::parse(".items[]").unwrap();
        let input = json!({"items": [1, 2]});

        let first: Vec<_> = filter.run(&input).collect::<Result<_, _>>().unwrap();
        let second: Vec<_> = filter.run(&input).collect::<Result<_, _>>().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_eval_error_names_filter() {
        let filter = Filter::parse(".a").unwrap();
        let err = filter.eval_error("boom");
        assert!(err.to_string().contains(".a"));
        assert!(err.to_string().contains("boom"));
    }
}
