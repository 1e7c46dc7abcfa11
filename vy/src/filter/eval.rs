//! Lazy evaluator over JSON values
//!
//! Each filter step maps one input value to a stream of output values.
//! Streams are boxed iterators so evaluation stays lazy; runtime faults and
//! halts travel through the stream as `Signal` items.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use super::parser::{Ast, Builtin, CmpOp, number_value};
use super::{Signal, is_truthy};

pub(crate) type Outputs<'a> = Box<dyn Iterator<Item = Result<Value, Signal>> + 'a>;

pub(crate) fn eval<'a>(ast: &'a Ast, input: Value) -> Outputs<'a> {
    match ast {
        Ast::Identity => once_ok(input),
        Ast::Literal(v) => once_ok(v.clone()),
        Ast::Field(inner, name) => {
            Box::new(eval(inner, input).map(move |r| r.and_then(|v| field_access(v, name))))
        }
        Ast::Index(inner, idx) => {
            let target_input = input.clone();
            Box::new(eval(idx, input).flat_map(move |ri| -> Outputs<'a> {
                match ri {
                    Ok(vi) => Box::new(
                        eval(inner, target_input.clone())
                            .map(move |rt| rt.and_then(|vt| index_access(vt, &vi))),
                    ),
                    Err(e) => once_err(e),
                }
            }))
        }
        Ast::Iterate(inner) => Box::new(eval(inner, input).flat_map(|r| -> Outputs<'a> {
            match r {
                Ok(Value::Array(items)) => Box::new(items.into_iter().map(Ok)),
                Ok(Value::Object(map)) => Box::new(map.into_iter().map(|(_, v)| Ok(v))),
                Ok(other) => once_err(Signal::Error(format!(
                    "cannot iterate over {}",
                    type_name(&other)
                ))),
                Err(e) => once_err(e),
            }
        })),
        Ast::Optional(inner) => {
            Box::new(eval(inner, input).take_while(|r| !matches!(r, Err(Signal::Error(_)))))
        }
        Ast::Pipe(a, b) => Box::new(eval(a, input).flat_map(move |ra| -> Outputs<'a> {
            match ra {
                Ok(va) => eval(b, va),
                Err(e) => once_err(e),
            }
        })),
        Ast::Comma(a, b) => Box::new(eval(a, input.clone()).chain(eval(b, input))),
        Ast::Alternative(a, b) => {
            let mut truthy = Vec::new();
            for r in eval(a, input.clone()) {
                match r {
                    Ok(v) => {
                        if is_truthy(&v) {
                            truthy.push(v);
                        }
                    }
                    Err(Signal::Halt(payload)) => return once_err(Signal::Halt(payload)),
                    // errors on the left side fall through to the right side
                    Err(Signal::Error(_)) => break,
                }
            }
            if truthy.is_empty() {
                eval(b, input)
            } else {
                Box::new(truthy.into_iter().map(Ok))
            }
        }
        Ast::And(a, b) => {
            let rhs_input = input.clone();
            Box::new(eval(a, input).flat_map(move |ra| -> Outputs<'a> {
                match ra {
                    Ok(va) if !is_truthy(&va) => once_ok(Value::Bool(false)),
                    Ok(_) => Box::new(
                        eval(b, rhs_input.clone())
                            .map(|rb| rb.map(|vb| Value::Bool(is_truthy(&vb)))),
                    ),
                    Err(e) => once_err(e),
                }
            }))
        }
        Ast::Or(a, b) => {
            let rhs_input = input.clone();
            Box::new(eval(a, input).flat_map(move |ra| -> Outputs<'a> {
                match ra {
                    Ok(va) if is_truthy(&va) => once_ok(Value::Bool(true)),
                    Ok(_) => Box::new(
                        eval(b, rhs_input.clone())
                            .map(|rb| rb.map(|vb| Value::Bool(is_truthy(&vb)))),
                    ),
                    Err(e) => once_err(e),
                }
            }))
        }
        Ast::Compare(op, a, b) => {
            let op = *op;
            cross(a, b, input, move |va, vb| {
                Ok(Value::Bool(compare_values(op, va, vb)))
            })
        }
        Ast::Add(a, b) => cross(a, b, input, |va, vb| add_values(va, vb)),
        Ast::Sub(a, b) => cross(a, b, input, |va, vb| sub_values(va, vb)),
        Ast::Neg(inner) => Box::new(eval(inner, input).map(|r| {
            r.and_then(|v| match v {
                Value::Number(n) => Ok(number_value(-n.as_f64().unwrap_or(0.0))),
                other => Err(Signal::Error(format!("cannot negate {}", type_name(&other)))),
            })
        })),
        Ast::Collect(inner) => match collect_values(eval(inner, input)) {
            Ok(vals) => once_ok(Value::Array(vals)),
            Err(sig) => once_err(sig),
        },
        Ast::Call(builtin, arg) => call(*builtin, arg.as_deref(), input),
    }
}

/// Evaluate both operand streams and apply `op` over the cross product,
/// right operand in the outer loop
fn cross<'a, F>(lhs: &'a Ast, rhs: &'a Ast, input: Value, op: F) -> Outputs<'a>
where
    F: Fn(&Value, &Value) -> Result<Value, Signal> + Copy + 'a,
{
    let lhs_input = input.clone();
    Box::new(eval(rhs, input).flat_map(move |rb| -> Outputs<'a> {
        match rb {
            Ok(vb) => Box::new(
                eval(lhs, lhs_input.clone()).map(move |ra| ra.and_then(|va| op(&va, &vb))),
            ),
            Err(e) => once_err(e),
        }
    }))
}

fn call<'a>(builtin: Builtin, arg: Option<&'a Ast>, input: Value) -> Outputs<'a> {
    match (builtin, arg) {
        (Builtin::Length, _) => {
            let out = match &input {
                Value::Null => Ok(Value::from(0)),
                Value::Bool(_) => Err(Signal::Error("boolean has no length".to_string())),
                Value::Number(n) => Ok(number_value(n.as_f64().unwrap_or(0.0).abs())),
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(a) => Ok(Value::from(a.len())),
                Value::Object(m) => Ok(Value::from(m.len())),
            };
            Box::new(std::iter::once(out))
        }
        (Builtin::Type, _) => once_ok(Value::String(type_name(&input).to_string())),
        (Builtin::Keys, _) => match input {
            Value::Object(m) => {
                let mut keys: Vec<String> = m.into_iter().map(|(k, _)| k).collect();
                keys.sort();
                once_ok(Value::Array(keys.into_iter().map(Value::String).collect()))
            }
            Value::Array(a) => once_ok(Value::Array((0..a.len()).map(Value::from).collect())),
            other => once_err(Signal::Error(format!("{} has no keys", type_name(&other)))),
        },
        (Builtin::Not, _) => once_ok(Value::Bool(!is_truthy(&input))),
        (Builtin::Empty, _) => no_outputs(),
        (Builtin::Halt, _) => once_err(Signal::Halt(Value::Null)),
        (Builtin::HaltError, _) => once_err(Signal::Halt(input)),
        (Builtin::Any, _) => match input {
            Value::Array(items) => once_ok(Value::Bool(items.iter().any(is_truthy))),
            other => once_err(Signal::Error(format!(
                "cannot iterate over {}",
                type_name(&other)
            ))),
        },
        (Builtin::All, _) => match input {
            Value::Array(items) => once_ok(Value::Bool(items.iter().all(is_truthy))),
            other => once_err(Signal::Error(format!(
                "cannot iterate over {}",
                type_name(&other)
            ))),
        },
        (Builtin::Has, Some(f)) => {
            let subject = input.clone();
            Box::new(eval(f, input).map(move |rk| rk.and_then(|k| has_key(&subject, &k))))
        }
        (Builtin::Select, Some(f)) => {
            let subject = input.clone();
            Box::new(eval(f, input).filter_map(move |rf| match rf {
                Ok(v) if is_truthy(&v) => Some(Ok(subject.clone())),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }))
        }
        (Builtin::First, Some(f)) => Box::new(eval(f, input).take(1)),
        (Builtin::Test, Some(f)) => {
            let subject = match &input {
                Value::String(s) => s.clone(),
                other => {
                    return once_err(Signal::Error(format!(
                        "{} cannot be matched, as it is not a string",
                        type_name(other)
                    )));
                }
            };
            Box::new(eval(f, input).map(move |rp| {
                rp.and_then(|p| match p {
                    Value::String(pattern) => match Regex::new(&pattern) {
                        Ok(re) => Ok(Value::Bool(re.is_match(&subject))),
                        Err(e) => Err(Signal::Error(format!("invalid regex '{}': {}", pattern, e))),
                    },
                    other => Err(Signal::Error(format!(
                        "test pattern must be a string, not {}",
                        type_name(&other)
                    ))),
                })
            }))
        }
        (Builtin::Has | Builtin::Select | Builtin::First | Builtin::Test, None) => {
            once_err(Signal::Error("missing function argument".to_string()))
        }
    }
}

fn once_ok<'a>(v: Value) -> Outputs<'a> {
    Box::new(std::iter::once(Ok(v)))
}

fn once_err<'a>(sig: Signal) -> Outputs<'a> {
    Box::new(std::iter::once(Err(sig)))
}

fn no_outputs<'a>() -> Outputs<'a> {
    Box::new(std::iter::empty())
}

fn collect_values(
    outputs: impl Iterator<Item = Result<Value, Signal>>,
) -> Result<Vec<Value>, Signal> {
    let mut out = Vec::new();
    for r in outputs {
        out.push(r?);
    }
    Ok(out)
}

fn field_access(v: Value, name: &str) -> Result<Value, Signal> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Object(mut m) => Ok(m.remove(name).unwrap_or(Value::Null)),
        other => Err(Signal::Error(format!(
            "cannot index {} with \"{}\"",
            type_name(&other),
            name
        ))),
    }
}

fn index_access(target: Value, idx: &Value) -> Result<Value, Signal> {
    match (target, idx) {
        (Value::Null, Value::String(_)) | (Value::Null, Value::Number(_)) => Ok(Value::Null),
        (Value::Object(mut m), Value::String(key)) => Ok(m.remove(key).unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(n)) => {
            let raw = n.as_f64().unwrap_or(0.0) as i64;
            let i = if raw < 0 { raw + items.len() as i64 } else { raw };
            if i < 0 {
                return Ok(Value::Null);
            }
            Ok(items.into_iter().nth(i as usize).unwrap_or(Value::Null))
        }
        (target, idx) => Err(Signal::Error(format!(
            "cannot index {} with {}",
            type_name(&target),
            type_name(idx)
        ))),
    }
}

fn has_key(subject: &Value, key: &Value) -> Result<Value, Signal> {
    match (subject, key) {
        (Value::Object(m), Value::String(s)) => Ok(Value::Bool(m.contains_key(s))),
        (Value::Array(a), Value::Number(n)) => {
            let i = n.as_f64().unwrap_or(-1.0);
            Ok(Value::Bool(i >= 0.0 && (i as usize) < a.len()))
        }
        (subject, key) => Err(Signal::Error(format!(
            "cannot check whether {} has a {} key",
            type_name(subject),
            type_name(key)
        ))),
    }
}

fn compare_values(op: CmpOp, a: &Value, b: &Value) -> bool {
    let ord = value_cmp(a, b);
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

/// Total order across JSON types: null < booleans < numbers < strings <
/// arrays < objects
fn value_cmp(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let fx = x.as_f64().unwrap_or(0.0);
            let fy = y.as_f64().unwrap_or(0.0);
            fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = value_cmp(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut kx: Vec<&String> = x.keys().collect();
            let mut ky: Vec<&String> = y.keys().collect();
            kx.sort();
            ky.sort();
            let ord = kx.cmp(&ky);
            if ord != Ordering::Equal {
                return ord;
            }
            for k in kx {
                let vx = x.get(k.as_str()).unwrap_or(&Value::Null);
                let vy = y.get(k.as_str()).unwrap_or(&Value::Null);
                let ord = value_cmp(vx, vy);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn add_values(a: &Value, b: &Value) -> Result<Value, Signal> {
    match (a, b) {
        (Value::Null, x) => Ok(x.clone()),
        (x, Value::Null) => Ok(x.clone()),
        (Value::Number(x), Value::Number(y)) => Ok(number_value(
            x.as_f64().unwrap_or(0.0) + y.as_f64().unwrap_or(0.0),
        )),
        (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{}{}", x, y))),
        (Value::Array(x), Value::Array(y)) => {
            let mut out = x.clone();
            out.extend(y.iter().cloned());
            Ok(Value::Array(out))
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut out = x.clone();
            for (k, v) in y {
                out.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(out))
        }
        _ => Err(Signal::Error(format!(
            "cannot add {} and {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

fn sub_values(a: &Value, b: &Value) -> Result<Value, Signal> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(number_value(
            x.as_f64().unwrap_or(0.0) - y.as_f64().unwrap_or(0.0),
        )),
        (Value::Array(x), Value::Array(y)) => {
            let out = x
                .iter()
                .filter(|ex| !y.iter().any(|ey| value_cmp(ex, ey) == Ordering::Equal))
                .cloned()
                .collect();
            Ok(Value::Array(out))
        }
        _ => Err(Signal::Error(format!(
            "cannot subtract {} from {}",
            type_name(b),
            type_name(a)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn run(src: &str, input: Value) -> Vec<Value> {
        let ast = parse(src).expect("parse");
        eval(&ast, input)
            .collect::<Result<Vec<_>, _>>()
            .expect("eval")
    }

    fn run_signal(src: &str, input: Value) -> Signal {
        let ast = parse(src).expect("parse");
        eval(&ast, input)
            .find_map(|r| r.err())
            .expect("expected a signal")
    }

    #[test]
    fn test_identity_and_literals() {
        assert_eq!(run(".", json!({"a": 1})), vec![json!({"a": 1})]);
        assert_eq!(run("42", json!(null)), vec![json!(42)]);
        assert_eq!(run("\"hi\"", json!(null)), vec![json!("hi")]);
        assert_eq!(run("null", json!(7)), vec![json!(null)]);
    }

    #[test]
    fn test_field_access() {
        assert_eq!(run(".a", json!({"a": 1})), vec![json!(1)]);
        assert_eq!(run(".missing", json!({"a": 1})), vec![json!(null)]);
        assert_eq!(run(".a", json!(null)), vec![json!(null)]);
        assert_eq!(run(".a.b.c", json!({"a": {"b": {"c": 3}}})), vec![json!(3)]);

        let sig = run_signal(".a", json!(5));
        assert!(matches!(sig, Signal::Error(msg) if msg.contains("cannot index number")));
    }

    #[test]
    fn test_index_access() {
        assert_eq!(run(".[0]", json!([10, 20])), vec![json!(10)]);
        assert_eq!(run(".[-1]", json!([10, 20])), vec![json!(20)]);
        assert_eq!(run(".[5]", json!([10, 20])), vec![json!(null)]);
        assert_eq!(run(".[\"k\"]", json!({"k": 1})), vec![json!(1)]);
        assert_eq!(run(".items[1]", json!({"items": ["a", "b"]})), vec![json!("b")]);
        assert_eq!(run(".[0]", json!(null)), vec![json!(null)]);
    }

    #[test]
    fn test_iterate() {
        assert_eq!(run(".[]", json!([1, 2])), vec![json!(1), json!(2)]);
        assert_eq!(run(".[]", json!({"a": 1, "b": 2})), vec![json!(1), json!(2)]);

        let sig = run_signal(".[]", json!(null));
        assert!(matches!(sig, Signal::Error(msg) if msg.contains("iterate")));

        assert_eq!(run(".[]?", json!(null)), Vec::<Value>::new());
    }

    #[test]
    fn test_pipe_and_comma() {
        assert_eq!(run(".a | .b", json!({"a": {"b": 9}})), vec![json!(9)]);
        assert_eq!(run(".a, .b", json!({"a": 1, "b": 2})), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("1 + 2", json!(null)), vec![json!(3)]);
        assert_eq!(run("\"a\" + \"b\"", json!(null)), vec![json!("ab")]);
        assert_eq!(run("[1] + [2]", json!(null)), vec![json!([1, 2])]);
        assert_eq!(run("null + 5", json!(null)), vec![json!(5)]);
        assert_eq!(run("10 - 3", json!(null)), vec![json!(7)]);
        assert_eq!(run("[1,2,3] - [2]", json!(null)), vec![json!([1, 3])]);
        assert_eq!(run("-.a", json!({"a": 5})), vec![json!(-5)]);

        let sig = run_signal("1 + \"x\"", json!(null));
        assert!(matches!(sig, Signal::Error(msg) if msg.contains("cannot add")));
    }

    #[test]
    fn test_cross_product_order() {
        // right operand drives the outer loop
        assert_eq!(
            run("(1,2) + (10,20)", json!(null)),
            vec![json!(11), json!(12), json!(21), json!(22)]
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("1 < 2", json!(null)), vec![json!(true)]);
        assert_eq!(run("2 == 2.0", json!(null)), vec![json!(true)]);
        assert_eq!(run("\"a\" < \"b\"", json!(null)), vec![json!(true)]);
        // total order across types: null < false < numbers
        assert_eq!(run("null < false", json!(null)), vec![json!(true)]);
        assert_eq!(run("true < 0", json!(null)), vec![json!(true)]);
        assert_eq!(run("[1,2] < [1,3]", json!(null)), vec![json!(true)]);
        assert_eq!(run(".done == true", json!({"done": false})), vec![json!(false)]);
        assert_eq!(run(".done != true", json!({"done": false})), vec![json!(true)]);
    }

    #[test]
    fn test_and_or_short_circuit() {
        assert_eq!(run("true and false", json!(null)), vec![json!(false)]);
        assert_eq!(run("false or true", json!(null)), vec![json!(true)]);
        // rhs would fault, but lhs short-circuits
        assert_eq!(run("false and (1 + \"x\")", json!(null)), vec![json!(false)]);
        assert_eq!(run("true or (1 + \"x\")", json!(null)), vec![json!(true)]);
        // non-boolean truthiness
        assert_eq!(run("\"s\" and 0", json!(null)), vec![json!(true)]);
    }

    #[test]
    fn test_alternative() {
        assert_eq!(run(".missing // 42", json!({})), vec![json!(42)]);
        assert_eq!(run("false // 1", json!(null)), vec![json!(1)]);
        assert_eq!(run(".a // 2", json!({"a": 5})), vec![json!(5)]);
        // left-side faults fall through to the right side
        assert_eq!(run(".a.b // \"d\"", json!({"a": "str"})), vec![json!("d")]);
    }

    #[test]
    fn test_collect() {
        assert_eq!(run("[.[]]", json!([1, 2])), vec![json!([1, 2])]);
        assert_eq!(run("[.a, .b]", json!({"a": 1, "b": 2})), vec![json!([1, 2])]);
        assert_eq!(run("[]", json!(null)), vec![json!([])]);
    }

    #[test]
    fn test_length_type_keys() {
        assert_eq!(run("length", json!([1, 2, 3])), vec![json!(3)]);
        assert_eq!(run("length", json!("hëllo")), vec![json!(5)]);
        assert_eq!(run("length", json!(null)), vec![json!(0)]);
        assert_eq!(run("length", json!(-4)), vec![json!(4)]);
        assert_eq!(run("type", json!([1])), vec![json!("array")]);
        assert_eq!(run("keys", json!({"b": 1, "a": 2})), vec![json!(["a", "b"])]);
        assert_eq!(run("keys", json!([7, 8])), vec![json!([0, 1])]);
    }

    #[test]
    fn test_has_not() {
        assert_eq!(run("has(\"a\")", json!({"a": 1})), vec![json!(true)]);
        assert_eq!(run("has(\"z\")", json!({"a": 1})), vec![json!(false)]);
        assert_eq!(run("has(1)", json!([10, 20])), vec![json!(true)]);
        assert_eq!(run("has(2)", json!([10, 20])), vec![json!(false)]);
        assert_eq!(run(".a | not", json!({"a": null})), vec![json!(true)]);
        assert_eq!(run("not", json!(0)), vec![json!(false)]);
    }

    #[test]
    fn test_select_first_empty() {
        assert_eq!(
            run("select(.done)", json!({"done": true})),
            vec![json!({"done": true})]
        );
        assert_eq!(run("select(.done)", json!({"done": false})), Vec::<Value>::new());
        assert_eq!(run("first(.[])", json!([4, 5, 6])), vec![json!(4)]);
        assert_eq!(run("empty", json!(1)), Vec::<Value>::new());
    }

    #[test]
    fn test_any_all() {
        assert_eq!(run("any", json!([false, true])), vec![json!(true)]);
        assert_eq!(run("any", json!([false, null])), vec![json!(false)]);
        assert_eq!(run("all", json!([1, "x"])), vec![json!(true)]);
        assert_eq!(run("all", json!([1, null])), vec![json!(false)]);
    }

    #[test]
    fn test_regex_match() {
        assert_eq!(run(".name | test(\"^ab\")", json!({"name": "abc"})), vec![json!(true)]);
        assert_eq!(run("test(\"\\\\d+\")", json!("order 42")), vec![json!(true)]);

        let sig = run_signal("test(\"[\")", json!("x"));
        assert!(matches!(sig, Signal::Error(msg) if msg.contains("invalid regex")));

        let sig = run_signal("test(\"x\")", json!(5));
        assert!(matches!(sig, Signal::Error(msg) if msg.contains("not a string")));
    }

    #[test]
    fn test_halt() {
        assert_eq!(run_signal("halt", json!(1)), Signal::Halt(json!(null)));
        assert_eq!(
            run_signal(".a | halt_error", json!({"a": "boom"})),
            Signal::Halt(json!("boom"))
        );
    }

    #[test]
    fn test_optional_suppresses_faults() {
        assert_eq!(run("(1 + \"x\")?", json!(null)), Vec::<Value>::new());
        assert_eq!(run(".a?", json!(5)), Vec::<Value>::new());
    }

    #[test]
    fn test_composite() {
        let input = json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}]});
        assert_eq!(
            run("[.items[] | select(.id > 1)] | length", input),
            vec![json!(2)]
        );
    }
}
