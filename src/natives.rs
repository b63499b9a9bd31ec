//! Native module registry (§4.9): a fixed namespace of module names
//! resolved without touching the filesystem. `math`, `string`, `array`,
//! `assert` and `process` are fully implemented because they are pure
//! (or, for `process`, host-effect-free beyond exit codes and argv);
//! the remaining listed modules are out of scope for the core (§1) and
//! resolve to an empty map so importing them never fails, but calling
//! anything on them does.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::ErrorKind;
use crate::evaluator::{EvalResult, Evaluator, Signal};
use crate::value::{Arity, Callable, ErrorObject, NativeFunction, SharedArray, Value};

/// Out-of-scope native modules (§1, §4.9): importable, but contribute no
/// callables, so any property access on them fails with a `NameError`
/// exactly as it would for a module that genuinely had nothing exported.
const STUB_MODULES: &[&str] = &[
    "io", "log", "env", "path", "fs", "time", "json", "regex", "http", "ui", "audio", "image",
    "ipc", "net",
];

pub fn resolve_native(name: &str) -> Option<Value> {
    let name = name.strip_prefix("std.").unwrap_or(name);
    match name {
        "math" => Some(math_module()),
        "string" => Some(string_module()),
        "array" => Some(array_module()),
        "assert" => Some(assert_module()),
        "process" => Some(process_module()),
        other if STUB_MODULES.contains(&other) => Some(Value::map(IndexMap::new())),
        _ => None,
    }
}

fn native(name: &str, arity: Arity, f: impl Fn(&mut Evaluator, Vec<Value>) -> EvalResult + 'static) -> Value {
    Value::Callable(Rc::new(Callable::Native(NativeFunction {
        name: name.to_string(),
        arity,
        func: Rc::new(f),
    })))
}

fn type_error(expected: &str, got: &Value) -> Signal {
    Signal::Throw(Value::Error(Rc::new(ErrorObject::new(
        ErrorKind::Type.to_string(),
        format!("expected {expected}, got {}", got.type_name()),
    ))))
}

fn expect_number(v: &Value) -> Result<f64, Signal> {
    match v {
        Value::Number(n) => Ok(*n),
        other => Err(type_error("a number", other)),
    }
}

fn expect_string(v: &Value) -> Result<Rc<str>, Signal> {
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(type_error("a string", other)),
    }
}

// ---- math -----------------------------------------------------------------

fn math_module() -> Value {
    let mut m = IndexMap::new();
    m.insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    m.insert("E".to_string(), Value::Number(std::f64::consts::E));
    m.insert(
        "abs".to_string(),
        native("math.abs", Arity::Fixed(1), |_, args| Ok(Value::Number(expect_number(&args[0])?.abs()))),
    );
    m.insert(
        "floor".to_string(),
        native("math.floor", Arity::Fixed(1), |_, args| {
            Ok(Value::Number(expect_number(&args[0])?.floor()))
        }),
    );
    m.insert(
        "ceil".to_string(),
        native("math.ceil", Arity::Fixed(1), |_, args| Ok(Value::Number(expect_number(&args[0])?.ceil()))),
    );
    m.insert(
        "round".to_string(),
        native("math.round", Arity::Fixed(1), |_, args| {
            Ok(Value::Number(expect_number(&args[0])?.round()))
        }),
    );
    m.insert(
        "sqrt".to_string(),
        native("math.sqrt", Arity::Fixed(1), |_, args| Ok(Value::Number(expect_number(&args[0])?.sqrt()))),
    );
    m.insert(
        "pow".to_string(),
        native("math.pow", Arity::Fixed(2), |_, args| {
            Ok(Value::Number(expect_number(&args[0])?.powf(expect_number(&args[1])?)))
        }),
    );
    m.insert(
        "min".to_string(),
        native("math.min", Arity::Fixed(2), |_, args| {
            Ok(Value::Number(expect_number(&args[0])?.min(expect_number(&args[1])?)))
        }),
    );
    m.insert(
        "max".to_string(),
        native("math.max", Arity::Fixed(2), |_, args| {
            Ok(Value::Number(expect_number(&args[0])?.max(expect_number(&args[1])?)))
        }),
    );
    Value::map(m)
}

// ---- string -----------------------------------------------------------------

fn string_module() -> Value {
    let mut m = IndexMap::new();
    m.insert(
        "upper".to_string(),
        native("string.upper", Arity::Fixed(1), |_, args| {
            Ok(Value::string(expect_string(&args[0])?.to_uppercase()))
        }),
    );
    m.insert(
        "lower".to_string(),
        native("string.lower", Arity::Fixed(1), |_, args| {
            Ok(Value::string(expect_string(&args[0])?.to_lowercase()))
        }),
    );
    m.insert(
        "trim".to_string(),
        native("string.trim", Arity::Fixed(1), |_, args| {
            Ok(Value::string(expect_string(&args[0])?.trim().to_string()))
        }),
    );
    m.insert(
        "split".to_string(),
        native("string.split", Arity::Fixed(2), |_, args| {
            let s = expect_string(&args[0])?;
            let sep = expect_string(&args[1])?;
            let parts = if sep.is_empty() {
                s.chars().map(|c| Value::string(c.to_string())).collect()
            } else {
                s.split(sep.as_ref()).map(Value::string).collect()
            };
            Ok(Value::array(parts))
        }),
    );
    m.insert(
        "replace".to_string(),
        native("string.replace", Arity::Fixed(3), |_, args| {
            let s = expect_string(&args[0])?;
            let from = expect_string(&args[1])?;
            let to = expect_string(&args[2])?;
            Ok(Value::string(s.replace(from.as_ref(), &to)))
        }),
    );
    m.insert(
        "contains".to_string(),
        native("string.contains", Arity::Fixed(2), |_, args| {
            Ok(Value::Boolean(expect_string(&args[0])?.contains(expect_string(&args[1])?.as_ref())))
        }),
    );
    m.insert(
        "starts_with".to_string(),
        native("string.starts_with", Arity::Fixed(2), |_, args| {
            Ok(Value::Boolean(
                expect_string(&args[0])?.starts_with(expect_string(&args[1])?.as_ref()),
            ))
        }),
    );
    m.insert(
        "ends_with".to_string(),
        native("string.ends_with", Arity::Fixed(2), |_, args| {
            Ok(Value::Boolean(expect_string(&args[0])?.ends_with(expect_string(&args[1])?.as_ref())))
        }),
    );
    m.insert(
        "to_number".to_string(),
        native("string.to_number", Arity::Fixed(1), |_, args| {
            let s = expect_string(&args[0])?;
            s.trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| Signal::Throw(Value::Error(Rc::new(ErrorObject::new(
                    ErrorKind::Value.to_string(),
                    format!("'{s}' is not a valid number"),
                )))))
        }),
    );
    m.insert(
        "repeat".to_string(),
        native("string.repeat", Arity::Fixed(2), |_, args| {
            let s = expect_string(&args[0])?;
            let n = expect_number(&args[1])?;
            if n < 0.0 {
                return Err(Signal::Throw(Value::Error(Rc::new(ErrorObject::new(
                    ErrorKind::Value.to_string(),
                    "repeat count must be non-negative",
                )))));
            }
            Ok(Value::string(s.repeat(n as usize)))
        }),
    );
    Value::map(m)
}

pub fn string_method(s: Rc<str>, name: &str) -> EvalResult {
    match name {
        "upper" => Ok(Value::string(s.to_uppercase())),
        "lower" => Ok(Value::string(s.to_lowercase())),
        "trim" => Ok(Value::string(s.trim().to_string())),
        _ => Err(Signal::Throw(Value::Error(Rc::new(ErrorObject::new(
            ErrorKind::Name.to_string(),
            format!("no such property '{name}' on String"),
        ))))),
    }
}

// ---- array ------------------------------------------------------------------

fn array_module() -> Value {
    let mut m = IndexMap::new();
    m.insert(
        "new".to_string(),
        native("array.new", Arity::Variadic, |_, args| Ok(Value::array(args))),
    );
    Value::map(m)
}

/// Array methods are reached via property access (`arr.map(...)`) rather
/// than through the `array` native module, so higher-order ones can
/// re-enter the evaluator through [`Evaluator::call_callable`] (§4.9.1).
pub fn array_method(evaluator: &mut Evaluator, arr: SharedArray, name: &str) -> EvalResult {
    match name {
        "push" => Ok(native_bound_array_fn(arr, move |arr, mut args| {
            arr.borrow_mut().append(&mut args);
            Ok(Value::Nil)
        })),
        "pop" => Ok(native_bound_array_fn(arr, |arr, _args| Ok(arr.borrow_mut().pop().unwrap_or(Value::Nil)))),
        "slice" => Ok(native_bound_array_fn(arr, |arr, args| {
            let items = arr.borrow();
            let start = expect_number(&args[0])? as usize;
            let end = args.get(1).map(expect_number).transpose()?.map(|n| n as usize).unwrap_or(items.len());
            Ok(Value::array(items.get(start..end.min(items.len())).unwrap_or(&[]).to_vec()))
        })),
        "concat" => Ok(native_bound_array_fn(arr, |arr, args| {
            let mut out = arr.borrow().clone();
            for a in args {
                if let Value::Array(other) = a {
                    out.extend(other.borrow().iter().cloned());
                }
            }
            Ok(Value::array(out))
        })),
        "join" => Ok(native_bound_array_fn(arr, |arr, args| {
            let sep = args.first().map(expect_string).transpose()?.map(|s| s.to_string()).unwrap_or_default();
            let parts: Vec<String> = arr.borrow().iter().map(crate::value::display_value).collect();
            Ok(Value::string(parts.join(&sep)))
        })),
        "reverse" => Ok(native_bound_array_fn(arr, |arr, _args| {
            let mut items = arr.borrow().clone();
            items.reverse();
            Ok(Value::array(items))
        })),
        "includes" => Ok(native_bound_array_fn(arr, |arr, args| {
            Ok(Value::Boolean(arr.borrow().iter().any(|v| v.equals(&args[0]))))
        })),
        "index_of" => Ok(native_bound_array_fn(arr, |arr, args| {
            Ok(arr
                .borrow()
                .iter()
                .position(|v| v.equals(&args[0]))
                .map(|i| Value::Number(i as f64))
                .unwrap_or(Value::Number(-1.0)))
        })),
        "map" => Ok(higher_order_array_fn(arr, "map")),
        "filter" => Ok(higher_order_array_fn(arr, "filter")),
        "reduce" => Ok(higher_order_array_fn(arr, "reduce")),
        "sort" => Ok(higher_order_array_fn(arr, "sort")),
        _ => {
            let _ = evaluator;
            Err(Signal::Throw(Value::Error(Rc::new(ErrorObject::new(
                ErrorKind::Name.to_string(),
                format!("no such property '{name}' on Array"),
            )))))
        }
    }
}

fn native_bound_array_fn(arr: SharedArray, f: impl Fn(&SharedArray, Vec<Value>) -> EvalResult + 'static) -> Value {
    native("array method", Arity::Variadic, move |_, args| f(&arr, args))
}

/// `map`/`filter`/`reduce`/`sort` need the evaluator itself (to invoke
/// the caller's callback), so they are wired up as natives that close
/// over the receiving array and re-enter [`Evaluator::call_callable`].
fn higher_order_array_fn(arr: SharedArray, which: &'static str) -> Value {
    native("array higher-order method", Arity::Variadic, move |evaluator, args| {
        let callback = match args.first() {
            Some(Value::Callable(c)) => c.clone(),
            _ => {
                return Err(Signal::Throw(Value::Error(Rc::new(ErrorObject::new(
                    ErrorKind::Type.to_string(),
                    format!("Array.{which} requires a callable argument"),
                )))))
            }
        };
        match which {
            "map" => {
                let items = arr.borrow().clone();
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(evaluator.call_callable(callback.clone(), None, vec![item])?);
                }
                Ok(Value::array(out))
            }
            "filter" => {
                let items = arr.borrow().clone();
                let mut out = Vec::new();
                for item in items {
                    let keep = evaluator.call_callable(callback.clone(), None, vec![item.clone()])?;
                    if keep.is_truthy() {
                        out.push(item);
                    }
                }
                Ok(Value::array(out))
            }
            "reduce" => {
                let items = arr.borrow().clone();
                let mut iter = items.into_iter();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => iter.next().unwrap_or(Value::Nil),
                };
                for item in iter {
                    acc = evaluator.call_callable(callback.clone(), None, vec![acc, item])?;
                }
                Ok(acc)
            }
            "sort" => {
                let mut items = arr.borrow().clone();
                let mut error = None;
                items.sort_by(|a, b| {
                    if error.is_some() {
                        return std::cmp::Ordering::Equal;
                    }
                    match evaluator.call_callable(callback.clone(), None, vec![a.clone(), b.clone()]) {
                        Ok(Value::Number(n)) if n < 0.0 => std::cmp::Ordering::Less,
                        Ok(Value::Number(n)) if n > 0.0 => std::cmp::Ordering::Greater,
                        Ok(_) => std::cmp::Ordering::Equal,
                        Err(e) => {
                            error = Some(e);
                            std::cmp::Ordering::Equal
                        }
                    }
                });
                if let Some(e) = error {
                    return Err(e);
                }
                Ok(Value::array(items))
            }
            _ => unreachable!(),
        }
    })
}

// ---- assert -----------------------------------------------------------------

fn assert_module() -> Value {
    let mut m = IndexMap::new();
    m.insert(
        "truthy".to_string(),
        native("assert.truthy", Arity::Fixed(1), |_, args| {
            if args[0].is_truthy() {
                Ok(Value::Nil)
            } else {
                Err(assertion_failed("expected a truthy value"))
            }
        }),
    );
    m.insert(
        "equals".to_string(),
        native("assert.equals", Arity::Fixed(2), |_, args| {
            if args[0].equals(&args[1]) {
                Ok(Value::Nil)
            } else {
                Err(assertion_failed(format!(
                    "expected {} to equal {}",
                    crate::value::display_value(&args[0]),
                    crate::value::display_value(&args[1])
                )))
            }
        }),
    );
    m.insert(
        "throws".to_string(),
        native("assert.throws", Arity::Fixed(1), |evaluator, args| {
            let callback = match &args[0] {
                Value::Callable(c) => c.clone(),
                other => return Err(type_error("a callable", other)),
            };
            match evaluator.call_callable(callback, None, Vec::new()) {
                Err(Signal::Throw(_)) => Ok(Value::Nil),
                Ok(_) => Err(assertion_failed("expected the function to throw")),
                Err(other) => Err(other),
            }
        }),
    );
    Value::map(m)
}

fn assertion_failed(message: impl Into<String>) -> Signal {
    Signal::Throw(Value::Error(Rc::new(ErrorObject::new(ErrorKind::Value.to_string(), message.into()))))
}

// ---- process ----------------------------------------------------------------

fn process_module() -> Value {
    let mut m = IndexMap::new();
    m.insert(
        "exit".to_string(),
        native("process.exit", Arity::Fixed(1), |_, args| {
            let code = expect_number(&args[0])? as i32;
            Err(Signal::Exit(code))
        }),
    );
    m.insert(
        "args".to_string(),
        native("process.args", Arity::Fixed(0), |evaluator, _args| {
            Ok(Value::array(evaluator.args.iter().cloned().map(Value::string).collect()))
        }),
    );
    Value::map(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_module_exposes_constants_and_functions() {
        let value = math_module();
        let Value::Map(m) = value else { panic!("expected map") };
        assert!(m.borrow().contains_key("PI"));
        assert!(m.borrow().contains_key("sqrt"));
    }

    #[test]
    fn stub_modules_resolve_to_empty_maps() {
        let value = resolve_native("io").expect("io should resolve");
        let Value::Map(m) = value else { panic!("expected map") };
        assert!(m.borrow().is_empty());
    }

    #[test]
    fn unknown_module_is_not_native() {
        assert!(resolve_native("totally-made-up").is_none());
    }
}
