//! Global objects and the methods of built-in types.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, warn};

use super::host::{FetchRequest, FetchResponse, LogLevel};
use super::interpreter::{Interpreter, Scope, Unwind, settle};
use super::value::{
    ArrayItems, CircularStructure, Function, FunctionKind, MAX_NESTING, PromiseState, Value,
    format_number, join_values,
};

/// Names of every global binding, used by editor completion.
pub const GLOBAL_NAMES: &[&str] = &[
    "console",
    "fetch",
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "JSON",
    "Math",
    "String",
    "Number",
    "Boolean",
    "Object",
    "Array",
    "Promise",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "NaN",
    "Infinity",
];

/// Method names offered after a `.` by editor completion.
pub const MEMBER_NAMES: &[&str] = &[
    "log", "info", "warn", "error", "then", "catch", "finally", "json", "text", "status", "ok",
    "statusText", "headers", "length", "push", "pop", "shift", "unshift", "slice", "splice",
    "concat", "join", "reverse", "indexOf", "includes", "find", "findIndex", "filter", "map",
    "forEach", "reduce", "some", "every", "sort", "flat", "at", "fill", "toUpperCase",
    "toLowerCase", "trim", "trimStart", "trimEnd", "startsWith", "endsWith", "split", "replace",
    "replaceAll", "repeat", "padStart", "padEnd", "charAt", "substring", "toFixed", "toString",
    "stringify", "parse", "keys", "values", "entries", "assign", "isArray", "from", "resolve",
    "reject", "all", "allSettled", "race", "floor", "ceil", "round", "random", "max", "min", "abs",
];

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn object(entries: Vec<(&str, Value)>) -> Value {
    Value::object(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

fn number(n: usize) -> Value {
    #[allow(clippy::cast_precision_loss)]
    let n = n as f64;
    Value::Number(n)
}

/// A native function carrying static members, e.g. `Promise.resolve`.
fn constructor(
    name: &str,
    call: impl Fn(&mut Interpreter, &Value, Vec<Value>) -> Result<Value, Unwind> + 'static,
    statics: Vec<(&str, Value)>,
) -> Value {
    Value::Function(Rc::new(Function {
        name: name.to_string(),
        kind: FunctionKind::Native(Rc::new(call)),
        properties: RefCell::new(
            statics
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        ),
    }))
}

/// Resolve a possibly negative relative index against `len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    #[allow(clippy::cast_precision_loss)]
    let len_f = len as f64;
    let resolved = if n < 0.0 { (len_f + n).max(0.0) } else { n.min(len_f) };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let resolved = resolved as usize;
    resolved
}

fn expect_function(value: &Value, what: &str) -> Result<(), Unwind> {
    if matches!(value, Value::Function(_)) {
        Ok(())
    } else {
        Err(Unwind::type_error(format!(
            "{} is not a function",
            if what.is_empty() {
                value.to_js_string()
            } else {
                what.to_string()
            }
        )))
    }
}

pub fn install(globals: &Scope) {
    let console = Value::object(
        LogLevel::ALL
            .iter()
            .map(|&level| {
                let method = Value::native(level.method(), move |interp, _this, args| {
                    interp.emit(level, join_values(&args, " "))?;
                    Ok(Value::Undefined)
                });
                (level.method().to_string(), method)
            })
            .collect(),
    );
    globals.declare("console", console, true);
    globals.declare("fetch", Value::native("fetch", fetch), true);

    for name in [
        "Error",
        "TypeError",
        "RangeError",
        "SyntaxError",
        "ReferenceError",
    ] {
        let error = Value::native(name, move |_interp, _this, args| {
            let message = match args.first() {
                None | Some(Value::Undefined) => String::new(),
                Some(value) => value.to_js_string(),
            };
            Ok(Value::error(name, &message))
        });
        globals.declare(name, error, true);
    }

    globals.declare("JSON", json_object(), true);
    globals.declare("Math", math_object(), true);
    install_conversions(globals);
    install_collections(globals);
    globals.declare("Promise", promise_constructor(), true);
    globals.declare("NaN", Value::Number(f64::NAN), true);
    globals.declare("Infinity", Value::Number(f64::INFINITY), true);
}

fn fetch(interp: &mut Interpreter, _this: &Value, args: Vec<Value>) -> Result<Value, Unwind> {
    let mut request = FetchRequest::get(arg(&args, 0).to_js_string());
    if let Value::Object(init) = arg(&args, 1) {
        let init = init.borrow();
        if let Some(method) = init.get("method") {
            request.method = method.to_js_string().to_uppercase();
        }
        if let Some(Value::Object(headers)) = init.get("headers") {
            request.headers = headers
                .borrow()
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.to_js_string()))
                .collect();
        }
        if let Some(body) = init.get("body") {
            if !body.is_nullish() {
                request.body = Some(body.to_js_string());
            }
        }
    }

    debug!(url = %request.url, method = %request.method, "fetch.request");
    let state = match interp.fetch(&request) {
        Ok(response) => {
            debug!(url = %request.url, status = response.status, "fetch.response");
            PromiseState::Fulfilled(response_object(response))
        }
        Err(err) => {
            warn!(url = %request.url, error = %err, "fetch.failed");
            PromiseState::Rejected(Value::error("TypeError", "Failed to fetch"))
        }
    };
    Ok(Value::promise(state))
}

/// Build the object a `fetch` promise resolves to.
pub fn response_object(response: FetchResponse) -> Value {
    let body: Rc<str> = Rc::from(response.body.as_str());
    let headers = Rc::new(response.headers.clone());

    let header_get = {
        let headers = Rc::clone(&headers);
        Value::native("get", move |_interp, _this, args| {
            let name = arg(&args, 0).to_js_string();
            Ok(headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&name))
                .map_or(Value::Null, |(_, v)| Value::from(v.as_str())))
        })
    };
    let header_has = {
        let headers = Rc::clone(&headers);
        Value::native("has", move |_interp, _this, args| {
            let name = arg(&args, 0).to_js_string();
            Ok(Value::Bool(
                headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(&name)),
            ))
        })
    };
    let text = {
        let body = Rc::clone(&body);
        Value::native("text", move |_interp, _this, _args| {
            Ok(Value::promise(PromiseState::Fulfilled(Value::Str(
                Rc::clone(&body),
            ))))
        })
    };
    let json = Value::native("json", move |_interp, _this, _args| {
        let state = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(parsed) => PromiseState::Fulfilled(Value::from_json(&parsed)),
            Err(err) => PromiseState::Rejected(Value::error("SyntaxError", &err.to_string())),
        };
        Ok(Value::promise(state))
    });

    let ok = response.ok();
    object(vec![
        ("status", Value::Number(f64::from(response.status))),
        ("ok", Value::Bool(ok)),
        ("statusText", Value::from(response.status_text)),
        ("url", Value::from(response.url)),
        (
            "headers",
            object(vec![("get", header_get), ("has", header_has)]),
        ),
        ("text", text),
        ("json", json),
    ])
}

fn json_object() -> Value {
    let stringify = Value::native("stringify", |_interp, _this, args| {
        let json = match arg(&args, 0).to_json() {
            Ok(Some(json)) => json,
            Ok(None) => return Ok(Value::Undefined),
            Err(CircularStructure) => {
                return Err(Unwind::type_error("Converting circular structure to JSON"));
            }
        };
        let indent = match arg(&args, 2) {
            Value::Number(n) if n >= 1.0 => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let width = n.min(10.0) as usize;
                " ".repeat(width)
            }
            Value::Str(s) => s.chars().take(10).collect(),
            _ => String::new(),
        };
        if indent.is_empty() {
            return Ok(Value::from(json.to_string()));
        }
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        json.serialize(&mut serializer)
            .map_err(|err| Unwind::type_error(err.to_string()))?;
        Ok(Value::from(String::from_utf8_lossy(&buf).into_owned()))
    });
    let parse = Value::native("parse", |_interp, _this, args| {
        let text = arg(&args, 0).to_js_string();
        serde_json::from_str::<serde_json::Value>(&text)
            .map(|json| Value::from_json(&json))
            .map_err(|err| Unwind::error("SyntaxError", err.to_string()))
    });
    object(vec![("stringify", stringify), ("parse", parse)])
}

fn math_unary(name: &'static str, f: fn(f64) -> f64) -> (&'static str, Value) {
    (
        name,
        Value::native(name, move |_interp, _this, args| {
            Ok(Value::Number(f(arg(&args, 0).to_number())))
        }),
    )
}

/// `Math.round`: halves round towards positive infinity.
fn js_round(n: f64) -> f64 {
    if n.is_finite() { (n + 0.5).floor() } else { n }
}

fn random_unit() -> f64 {
    let bits = RandomState::new().hash_one(0u8);
    #[allow(clippy::cast_precision_loss)]
    let unit = (bits >> 11) as f64 / (1u64 << 53) as f64;
    unit
}

fn math_object() -> Value {
    let mut entries = vec![
        ("PI", Value::Number(std::f64::consts::PI)),
        ("E", Value::Number(std::f64::consts::E)),
        math_unary("abs", f64::abs),
        math_unary("floor", f64::floor),
        math_unary("ceil", f64::ceil),
        math_unary("round", js_round),
        math_unary("trunc", f64::trunc),
        math_unary("sign", |n| if n == 0.0 || n.is_nan() { n } else { n.signum() }),
        math_unary("sqrt", f64::sqrt),
        math_unary("cbrt", f64::cbrt),
        math_unary("log", f64::ln),
        math_unary("log10", f64::log10),
        math_unary("log2", f64::log2),
        math_unary("exp", f64::exp),
        math_unary("sin", f64::sin),
        math_unary("cos", f64::cos),
        math_unary("tan", f64::tan),
    ];
    entries.push((
        "pow",
        Value::native("pow", |_interp, _this, args| {
            Ok(Value::Number(
                arg(&args, 0).to_number().powf(arg(&args, 1).to_number()),
            ))
        }),
    ));
    entries.push((
        "atan2",
        Value::native("atan2", |_interp, _this, args| {
            Ok(Value::Number(
                arg(&args, 0).to_number().atan2(arg(&args, 1).to_number()),
            ))
        }),
    ));
    entries.push((
        "max",
        Value::native("max", |_interp, _this, args| {
            let mut best = f64::NEG_INFINITY;
            for n in args.iter().map(Value::to_number) {
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                best = best.max(n);
            }
            Ok(Value::Number(best))
        }),
    ));
    entries.push((
        "min",
        Value::native("min", |_interp, _this, args| {
            let mut best = f64::INFINITY;
            for n in args.iter().map(Value::to_number) {
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                best = best.min(n);
            }
            Ok(Value::Number(best))
        }),
    ));
    entries.push((
        "random",
        Value::native("random", |_interp, _this, _args| {
            Ok(Value::Number(random_unit()))
        }),
    ));
    object(entries)
}

/// `parseInt` with optional radix; parses the longest valid prefix.
pub fn parse_int(text: &str, radix: Option<u32>) -> f64 {
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if negative || s.starts_with('+') {
        s = &s[1..];
    }
    let mut radix = radix.unwrap_or(10);
    if (radix == 16 || radix == 0) && (s.starts_with("0x") || s.starts_with("0X")) {
        s = &s[2..];
        radix = 16;
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut result: Option<f64> = None;
    for c in s.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        result = Some(result.unwrap_or(0.0) * f64::from(radix) + f64::from(digit));
    }
    match result {
        Some(n) if negative => -n,
        Some(n) => n,
        None => f64::NAN,
    }
}

/// `parseFloat`: the longest prefix that reads as a decimal number.
pub fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    for candidate in ["Infinity", "+Infinity"] {
        if s.starts_with(candidate) {
            return f64::INFINITY;
        }
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut best = None;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut seen_digit = false;
    while end < bytes.len() {
        let c = bytes[end];
        match c {
            b'0'..=b'9' => seen_digit = true,
            b'+' | b'-' if end == 0 || matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
        if seen_digit {
            if let Ok(n) = s[..end].parse::<f64>() {
                best = Some(n);
            }
        }
    }
    best.unwrap_or(f64::NAN)
}

fn install_conversions(globals: &Scope) {
    let string = constructor(
        "String",
        |_interp, _this, args| {
            Ok(args
                .first()
                .map_or_else(|| Value::from(""), |v| Value::from(v.to_js_string())))
        },
        Vec::new(),
    );
    globals.declare("String", string, true);

    let number = constructor(
        "Number",
        |_interp, _this, args| {
            Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
        },
        vec![
            (
                "isInteger",
                Value::native("isInteger", |_interp, _this, args| {
                    Ok(Value::Bool(matches!(
                        arg(&args, 0),
                        Value::Number(n) if n.is_finite() && n.fract() == 0.0
                    )))
                }),
            ),
            (
                "isFinite",
                Value::native("isFinite", |_interp, _this, args| {
                    Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite())))
                }),
            ),
            ("MAX_SAFE_INTEGER", Value::Number(9_007_199_254_740_991.0)),
            ("MIN_SAFE_INTEGER", Value::Number(-9_007_199_254_740_991.0)),
            ("EPSILON", Value::Number(f64::EPSILON)),
        ],
    );
    globals.declare("Number", number, true);

    let boolean = Value::native("Boolean", |_interp, _this, args| {
        Ok(Value::Bool(arg(&args, 0).is_truthy()))
    });
    globals.declare("Boolean", boolean, true);

    globals.declare(
        "parseInt",
        Value::native("parseInt", |_interp, _this, args| {
            let radix = match arg(&args, 1) {
                Value::Undefined => None,
                value => {
                    let n = value.to_number();
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let radix = if n.is_nan() { 0 } else { n as u32 };
                    Some(radix)
                }
            };
            Ok(Value::Number(parse_int(&arg(&args, 0).to_js_string(), radix)))
        }),
        true,
    );
    globals.declare(
        "parseFloat",
        Value::native("parseFloat", |_interp, _this, args| {
            Ok(Value::Number(parse_float(&arg(&args, 0).to_js_string())))
        }),
        true,
    );
    globals.declare(
        "isNaN",
        Value::native("isNaN", |_interp, _this, args| {
            Ok(Value::Bool(arg(&args, 0).to_number().is_nan()))
        }),
        true,
    );
    globals.declare(
        "isFinite",
        Value::native("isFinite", |_interp, _this, args| {
            Ok(Value::Bool(arg(&args, 0).to_number().is_finite()))
        }),
        true,
    );
}

/// Own enumerable `(key, value)` pairs of objects and arrays.
fn own_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(obj) => obj.borrow().properties.clone(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::from(c.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn install_collections(globals: &Scope) {
    let object_ctor = constructor(
        "Object",
        |_interp, _this, args| {
            Ok(match arg(&args, 0) {
                value @ (Value::Object(_) | Value::Array(_) | Value::Function(_)) => value,
                _ => Value::object(Vec::new()),
            })
        },
        vec![
            (
                "keys",
                Value::native("keys", |_interp, _this, args| {
                    Ok(Value::array(
                        own_entries(&arg(&args, 0))
                            .into_iter()
                            .map(|(k, _)| Value::from(k))
                            .collect(),
                    ))
                }),
            ),
            (
                "values",
                Value::native("values", |_interp, _this, args| {
                    Ok(Value::array(
                        own_entries(&arg(&args, 0))
                            .into_iter()
                            .map(|(_, v)| v)
                            .collect(),
                    ))
                }),
            ),
            (
                "entries",
                Value::native("entries", |_interp, _this, args| {
                    Ok(Value::array(
                        own_entries(&arg(&args, 0))
                            .into_iter()
                            .map(|(k, v)| Value::array(vec![Value::from(k), v]))
                            .collect(),
                    ))
                }),
            ),
            (
                "assign",
                Value::native("assign", |_interp, _this, args| {
                    let target = arg(&args, 0);
                    for source in args.iter().skip(1) {
                        for (key, value) in own_entries(source) {
                            Interpreter::set_property(&target, &key, value)?;
                        }
                    }
                    Ok(target)
                }),
            ),
            (
                "fromEntries",
                Value::native("fromEntries", |interp, _this, args| {
                    let result = Value::object(Vec::new());
                    if let Value::Array(pairs) = arg(&args, 0) {
                        let pairs = pairs.borrow().clone();
                        for pair in pairs {
                            let key = interp.get_property(&pair, "0")?.to_property_key();
                            let value = interp.get_property(&pair, "1")?;
                            Interpreter::set_property(&result, &key, value)?;
                        }
                    }
                    Ok(result)
                }),
            ),
        ],
    );
    globals.declare("Object", object_ctor, true);

    let array_ctor = constructor(
        "Array",
        |_interp, _this, args| {
            if let [Value::Number(n)] = args.as_slice() {
                if *n < 0.0 || n.fract() != 0.0 || *n > 1_000_000.0 {
                    return Err(Unwind::range_error("Invalid array length"));
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let len = *n as usize;
                return Ok(Value::array(vec![Value::Undefined; len]));
            }
            Ok(Value::array(args))
        },
        vec![
            (
                "isArray",
                Value::native("isArray", |_interp, _this, args| {
                    Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_))))
                }),
            ),
            (
                "of",
                Value::native("of", |_interp, _this, args| Ok(Value::array(args))),
            ),
            (
                "from",
                Value::native("from", |interp, _this, args| {
                    let source = arg(&args, 0);
                    let items: Vec<Value> = match &source {
                        Value::Array(items) => items.borrow().clone(),
                        Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
                        Value::Object(_) => {
                            let len = interp.get_property(&source, "length")?.to_number();
                            let len = if len.is_finite() && len > 0.0 {
                                len.min(1_000_000.0)
                            } else {
                                0.0
                            };
                            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                            let len = len as usize;
                            let mut items = Vec::with_capacity(len);
                            for i in 0..len {
                                items.push(interp.get_property(&source, &i.to_string())?);
                            }
                            items
                        }
                        _ => Vec::new(),
                    };
                    let mapper = arg(&args, 1);
                    if matches!(mapper, Value::Function(_)) {
                        let mut mapped = Vec::with_capacity(items.len());
                        for (i, item) in items.into_iter().enumerate() {
                            mapped.push(interp.call_function(
                                &mapper,
                                &Value::Undefined,
                                vec![item, number(i)],
                            )?);
                        }
                        return Ok(Value::array(mapped));
                    }
                    Ok(Value::array(items))
                }),
            ),
        ],
    );
    globals.declare("Array", array_ctor, true);
}

fn promise_constructor() -> Value {
    let all = Value::native("all", |_interp, _this, args| {
        let Value::Array(items) = arg(&args, 0) else {
            return Err(Unwind::type_error("Promise.all expects an array"));
        };
        let items = items.borrow().clone();
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item.promise_state() {
                Some(PromiseState::Rejected(reason)) => {
                    return Ok(Value::promise(PromiseState::Rejected(reason)));
                }
                Some(PromiseState::Fulfilled(value)) => values.push(value),
                None => values.push(item),
            }
        }
        Ok(Value::promise(PromiseState::Fulfilled(Value::array(values))))
    });
    let all_settled = Value::native("allSettled", |_interp, _this, args| {
        let Value::Array(items) = arg(&args, 0) else {
            return Err(Unwind::type_error("Promise.allSettled expects an array"));
        };
        let items = items.borrow().clone();
        let outcomes = items
            .into_iter()
            .map(|item| match item.promise_state() {
                Some(PromiseState::Rejected(reason)) => object(vec![
                    ("status", Value::from("rejected")),
                    ("reason", reason),
                ]),
                Some(PromiseState::Fulfilled(value)) => object(vec![
                    ("status", Value::from("fulfilled")),
                    ("value", value),
                ]),
                None => object(vec![("status", Value::from("fulfilled")), ("value", item)]),
            })
            .collect();
        Ok(Value::promise(PromiseState::Fulfilled(Value::array(
            outcomes,
        ))))
    });
    let race = Value::native("race", |_interp, _this, args| {
        let Value::Array(items) = arg(&args, 0) else {
            return Err(Unwind::type_error("Promise.race expects an array"));
        };
        let first = items.borrow().first().cloned();
        Ok(match first {
            Some(item) if item.promise_state().is_some() => item,
            Some(item) => Value::promise(PromiseState::Fulfilled(item)),
            None => Value::promise(PromiseState::Fulfilled(Value::Undefined)),
        })
    });

    constructor(
        "Promise",
        |interp, _this, args| {
            let executor = arg(&args, 0);
            expect_function(&executor, "Promise resolver")?;
            let state: Rc<RefCell<Option<PromiseState>>> = Rc::new(RefCell::new(None));
            let resolve = {
                let state = Rc::clone(&state);
                Value::native("resolve", move |_interp, _this, args| {
                    let mut state = state.borrow_mut();
                    if state.is_none() {
                        let value = arg(&args, 0);
                        *state = Some(
                            value
                                .promise_state()
                                .unwrap_or(PromiseState::Fulfilled(value)),
                        );
                    }
                    Ok(Value::Undefined)
                })
            };
            let reject = {
                let state = Rc::clone(&state);
                Value::native("reject", move |_interp, _this, args| {
                    let mut state = state.borrow_mut();
                    if state.is_none() {
                        *state = Some(PromiseState::Rejected(arg(&args, 0)));
                    }
                    Ok(Value::Undefined)
                })
            };
            match interp.call_function(&executor, &Value::Undefined, vec![resolve, reject]) {
                Ok(_) => {}
                Err(Unwind::Throw(reason)) => {
                    let mut state = state.borrow_mut();
                    if state.is_none() {
                        *state = Some(PromiseState::Rejected(reason));
                    }
                }
                Err(Unwind::Interrupted) => return Err(Unwind::Interrupted),
            }
            let settled = state.borrow_mut().take();
            Ok(Value::promise(settled.unwrap_or_else(|| {
                PromiseState::Rejected(Value::error(
                    "Error",
                    "Promise executor did not settle synchronously",
                ))
            })))
        },
        vec![
            (
                "resolve",
                Value::native("resolve", |_interp, _this, args| {
                    let value = arg(&args, 0);
                    Ok(if value.promise_state().is_some() {
                        value
                    } else {
                        Value::promise(PromiseState::Fulfilled(value))
                    })
                }),
            ),
            (
                "reject",
                Value::native("reject", |_interp, _this, args| {
                    Ok(Value::promise(PromiseState::Rejected(arg(&args, 0))))
                }),
            ),
            ("all", all),
            ("allSettled", all_settled),
            ("race", race),
        ],
    )
}

// --- Methods on built-in types ---

fn this_string(this: &Value) -> String {
    this.to_js_string()
}

fn char_slice(chars: &[char], start: usize, end: usize) -> String {
    if start >= end {
        return String::new();
    }
    chars[start..end.min(chars.len())].iter().collect()
}

fn pad(this: &Value, args: &[Value], at_start: bool) -> Value {
    let s = this_string(this);
    let target = arg(args, 0).to_number();
    let filler = match arg(args, 1) {
        Value::Undefined => " ".to_string(),
        value => value.to_js_string(),
    };
    let current = s.chars().count();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let target = if target.is_finite() && target > 0.0 {
        target.min(1_000_000.0) as usize
    } else {
        0
    };
    if target <= current || filler.is_empty() {
        return Value::from(s);
    }
    let padding: String = filler.chars().cycle().take(target - current).collect();
    Value::from(if at_start {
        padding + &s
    } else {
        s + &padding
    })
}

/// Apply a string `replace` with a string or function replacement.
fn replace_matches(
    interp: &mut Interpreter,
    this: &Value,
    args: &[Value],
    all: bool,
) -> Result<Value, Unwind> {
    let s = this_string(this);
    let pattern = arg(args, 0).to_js_string();
    let replacement = arg(args, 1);
    let mut out = String::new();
    let mut rest_start = 0;
    let mut search_from = 0;
    while let Some(found) = s[search_from..].find(&pattern) {
        let at = search_from + found;
        out.push_str(&s[rest_start..at]);
        let replaced = if matches!(replacement, Value::Function(_)) {
            interp
                .call_function(
                    &replacement,
                    &Value::Undefined,
                    vec![
                        Value::from(pattern.as_str()),
                        number(s[..at].chars().count()),
                        Value::from(s.as_str()),
                    ],
                )?
                .to_js_string()
        } else {
            replacement.to_js_string()
        };
        out.push_str(&replaced);
        rest_start = at + pattern.len();
        if !all {
            break;
        }
        search_from = if pattern.is_empty() {
            match s[rest_start..].chars().next() {
                Some(c) => {
                    out.push(c);
                    rest_start += c.len_utf8();
                    rest_start
                }
                None => break,
            }
        } else {
            rest_start
        };
        if search_from > s.len() {
            break;
        }
    }
    out.push_str(&s[rest_start.min(s.len())..]);
    Ok(Value::from(out))
}

pub fn string_method(name: &str) -> Option<Value> {
    let method = match name {
        "toUpperCase" => Value::native(name, |_i, this, _args| {
            Ok(Value::from(this_string(this).to_uppercase()))
        }),
        "toLowerCase" => Value::native(name, |_i, this, _args| {
            Ok(Value::from(this_string(this).to_lowercase()))
        }),
        "trim" => Value::native(name, |_i, this, _args| {
            Ok(Value::from(this_string(this).trim()))
        }),
        "trimStart" => Value::native(name, |_i, this, _args| {
            Ok(Value::from(this_string(this).trim_start()))
        }),
        "trimEnd" => Value::native(name, |_i, this, _args| {
            Ok(Value::from(this_string(this).trim_end()))
        }),
        "includes" => Value::native(name, |_i, this, args| {
            let needle = arg(&args, 0).to_js_string();
            Ok(Value::Bool(this_string(this).contains(&needle)))
        }),
        "startsWith" => Value::native(name, |_i, this, args| {
            let needle = arg(&args, 0).to_js_string();
            Ok(Value::Bool(this_string(this).starts_with(&needle)))
        }),
        "endsWith" => Value::native(name, |_i, this, args| {
            let needle = arg(&args, 0).to_js_string();
            Ok(Value::Bool(this_string(this).ends_with(&needle)))
        }),
        "indexOf" | "lastIndexOf" => {
            let last = name == "lastIndexOf";
            Value::native(name, move |_i, this, args| {
                let s = this_string(this);
                let needle = arg(&args, 0).to_js_string();
                let found = if last { s.rfind(&needle) } else { s.find(&needle) };
                Ok(found.map_or(Value::Number(-1.0), |at| number(s[..at].chars().count())))
            })
        }
        "slice" => Value::native(name, |_i, this, args| {
            let chars: Vec<char> = this_string(this).chars().collect();
            let start = relative_index(&arg(&args, 0), chars.len(), 0);
            let end = relative_index(&arg(&args, 1), chars.len(), chars.len());
            Ok(Value::from(char_slice(&chars, start, end)))
        }),
        "substring" => Value::native(name, |_i, this, args| {
            let chars: Vec<char> = this_string(this).chars().collect();
            let clamp = |value: &Value, default: usize| match value {
                Value::Undefined => default,
                value => {
                    let n = value.to_number();
                    #[allow(
                        clippy::cast_possible_truncation,
                        clippy::cast_sign_loss,
                        clippy::cast_precision_loss
                    )]
                    let n = if n.is_nan() { 0 } else { n.clamp(0.0, chars.len() as f64) as usize };
                    n
                }
            };
            let a = clamp(&arg(&args, 0), 0);
            let b = clamp(&arg(&args, 1), chars.len());
            Ok(Value::from(char_slice(&chars, a.min(b), a.max(b))))
        }),
        "split" => Value::native(name, |_i, this, args| {
            let s = this_string(this);
            let parts: Vec<Value> = match arg(&args, 0) {
                Value::Undefined => vec![Value::from(s)],
                sep => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    }
                }
            };
            let parts = match arg(&args, 1) {
                Value::Undefined => parts,
                limit => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let limit = limit.to_number().max(0.0) as usize;
                    parts.into_iter().take(limit).collect()
                }
            };
            Ok(Value::array(parts))
        }),
        "replace" => Value::native(name, |interp, this, args| {
            replace_matches(interp, this, &args, false)
        }),
        "replaceAll" => Value::native(name, |interp, this, args| {
            replace_matches(interp, this, &args, true)
        }),
        "repeat" => Value::native(name, |_i, this, args| {
            let count = arg(&args, 0).to_number();
            if count < 0.0 || count.is_infinite() {
                return Err(Unwind::range_error(format!(
                    "Invalid count value: {}",
                    format_number(count)
                )));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = if count.is_nan() { 0 } else { count as usize };
            let s = this_string(this);
            if s.len().saturating_mul(count) > 64 * 1024 * 1024 {
                return Err(Unwind::range_error("Invalid string length"));
            }
            Ok(Value::from(s.repeat(count)))
        }),
        "padStart" => Value::native(name, |_i, this, args| Ok(pad(this, &args, true))),
        "padEnd" => Value::native(name, |_i, this, args| Ok(pad(this, &args, false))),
        "charAt" | "at" => {
            let relative = name == "at";
            Value::native(name, move |_i, this, args| {
                let chars: Vec<char> = this_string(this).chars().collect();
                let n = arg(&args, 0).to_number();
                let n = if n.is_nan() { 0.0 } else { n.trunc() };
                #[allow(clippy::cast_precision_loss)]
                let index = if relative && n < 0.0 { chars.len() as f64 + n } else { n };
                if index < 0.0 {
                    return Ok(if relative { Value::Undefined } else { Value::from("") });
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let index = index as usize;
                Ok(chars.get(index).map_or_else(
                    || if relative { Value::Undefined } else { Value::from("") },
                    |c| Value::from(c.to_string()),
                ))
            })
        }
        "charCodeAt" => Value::native(name, |_i, this, args| {
            let units: Vec<u16> = this_string(this).encode_utf16().collect();
            let n = arg(&args, 0).to_number();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let index = if n.is_nan() || n < 0.0 { usize::MAX } else { n as usize };
            Ok(units
                .get(index)
                .map_or(Value::Number(f64::NAN), |u| Value::Number(f64::from(*u))))
        }),
        "concat" => Value::native(name, |_i, this, args| {
            let mut s = this_string(this);
            for value in &args {
                s.push_str(&value.to_js_string());
            }
            Ok(Value::from(s))
        }),
        _ => return common_method(name),
    };
    Some(method)
}

pub fn number_method(name: &str) -> Option<Value> {
    let method = match name {
        "toFixed" => Value::native(name, |_i, this, args| {
            let digits = arg(&args, 0).to_number();
            let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
            if !(0.0..=100.0).contains(&digits) {
                return Err(Unwind::range_error(
                    "toFixed() digits argument must be between 0 and 100",
                ));
            }
            let n = this.to_number();
            if !n.is_finite() || n.abs() >= 1e21 {
                return Ok(Value::from(format_number(n)));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let digits = digits as usize;
            Ok(Value::from(format!("{n:.digits$}")))
        }),
        "toString" => Value::native(name, |_i, this, args| {
            let radix = match arg(&args, 0) {
                Value::Undefined => 10.0,
                value => value.to_number(),
            };
            if !(2.0..=36.0).contains(&radix) {
                return Err(Unwind::range_error(
                    "toString() radix must be between 2 and 36",
                ));
            }
            let Value::Number(n) = this else {
                return Ok(Value::from(this.to_js_string()));
            };
            if (radix - 10.0).abs() < f64::EPSILON || !n.is_finite() || n.fract() != 0.0 {
                return Ok(Value::from(format_number(*n)));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let radix = radix as u32;
            Ok(Value::from(integer_to_radix(*n, radix)))
        }),
        _ => return common_method(name),
    };
    Some(method)
}

fn integer_to_radix(n: f64, radix: u32) -> String {
    let negative = n < 0.0;
    let mut value = n.abs();
    let mut digits = Vec::new();
    let radix_f = f64::from(radix);
    while value >= 1.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let digit = (value % radix_f) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        value = (value / radix_f).floor();
    }
    if digits.is_empty() {
        digits.push('0');
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Methods every value answers to.
fn common_method(name: &str) -> Option<Value> {
    match name {
        "toString" => Some(Value::native(name, |_i, this, _args| {
            Ok(Value::from(this.to_js_string()))
        })),
        "valueOf" => Some(Value::native(name, |_i, this, _args| Ok(this.clone()))),
        _ => None,
    }
}

pub fn object_method(name: &str) -> Option<Value> {
    match name {
        "hasOwnProperty" => Some(Value::native(name, |_i, this, args| {
            let key = arg(&args, 0).to_property_key();
            Ok(Value::Bool(
                own_entries(this).iter().any(|(k, _)| *k == key),
            ))
        })),
        _ => common_method(name),
    }
}

pub fn function_method(name: &str) -> Option<Value> {
    let method = match name {
        "call" => Value::native(name, |interp, this, args| {
            let mut args = args.into_iter();
            let this_arg = args.next().unwrap_or_default();
            interp.call_function(this, &this_arg, args.collect())
        }),
        "apply" => Value::native(name, |interp, this, args| {
            let this_arg = arg(&args, 0);
            let call_args = match arg(&args, 1) {
                Value::Array(items) => items.borrow().clone(),
                _ => Vec::new(),
            };
            interp.call_function(this, &this_arg, call_args)
        }),
        "bind" => Value::native(name, |_interp, this, args| {
            let target = this.clone();
            let mut args = args.into_iter();
            let bound_this = args.next().unwrap_or_default();
            let bound_args: Vec<Value> = args.collect();
            let name = match &target {
                Value::Function(f) => format!("bound {}", f.name),
                _ => "bound".to_string(),
            };
            Ok(Value::native(&name, move |interp, _this, args| {
                let mut all = bound_args.clone();
                all.extend(args);
                interp.call_function(&target, &bound_this, all)
            }))
        }),
        _ => return common_method(name),
    };
    Some(method)
}

fn this_array(this: &Value) -> Result<Rc<RefCell<ArrayItems>>, Unwind> {
    match this {
        Value::Array(items) => Ok(Rc::clone(items)),
        other => Err(Unwind::type_error(format!(
            "{} is not an array",
            other.to_js_string()
        ))),
    }
}

/// Call `callback(item, index, array)` for each element of a snapshot.
fn for_each_item(
    interp: &mut Interpreter,
    this: &Value,
    callback: &Value,
    mut visit: impl FnMut(usize, &Value, Value) -> bool,
) -> Result<(), Unwind> {
    expect_function(callback, "")?;
    let items = this_array(this)?.borrow().clone();
    for (i, item) in items.into_iter().enumerate() {
        let result = interp.call_function(
            callback,
            &Value::Undefined,
            vec![item.clone(), number(i), this.clone()],
        )?;
        if !visit(i, &item, result) {
            break;
        }
    }
    Ok(())
}

fn default_sort_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Undefined, _) => Ordering::Greater,
        (_, Value::Undefined) => Ordering::Less,
        _ => a.to_js_string().cmp(&b.to_js_string()),
    }
}

/// Stable merge sort driven by a fallible "a sorts after b" predicate.
/// User comparators need not be consistent, so `slice::sort_by` is avoided.
fn merge_sort(
    items: Vec<Value>,
    after: &mut impl FnMut(&Value, &Value) -> Result<bool, Unwind>,
) -> Result<Vec<Value>, Unwind> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, after)?;
    let right = merge_sort(right, after)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => after(a, b)?,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    Ok(merged)
}

fn flatten_into(
    items: &[Value],
    depth: f64,
    level: usize,
    out: &mut Vec<Value>,
) -> Result<(), Unwind> {
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => {
                // A self-containing array flattened with `Infinity` never bottoms out.
                if level >= MAX_NESTING {
                    return Err(Unwind::range_error("Maximum call stack size exceeded"));
                }
                let inner = inner.borrow().clone();
                flatten_into(&inner, depth - 1.0, level + 1, out)?;
            }
            other => out.push(other.clone()),
        }
    }
    Ok(())
}

pub fn array_method(name: &str) -> Option<Value> {
    let method = match name {
        "push" => Value::native(name, |_i, this, args| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            items.extend(args);
            Ok(number(items.len()))
        }),
        "pop" => Value::native(name, |_i, this, _args| {
            Ok(this_array(this)?.borrow_mut().pop().unwrap_or_default())
        }),
        "shift" => Value::native(name, |_i, this, _args| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            Ok(if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            })
        }),
        "unshift" => Value::native(name, |_i, this, args| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            items.splice(0..0, args);
            Ok(number(items.len()))
        }),
        "slice" => Value::native(name, |_i, this, args| {
            let items = this_array(this)?.borrow().clone();
            let start = relative_index(&arg(&args, 0), items.len(), 0);
            let end = relative_index(&arg(&args, 1), items.len(), items.len());
            Ok(Value::array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }),
        "splice" => Value::native(name, |_i, this, args| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            let len = items.len();
            let start = relative_index(&arg(&args, 0), len, 0);
            let delete_count = match args.get(1) {
                None => len - start,
                Some(value) => {
                    let n = value.to_number();
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let n = if n.is_nan() || n < 0.0 { 0 } else { n.min(1e9) as usize };
                    n.min(len - start)
                }
            };
            let inserted: Vec<Value> = args.into_iter().skip(2).collect();
            let removed: Vec<Value> = items.splice(start..start + delete_count, inserted).collect();
            Ok(Value::array(removed))
        }),
        "concat" => Value::native(name, |_i, this, args| {
            let mut items = this_array(this)?.borrow().clone();
            for value in args {
                match value {
                    Value::Array(more) => items.extend(more.borrow().iter().cloned()),
                    other => items.push(other),
                }
            }
            Ok(Value::array(items))
        }),
        "join" => Value::native(name, |_i, this, args| {
            let separator = match arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                value => value.to_js_string(),
            };
            let items = this_array(this)?.borrow().clone();
            Ok(Value::from(join_values(&items, &separator)))
        }),
        "reverse" => Value::native(name, |_i, this, _args| {
            this_array(this)?.borrow_mut().reverse();
            Ok(this.clone())
        }),
        "indexOf" => Value::native(name, |_i, this, args| {
            let needle = arg(&args, 0);
            let items = this_array(this)?.borrow().clone();
            Ok(items
                .iter()
                .position(|v| v.strict_equals(&needle))
                .map_or(Value::Number(-1.0), number))
        }),
        "includes" => Value::native(name, |_i, this, args| {
            let needle = arg(&args, 0);
            let items = this_array(this)?.borrow().clone();
            Ok(Value::Bool(items.iter().any(|v| {
                v.strict_equals(&needle)
                    || matches!((v, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
            })))
        }),
        "find" | "findIndex" => {
            let want_index = name == "findIndex";
            Value::native(name, move |interp, this, args| {
                let mut found = None;
                for_each_item(interp, this, &arg(&args, 0), |i, item, result| {
                    if result.is_truthy() {
                        found = Some((i, item.clone()));
                        false
                    } else {
                        true
                    }
                })?;
                Ok(match (found, want_index) {
                    (Some((i, _)), true) => number(i),
                    (None, true) => Value::Number(-1.0),
                    (Some((_, item)), false) => item,
                    (None, false) => Value::Undefined,
                })
            })
        }
        "filter" => Value::native(name, |interp, this, args| {
            let mut kept = Vec::new();
            for_each_item(interp, this, &arg(&args, 0), |_, item, result| {
                if result.is_truthy() {
                    kept.push(item.clone());
                }
                true
            })?;
            Ok(Value::array(kept))
        }),
        "map" => Value::native(name, |interp, this, args| {
            let mut mapped = Vec::new();
            for_each_item(interp, this, &arg(&args, 0), |_, _, result| {
                mapped.push(result);
                true
            })?;
            Ok(Value::array(mapped))
        }),
        "forEach" => Value::native(name, |interp, this, args| {
            for_each_item(interp, this, &arg(&args, 0), |_, _, _| true)?;
            Ok(Value::Undefined)
        }),
        "some" => Value::native(name, |interp, this, args| {
            let mut any = false;
            for_each_item(interp, this, &arg(&args, 0), |_, _, result| {
                any = result.is_truthy();
                !any
            })?;
            Ok(Value::Bool(any))
        }),
        "every" => Value::native(name, |interp, this, args| {
            let mut all = true;
            for_each_item(interp, this, &arg(&args, 0), |_, _, result| {
                all = result.is_truthy();
                all
            })?;
            Ok(Value::Bool(all))
        }),
        "reduce" => Value::native(name, |interp, this, args| {
            let callback = arg(&args, 0);
            expect_function(&callback, "")?;
            let items = this_array(this)?.borrow().clone();
            let mut iter = items.into_iter().enumerate();
            let mut acc = if args.len() >= 2 {
                arg(&args, 1)
            } else {
                match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(Unwind::type_error(
                            "Reduce of empty array with no initial value",
                        ));
                    }
                }
            };
            for (i, item) in iter {
                acc = interp.call_function(
                    &callback,
                    &Value::Undefined,
                    vec![acc, item, number(i), this.clone()],
                )?;
            }
            Ok(acc)
        }),
        "sort" => Value::native(name, |interp, this, args| {
            let comparator = arg(&args, 0);
            let items = this_array(this)?;
            let mut sorted = items.borrow().clone();
            if matches!(comparator, Value::Function(_)) {
                sorted = merge_sort(sorted, &mut |a, b| {
                    let result = interp.call_function(
                        &comparator,
                        &Value::Undefined,
                        vec![a.clone(), b.clone()],
                    )?;
                    Ok(result.to_number() > 0.0)
                })?;
            } else {
                sorted.sort_by(default_sort_order);
            }
            **items.borrow_mut() = sorted;
            Ok(this.clone())
        }),
        "flat" => Value::native(name, |_i, this, args| {
            let depth = match arg(&args, 0) {
                Value::Undefined => 1.0,
                value => value.to_number(),
            };
            let items = this_array(this)?.borrow().clone();
            let mut out = Vec::new();
            flatten_into(&items, depth, 0, &mut out)?;
            Ok(Value::array(out))
        }),
        "at" => Value::native(name, |_i, this, args| {
            let items = this_array(this)?.borrow().clone();
            let n = arg(&args, 0).to_number();
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            #[allow(clippy::cast_precision_loss)]
            let index = if n < 0.0 { items.len() as f64 + n } else { n };
            if index < 0.0 {
                return Ok(Value::Undefined);
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let index = index as usize;
            Ok(items.get(index).cloned().unwrap_or_default())
        }),
        "fill" => Value::native(name, |_i, this, args| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            let len = items.len();
            let start = relative_index(&arg(&args, 1), len, 0);
            let end = relative_index(&arg(&args, 2), len, len);
            let value = arg(&args, 0);
            for slot in items.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
            drop(items);
            Ok(this.clone())
        }),
        _ => return common_method(name),
    };
    Some(method)
}

/// Run a `then`/`catch` handler against a settled state.
fn run_handler(
    interp: &mut Interpreter,
    handler: &Value,
    input: Value,
    passthrough: PromiseState,
) -> Result<Value, Unwind> {
    if !matches!(handler, Value::Function(_)) {
        return Ok(Value::promise(passthrough));
    }
    settle(interp.call_function(handler, &Value::Undefined, vec![input]))
}

pub fn promise_method(name: &str) -> Option<Value> {
    let method = match name {
        "then" => Value::native(name, |interp, this, args| {
            match this.promise_state() {
                Some(PromiseState::Fulfilled(value)) => run_handler(
                    interp,
                    &arg(&args, 0),
                    value.clone(),
                    PromiseState::Fulfilled(value),
                ),
                Some(PromiseState::Rejected(reason)) => run_handler(
                    interp,
                    &arg(&args, 1),
                    reason.clone(),
                    PromiseState::Rejected(reason),
                ),
                None => Err(Unwind::type_error("then called on a non-promise")),
            }
        }),
        "catch" => Value::native(name, |interp, this, args| match this.promise_state() {
            Some(PromiseState::Rejected(reason)) => run_handler(
                interp,
                &arg(&args, 0),
                reason.clone(),
                PromiseState::Rejected(reason),
            ),
            Some(PromiseState::Fulfilled(_)) => Ok(this.clone()),
            None => Err(Unwind::type_error("catch called on a non-promise")),
        }),
        "finally" => Value::native(name, |interp, this, args| {
            let callback = arg(&args, 0);
            if matches!(callback, Value::Function(_)) {
                match interp.call_function(&callback, &Value::Undefined, Vec::new()) {
                    Ok(_) => {}
                    Err(Unwind::Throw(reason)) => {
                        return Ok(Value::promise(PromiseState::Rejected(reason)));
                    }
                    Err(Unwind::Interrupted) => return Err(Unwind::Interrupted),
                }
            }
            Ok(this.clone())
        }),
        _ => return None,
    };
    Some(method)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::script::host::{BufferedConsole, FetchError, Fetcher};
    use crate::script::parser::{ParseMode, parse};

    struct CannedFetcher;

    impl Fetcher for CannedFetcher {
        fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            if request.url.contains("offline") {
                return Err(FetchError::Transport("connection refused".to_string()));
            }
            Ok(FetchResponse {
                status: 200,
                status_text: "OK".to_string(),
                url: request.url.clone(),
                headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                body: format!(r#"{{"method":"{}","items":[1,2,3]}}"#, request.method),
            })
        }
    }

    fn eval(source: &str) -> String {
        let mut interpreter =
            Interpreter::new(Box::new(BufferedConsole::default()), Arc::new(CannedFetcher));
        let program = parse(source, ParseMode::FunctionBody).unwrap();
        match interpreter.run_function_body(&program) {
            Ok(value) => value.to_js_string(),
            Err(err) => format!("Error: {}", err.message()),
        }
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval("return 'Hello'.toUpperCase()"), "HELLO");
        assert_eq!(eval("return '  pad '.trim().padStart(5, '*')"), "**pad");
        assert_eq!(eval("return 'a,b,,c'.split(',').length"), "4");
        assert_eq!(eval("return 'banana'.replaceAll('a', 'o')"), "bonono");
        assert_eq!(eval("return 'banana'.replace('a', x => x.toUpperCase())"), "bAnana");
        assert_eq!(eval("return 'abcdef'.slice(-3, -1)"), "de");
        assert_eq!(eval("return 'abcdef'.substring(4, 1)"), "bcd");
        assert_eq!(eval("return 'abc'.at(-1) + 'abc'.charAt(5)"), "c");
        assert_eq!(eval("return 'ab'.repeat(3)"), "ababab");
        assert_eq!(eval("return 'hello'.indexOf('l')"), "2");
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(eval("return [3, 1, 2].sort().join('-')"), "1-2-3");
        assert_eq!(eval("return [10, 9, 1].sort((a, b) => a - b).join()"), "1,9,10");
        assert_eq!(eval("return [10, 9, 1].sort().join()"), "1,10,9");
        assert_eq!(eval("return [1, 2, 3].map(x => x * 2).filter(x => x > 2).join()"), "4,6");
        assert_eq!(eval("return [1, 2, 3].reduce((a, b) => a + b, 0)"), "6");
        assert_eq!(eval("return [1, 2, 3].find(x => x > 1)"), "2");
        assert_eq!(eval("return [1, 2, 3].findIndex(x => x > 5)"), "-1");
        assert_eq!(eval("return [1, [2, [3]]].flat().length"), "3");
        assert_eq!(eval("const a = [1, 2, 3, 4]; a.splice(1, 2, 'x'); return a.join()"), "1,x,4");
        assert_eq!(eval("return [1, 2].some(x => x > 1) && [1, 2].every(x => x > 0)"), "true");
        assert_eq!(eval("return [NaN].includes(NaN)"), "true");
        assert_eq!(eval("return [].reduce((a, b) => a)"), "Error: Reduce of empty array with no initial value");
    }

    #[test]
    fn test_flat_on_self_containing_array_with_finite_depth() {
        assert_eq!(eval("const a = [1]; a.push(a); return a.flat(2).length"), "4");
    }

    #[test]
    fn test_json_round_trip() {
        assert_eq!(
            eval("return JSON.stringify({ b: 1, a: [true, null, 'x'], f: () => 1 })"),
            r#"{"b":1,"a":[true,null,"x"]}"#
        );
        assert_eq!(eval("return JSON.parse('{\"n\": 2.5}').n * 2"), "5");
        assert_eq!(eval("return JSON.stringify([1], null, 2)"), "[\n  1\n]");
        assert!(eval("return JSON.parse('{')").starts_with("Error: "));
        assert_eq!(
            eval("const o = {}; o.self = o; return JSON.stringify(o)"),
            "Error: Converting circular structure to JSON"
        );
    }

    #[test]
    fn test_math_and_conversions() {
        assert_eq!(eval("return Math.max(1, 5, 3) + Math.min()"), "Infinity");
        assert_eq!(eval("return Math.round(2.5) + Math.round(-2.5)"), "1");
        assert_eq!(eval("return parseInt('42px') + parseFloat('1.5e1x')"), "57");
        assert_eq!(eval("return parseInt('ff', 16)"), "255");
        assert_eq!(eval("return isNaN('abc')"), "true");
        assert_eq!(eval("return Number('12') + String(3) + Boolean('')"), "123false");
        assert_eq!(eval("return (3.14159).toFixed(2)"), "3.14");
        assert_eq!(eval("return (255).toString(16)"), "ff");
        assert_eq!(eval("const r = Math.random(); return r >= 0 && r < 1"), "true");
    }

    #[test]
    fn test_object_helpers() {
        assert_eq!(eval("return Object.keys({ a: 1, b: 2 }).join()"), "a,b");
        assert_eq!(eval("return Object.entries({ a: 1 })[0].join('=')"), "a=1");
        assert_eq!(eval("return Object.assign({}, { a: 1 }, { b: 2 }).b"), "2");
        assert_eq!(eval("return Array.isArray([]) && !Array.isArray({})"), "true");
        assert_eq!(eval("return ({ a: 1 }).hasOwnProperty('a')"), "true");
        assert_eq!(eval("return Array.from('abc').join('|')"), "a|b|c");
    }

    #[test]
    fn test_promise_chaining() {
        assert_eq!(
            eval("return await Promise.resolve(2).then(x => x * 3).then(x => x + 1)"),
            "7"
        );
        assert_eq!(
            eval("return await Promise.reject(new Error('no')).catch(e => e.message)"),
            "no"
        );
        assert_eq!(
            eval("return (await Promise.all([1, Promise.resolve(2)])).join()"),
            "1,2"
        );
        assert_eq!(
            eval("return await new Promise((resolve) => resolve('made'))"),
            "made"
        );
        assert_eq!(
            eval("await new Promise(() => {})"),
            "Error: Promise executor did not settle synchronously"
        );
    }

    #[test]
    fn test_fetch_response_object() {
        let source = "
            const res = await fetch('https://relay.test/?x', { method: 'post' })
            const data = await res.json()
            return [res.status, res.ok, res.headers.get('content-type'), data.method, data.items.length].join()
        ";
        assert_eq!(eval(source), "200,true,application/json,POST,3");
    }

    #[test]
    fn test_failed_fetch_rejects_with_type_error() {
        let source = "
            try { await fetch('https://offline.test') } catch (e) { return e.name + ': ' + e.message }
        ";
        assert_eq!(eval(source), "TypeError: Failed to fetch");
    }

    #[test]
    fn test_function_call_apply_bind() {
        assert_eq!(eval("function f(a) { return this.x + a } return f.call({ x: 1 }, 2)"), "3");
        assert_eq!(eval("function f(a, b) { return a + b } return f.apply(null, [2, 3])"), "5");
        assert_eq!(eval("function f(a, b) { return a * b } return f.bind(null, 4)(5)"), "20");
    }

    #[test]
    fn test_parse_int_edge_cases() {
        assert!(parse_int("", None).is_nan());
        assert!((parse_int("  -12.9", None) + 12.0).abs() < f64::EPSILON);
        assert!((parse_int("0x1A", None) - 26.0).abs() < f64::EPSILON);
        assert!(parse_float("abc").is_nan());
        assert!((parse_float(".5") - 0.5).abs() < f64::EPSILON);
    }
}
