//! Runtime values and JavaScript-style conversions.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use super::ast::FunctionDecl;
use super::interpreter::{Interpreter, Scope, Unwind};

/// Native function body: `(interpreter, this, args) -> result`.
pub type NativeFn = Rc<dyn Fn(&mut Interpreter, &Value, Vec<Value>) -> Result<Value, Unwind>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<ArrayItems>>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Function>),
}

/// Elements of an array value.
#[derive(Default)]
pub struct ArrayItems(Vec<Value>);

impl From<Vec<Value>> for ArrayItems {
    fn from(items: Vec<Value>) -> Self {
        Self(items)
    }
}

impl Deref for ArrayItems {
    type Target = Vec<Value>;

    fn deref(&self) -> &Vec<Value> {
        &self.0
    }
}

impl DerefMut for ArrayItems {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }
}

impl fmt::Debug for ArrayItems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl Drop for ArrayItems {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            release(mem::take(&mut self.0), Vec::new());
        }
    }
}

/// Settled promise state. Promises never stay pending: every producer
/// settles them before handing them to the snippet.
#[derive(Clone, Debug)]
pub enum PromiseState {
    Fulfilled(Value),
    Rejected(Value),
}

#[derive(Clone, Debug, Default)]
pub enum ObjectKind {
    #[default]
    Plain,
    Error,
    Promise(PromiseState),
}

/// Insertion-ordered property bag.
#[derive(Clone, Debug, Default)]
pub struct Object {
    pub kind: ObjectKind,
    pub properties: Vec<(String, Value)>,
}

impl Object {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.properties.push((key.to_string(), value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.properties.iter().position(|(k, _)| k == key)?;
        Some(self.properties.remove(idx).1)
    }

    /// Move every value this object holds out of it.
    fn take_values(&mut self) -> Vec<Value> {
        let mut values: Vec<Value> = mem::take(&mut self.properties)
            .into_iter()
            .map(|(_, value)| value)
            .collect();
        if let ObjectKind::Promise(PromiseState::Fulfilled(value) | PromiseState::Rejected(value)) =
            mem::take(&mut self.kind)
        {
            values.push(value);
        }
        values
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        let values = self.take_values();
        if !values.is_empty() {
            release(values, Vec::new());
        }
    }
}

/// Drop `values` and `scopes` without recursing into what they contain.
///
/// Arrays, objects, closures and scope frames that are about to be freed
/// are emptied onto a worklist first, so a chain nested millions of levels
/// deep is freed in a loop instead of on the native stack.
pub(crate) fn release(mut values: Vec<Value>, mut scopes: Vec<Scope>) {
    loop {
        if let Some(value) = values.pop() {
            match value {
                Value::Array(items) => {
                    if let Ok(cell) = Rc::try_unwrap(items) {
                        let mut items = cell.into_inner();
                        values.append(&mut items.0);
                    }
                }
                Value::Object(obj) => {
                    if let Ok(cell) = Rc::try_unwrap(obj) {
                        values.extend(cell.into_inner().take_values());
                    }
                }
                Value::Function(function) => {
                    if let Ok(function) = Rc::try_unwrap(function) {
                        let Function {
                            kind, properties, ..
                        } = function;
                        values.extend(properties.into_inner().into_iter().map(|(_, v)| v));
                        if let FunctionKind::Closure { env, .. } = kind {
                            scopes.push(env);
                        }
                    }
                }
                _ => {}
            }
        } else if let Some(scope) = scopes.pop() {
            if let Some((bindings, parent)) = scope.into_contents() {
                values.extend(bindings);
                scopes.extend(parent);
            }
        } else {
            break;
        }
    }
}

pub enum FunctionKind {
    Closure {
        decl: Rc<FunctionDecl>,
        env: Scope,
    },
    Native(NativeFn),
}

pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    /// Static members such as `Promise.resolve`.
    pub properties: RefCell<Vec<(String, Value)>>,
}

impl Function {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut props = self.properties.borrow_mut();
        if let Some(slot) = props.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            props.push((key.to_string(), value));
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(&self.kind, FunctionKind::Closure { decl, .. } if decl.is_async)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Self::Object(obj) => {
                let obj = obj.borrow();
                f.debug_map()
                    .entries(obj.properties.iter().map(|(k, v)| (k, v)))
                    .finish()
            }
            Self::Function(func) => write!(f, "[Function {}]", func.name),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl Value {
    pub fn array(items: Vec<Self>) -> Self {
        Self::Array(Rc::new(RefCell::new(ArrayItems(items))))
    }

    pub fn object(properties: Vec<(String, Self)>) -> Self {
        Self::Object(Rc::new(RefCell::new(Object {
            kind: ObjectKind::Plain,
            properties,
        })))
    }

    /// An error object such as `new TypeError(message)`.
    pub fn error(name: &str, message: &str) -> Self {
        Self::Object(Rc::new(RefCell::new(Object {
            kind: ObjectKind::Error,
            properties: vec![
                ("name".to_string(), Self::from(name)),
                ("message".to_string(), Self::from(message)),
            ],
        })))
    }

    pub fn promise(state: PromiseState) -> Self {
        Self::Object(Rc::new(RefCell::new(Object {
            kind: ObjectKind::Promise(state),
            properties: Vec::new(),
        })))
    }

    pub fn native(
        name: &str,
        f: impl Fn(&mut Interpreter, &Self, Vec<Self>) -> Result<Self, Unwind> + 'static,
    ) -> Self {
        Self::Function(Rc::new(Function {
            name: name.to_string(),
            kind: FunctionKind::Native(Rc::new(f)),
            properties: RefCell::new(Vec::new()),
        }))
    }

    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Object(obj) if matches!(obj.borrow().kind, ObjectKind::Error))
    }

    pub fn promise_state(&self) -> Option<PromiseState> {
        match self {
            Self::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Promise(state) => Some(state.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    pub const fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null | Self::Array(_) | Self::Object(_) => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Function(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Str(s) => string_to_number(s),
            Self::Array(_) | Self::Object(_) | Self::Function(_) => {
                string_to_number(&self.to_js_string())
            }
        }
    }

    /// `String(value)`.
    pub fn to_js_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => s.to_string(),
            Self::Array(items) => join_array(items),
            Self::Object(obj) => {
                let obj = obj.borrow();
                match obj.kind {
                    ObjectKind::Error => {
                        let name = obj.get("name").map_or_else(
                            || "Error".to_string(),
                            |v| v.to_js_string(),
                        );
                        let message = obj
                            .get("message")
                            .map(|v| v.to_js_string())
                            .unwrap_or_default();
                        if message.is_empty() {
                            name
                        } else if name.is_empty() {
                            message
                        } else {
                            format!("{name}: {message}")
                        }
                    }
                    ObjectKind::Promise(_) => "[object Promise]".to_string(),
                    ObjectKind::Plain => "[object Object]".to_string(),
                }
            }
            Self::Function(func) => match &func.kind {
                FunctionKind::Native(_) => {
                    format!("function {}() {{ [native code] }}", func.name)
                }
                FunctionKind::Closure { decl, .. } => {
                    let params = decl.params.join(", ");
                    if decl.is_arrow {
                        format!("({params}) => {{ ... }}")
                    } else {
                        format!("function {}({params}) {{ ... }}", func.name)
                    }
                }
            },
        }
    }

    /// Conversion used by `Array.prototype.join`: nullish values render empty.
    pub fn to_join_string(&self) -> String {
        if self.is_nullish() {
            String::new()
        } else {
            self.to_js_string()
        }
    }

    /// Property key conversion for computed member access.
    pub fn to_property_key(&self) -> String {
        self.to_js_string()
    }

    /// Identity comparison for reference types.
    fn same_reference(&self, other: &Self) -> Option<bool> {
        Some(match (self, other) {
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            _ => return None,
        })
    }

    /// `===`
    #[allow(clippy::float_cmp)]
    pub fn strict_equals(&self, other: &Self) -> bool {
        if let Some(same) = self.same_reference(other) {
            return same;
        }
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }

    /// `==`
    #[allow(clippy::float_cmp)]
    pub fn loose_equals(&self, other: &Self) -> bool {
        if self.is_nullish() || other.is_nullish() {
            return self.is_nullish() && other.is_nullish();
        }
        match (self, other) {
            (
                Self::Number(_) | Self::Str(_) | Self::Bool(_),
                Self::Number(_) | Self::Str(_) | Self::Bool(_),
            ) => {
                if std::mem::discriminant(self) == std::mem::discriminant(other) {
                    self.strict_equals(other)
                } else {
                    self.to_number() == other.to_number()
                }
            }
            (Self::Array(_) | Self::Object(_), Self::Str(_) | Self::Number(_) | Self::Bool(_))
            | (Self::Str(_) | Self::Number(_) | Self::Bool(_), Self::Array(_) | Self::Object(_)) => {
                self.to_primitive().loose_equals(&other.to_primitive())
            }
            _ => self.strict_equals(other),
        }
    }

    /// Objects convert through their string form; primitives are unchanged.
    pub fn to_primitive(&self) -> Self {
        match self {
            Self::Array(_) | Self::Object(_) | Self::Function(_) => {
                Self::from(self.to_js_string())
            }
            other => other.clone(),
        }
    }

    /// Convert to JSON following `JSON.stringify` rules. `Ok(None)` means
    /// the value has no JSON form (functions, undefined).
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, CircularStructure> {
        self.to_json_inner(&mut Vec::new())
    }

    fn to_json_inner(
        &self,
        seen: &mut Vec<*const ()>,
    ) -> Result<Option<serde_json::Value>, CircularStructure> {
        let json = match self {
            Self::Undefined | Self::Function(_) => return Ok(None),
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Str(s) => serde_json::Value::String(s.to_string()),
            Self::Array(items) => {
                let ptr = Rc::as_ptr(items).cast::<()>();
                if seen.len() >= MAX_NESTING || seen.contains(&ptr) {
                    return Err(CircularStructure);
                }
                seen.push(ptr);
                let mut out = Vec::new();
                for item in items.borrow().iter() {
                    out.push(item.to_json_inner(seen)?.unwrap_or(serde_json::Value::Null));
                }
                seen.pop();
                serde_json::Value::Array(out)
            }
            Self::Object(obj) => {
                let ptr = Rc::as_ptr(obj).cast::<()>();
                if seen.len() >= MAX_NESTING || seen.contains(&ptr) {
                    return Err(CircularStructure);
                }
                seen.push(ptr);
                let properties = obj.borrow().properties.clone();
                let mut map = serde_json::Map::new();
                for (key, value) in properties {
                    if let Some(json) = value.to_json_inner(seen)? {
                        map.insert(key, json);
                    }
                }
                seen.pop();
                serde_json::Value::Object(map)
            }
        };
        Ok(Some(json))
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Self::array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Returned when `JSON.stringify` meets a value that contains itself or
/// nests past [`MAX_NESTING`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularStructure;

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        #[allow(clippy::cast_possible_truncation)]
        let int = n as i64;
        return serde_json::Value::from(int);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Deepest array or object nesting that flattening, joining or
/// serializing will walk into.
pub const MAX_NESTING: usize = 10_000;

thread_local! {
    /// Arrays currently being stringified; a nested reference renders empty.
    static JOIN_STACK: RefCell<Vec<*const ()>> = const { RefCell::new(Vec::new()) };
}

fn join_array(items: &Rc<RefCell<ArrayItems>>) -> String {
    let ptr = Rc::as_ptr(items).cast::<()>();
    let cyclic = JOIN_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.len() >= MAX_NESTING || stack.contains(&ptr) {
            true
        } else {
            stack.push(ptr);
            false
        }
    });
    if cyclic {
        return String::new();
    }
    let snapshot = items.borrow().clone();
    let joined = join_values(&snapshot, ",");
    JOIN_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
    joined
}

/// Join values the way `Array.prototype.join` does.
pub fn join_values(values: &[Value], separator: &str) -> String {
    values
        .iter()
        .map(Value::to_join_string)
        .collect::<Vec<_>>()
        .join(separator)
}

/// `Number(string)` semantics: surrounding whitespace is ignored, the empty
/// string is zero, hex literals are accepted, anything else unparsable is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        #[allow(clippy::cast_precision_loss)]
        let parsed = u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
        return parsed;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            let valid = trimmed
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
            if valid {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            } else {
                f64::NAN
            }
        }
    }
}

/// Format a number the way JavaScript's `Number.prototype.toString` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{n}");
    }
    let formatted = format!("{n:e}");
    match formatted.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(123_456_789.0), "123456789");
    }

    #[test]
    fn test_join_renders_nullish_empty() {
        let values = vec![
            Value::from("a"),
            Value::Null,
            Value::Undefined,
            Value::Number(2.0),
        ];
        assert_eq!(join_values(&values, " "), "a   2");
    }

    #[test]
    fn test_nested_array_to_string() {
        let inner = Value::array(vec![Value::Number(2.0), Value::Number(3.0)]);
        let outer = Value::array(vec![Value::Number(1.0), inner, Value::Null]);
        assert_eq!(outer.to_js_string(), "1,2,3,");
    }

    #[test]
    fn test_error_to_string() {
        assert_eq!(Value::error("TypeError", "bad").to_js_string(), "TypeError: bad");
        assert_eq!(Value::error("Error", "").to_js_string(), "Error");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(Value::array(Vec::new()).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_equality() {
        assert!(Value::Number(1.0).loose_equals(&Value::from("1")));
        assert!(!Value::Number(1.0).strict_equals(&Value::from("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
        let arr = Value::array(Vec::new());
        assert!(arr.strict_equals(&arr.clone()));
        assert!(!arr.strict_equals(&Value::array(Vec::new())));
    }

    #[test]
    fn test_string_to_number() {
        assert!((string_to_number(" 42 ") - 42.0).abs() < f64::EPSILON);
        assert!((string_to_number("0x1f") - 31.0).abs() < f64::EPSILON);
        assert!(string_to_number("12px").is_nan());
        assert!(string_to_number("").abs() < f64::EPSILON);
    }

    #[test]
    fn test_json_round_trip_preserves_integers() {
        let value = Value::object(vec![
            ("a".to_string(), Value::Number(1.0)),
            ("b".to_string(), Value::array(vec![Value::Bool(true), Value::Undefined])),
        ]);
        let json = value.to_json().unwrap().unwrap();
        assert_eq!(json.to_string(), r#"{"a":1,"b":[true,null]}"#);
        let back = Value::from_json(&json);
        assert_eq!(back.to_json().unwrap().unwrap(), json);
    }

    #[test]
    fn test_dropping_deep_nesting_does_not_recurse() {
        let mut array = Value::array(Vec::new());
        let mut object = Value::Null;
        for _ in 0..1_000_000 {
            array = Value::array(vec![array]);
            object = Value::object(vec![("next".to_string(), object)]);
        }
        let promise = Value::promise(PromiseState::Fulfilled(array.clone()));
        drop(array);
        drop(object);
        drop(promise);
    }

    #[test]
    fn test_release_keeps_shared_children() {
        let shared = Value::array(vec![Value::Number(1.0)]);
        let outer = Value::array(vec![shared.clone(), Value::from("x")]);
        drop(outer);
        assert_eq!(shared.to_js_string(), "1");
    }

    #[test]
    fn test_cycles_are_detected() {
        let arr = Value::array(Vec::new());
        if let Value::Array(items) = &arr {
            items.borrow_mut().push(Value::Number(1.0));
            items.borrow_mut().push(arr.clone());
        }
        assert_eq!(arr.to_js_string(), "1,");
        assert_eq!(arr.to_json(), Err(CircularStructure));
    }
}
