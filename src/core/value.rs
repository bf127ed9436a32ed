use crate::error::PromiseError;
use crate::sync_promise::SyncPromise;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type NativeFn = dyn Fn(&[Value]) -> Result<Value, Value>;

/// A shared native callable. `Err` carries a thrown value.
#[derive(Clone)]
pub struct Function(Rc<NativeFn>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, Value> + 'static,
    {
        Function(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, Value> {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// Shared, insertion-ordered property bag.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<IndexMap<String, Value>>>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of all members, in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Object {
    // Members may point back at this object, so only the keys are printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(props) => f.debug_struct("Object").field("keys", &props.keys().collect::<Vec<_>>()).finish(),
            Err(_) => f.write_str("Object { <borrowed> }"),
        }
    }
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
    Function(Function),
    Promise(SyncPromise),
    Error(PromiseError),
}

/// How a thenable value wants to be followed.
pub(crate) enum ThenMethod {
    Native(SyncPromise),
    Foreign(Function),
}

impl Value {
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// A value is thenable when it exposes a callable `then` member.
    /// Native promises always qualify.
    pub fn is_thenable(&self) -> bool {
        self.then_method().is_some()
    }

    pub(crate) fn then_method(&self) -> Option<ThenMethod> {
        match self {
            Value::Promise(p) => Some(ThenMethod::Native(p.clone())),
            Value::Object(obj) => match obj.get("then") {
                Some(Value::Function(then_fn)) => Some(ThenMethod::Foreign(then_fn)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Promise(_) => "promise",
            Value::Error(_) => "error",
        }
    }
}

/// Reads argument `index`, treating missing arguments as `undefined`.
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(obj) => write!(f, "{obj:?}"),
            Value::Function(func) => write!(f, "{func:?}"),
            Value::Promise(p) => write!(f, "{p:?}"),
            Value::Error(e) => write!(f, "Error({e:?})"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&value_to_string(self))
    }
}

/// Renders a number the way a script engine prints it: no trailing `.0`,
/// and named non-finite values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n.is_sign_negative() { "-Infinity".to_string() } else { "Infinity".to_string() }
    } else if n == 0.0 {
        // -0 prints as 0
        "0".to_string()
    } else {
        format!("{n}")
    }
}

pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| if item.is_null_or_undefined() { String::new() } else { value_to_string(item) })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
        Value::Function(_) => "function".to_string(),
        Value::Promise(p) => p.to_string(),
        Value::Error(e) => format!("{}: {}", e.kind(), e.message()),
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

/// Numbers are `f64`: magnitudes above 2^53 round to the nearest
/// representable value.
impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

/// Same rounding as `From<i64>` above 2^53.
impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(func)
    }
}

impl From<SyncPromise> for Value {
    fn from(p: SyncPromise) -> Self {
        Value::Promise(p)
    }
}

impl From<PromiseError> for Value {
    fn from(e: PromiseError) -> Self {
        Value::Error(e)
    }
}
