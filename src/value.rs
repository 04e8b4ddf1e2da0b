//! The type-erased values that flow through promises.
//!
//! Objects are shared, so a `put` through one promise is visible to every
//! other holder of the same object. Functions and futures compare by
//! identity.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::{Error, Promise, Thenable};

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Object(Object),
    Function(Function),
    /// Anything that honours the `then` contract.
    Future(Rc<dyn Thenable>),
}

impl Value {
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

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The future capability of this value, if it has one.
    pub fn as_thenable(&self) -> Option<&Rc<dyn Thenable>> {
        match self {
            Value::Future(thenable) => Some(thenable),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Reads property `name`. Missing properties read as `Undefined`;
    /// reading from `Undefined` or `Null` is a type error.
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        match self {
            Value::Undefined | Value::Null => Err(Error::Type(format!(
                "cannot read property '{name}' of {self}"
            ))),
            Value::Object(object) => Ok(object.get(name).unwrap_or_default()),
            Value::List(items) => Ok(match name {
                "length" => Value::Number(items.len() as f64),
                index => index
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            }),
            Value::String(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            _ => Ok(Value::Undefined),
        }
    }

    /// Sets property `name` and hands back the stored value.
    pub fn put(&self, name: &str, value: Value) -> Result<Value, Error> {
        match self {
            Value::Object(object) => {
                object.set(name, value.clone());
                Ok(value)
            }
            other => Err(Error::Type(format!(
                "cannot set property '{name}' on {}",
                other.kind()
            ))),
        }
    }

    /// Invokes method `name` with this value as the receiver.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        match self.get(name)? {
            Value::Function(function) => function.call(self, args),
            _ => Err(Error::Type(format!("{name} is not a function"))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Future(_) => "future",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Object(object) => f.debug_tuple("Object").field(&*object.0.borrow()).finish(),
            Value::Function(_) => write!(f, "Function {{ ... }}"),
            Value::Future(_) => write!(f, "Future {{ ... }}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Object(_) => f.write_str("[object Object]"),
            other => f.write_str(other.kind()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(&a.0, &b.0) || *a.0.borrow() == *b.0.borrow()
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Value::Future(a), Value::Future(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Future(Rc::new(promise))
    }
}

/// A shared, mutable property map.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<BTreeMap<String, Value>>>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.borrow_mut().insert(name.into(), value.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        for (name, value) in iter {
            object.set(name, value);
        }
        object
    }
}

type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, Error>;

/// A callable value. The first argument is the receiver the method was
/// looked up on.
#[derive(Clone)]
pub struct Function(Rc<NativeFn>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, Error> + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, Error> {
        (self.0)(this, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_are_shared_between_clones() {
        let object = Object::new();
        let value = Value::Object(object.clone());
        value.put("name", "deferred".into()).unwrap();
        assert_eq!(object.get("name"), Some(Value::from("deferred")));
    }

    #[test]
    fn get_on_undefined_is_a_type_error() {
        assert!(matches!(Value::Undefined.get("x"), Err(Error::Type(_))));
        assert_eq!(Value::Number(3.0).get("x").unwrap(), Value::Undefined);
    }

    #[test]
    fn list_properties() {
        let list = Value::List(vec![1.into(), 2.into()]);
        assert_eq!(list.get("length").unwrap(), Value::Number(2.0));
        assert_eq!(list.get("1").unwrap(), Value::Number(2.0));
        assert_eq!(list.get("5").unwrap(), Value::Undefined);
    }

    #[test]
    fn call_passes_receiver() {
        let object = Object::new();
        object.set("base", 10);
        object.set(
            "add",
            Function::new(|this, args| {
                let base = this.get("base")?.as_number().unwrap_or_default();
                let arg = args.first().and_then(Value::as_number).unwrap_or_default();
                Ok(Value::Number(base + arg))
            }),
        );
        let value = Value::Object(object);
        assert_eq!(value.call("add", &[5.into()]).unwrap(), Value::Number(15.0));
        assert!(matches!(value.call("base", &[]), Err(Error::Type(_))));
    }

    #[test]
    fn display_matches_loose_string_conversion() {
        assert_eq!(Value::List(vec![1.into(), "a".into()]).to_string(), "1,a");
        assert_eq!(Value::Undefined.to_string(), "undefined");
    }
}
