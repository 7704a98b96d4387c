//! Tagged protocol value and its JSON-like textual codec.
//!
//! Payloads and persisted tables use a lenient JSON dialect: arrays and
//! objects are split on separators found outside string literals and at
//! bracket/brace depth zero, elements are trimmed, and object keys keep their
//! insertion order. String literals follow JSON escaping rules.

use std::fmt::Write as _;

/// Errors produced while reading a textual value.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("array does not start with '[' or end with ']' in '{0}'")]
    NotArray(String),
    #[error("object does not start with '{{' or end with '}}' in '{0}'")]
    NotObject(String),
    #[error("missing elements in '{0}'")]
    MissingElement(String),
    #[error("expected ':' in '{0}'")]
    MissingColon(String),
    #[error("key missing in '{0}'")]
    MissingKey(String),
    #[error("value missing in '{0}'")]
    MissingValue(String),
    #[error("invalid string literal {0}: {1}")]
    BadString(String, serde_json::Error),
    #[error("invalid literal '{0}'")]
    BadLiteral(String),
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
}

/// A protocol value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    /// Ordered key/value pairs.
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Builds an object from `(key, value)` pairs, keeping their order.
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn empty_object() -> Self {
        Value::Object(Vec::new())
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    fn wrong(&self, expected: &'static str) -> ValueError {
        ValueError::WrongType {
            expected,
            found: self.kind(),
        }
    }

    /// Looks up `key` in an object. Returns `None` for missing keys and for
    /// non-object values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.wrong("string")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.wrong("boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            other => Err(other.wrong("integer")),
        }
    }

    pub fn as_f64(&self) -> Result<f64, ValueError> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(f) => Ok(*f),
            other => Err(other.wrong("number")),
        }
    }

    pub fn as_array(&self) -> Result<&[Value], ValueError> {
        match self {
            Value::Array(items) => Ok(items),
            other => Err(other.wrong("array")),
        }
    }

    pub fn as_object(&self) -> Result<&[(String, Value)], ValueError> {
        match self {
            Value::Object(pairs) => Ok(pairs),
            other => Err(other.wrong("object")),
        }
    }

    /// Serializes the value to its textual form.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Value::Float(f) => write_float(*f, out),
            Value::String(s) => write_string(s, out),
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_to(out);
                }
                out.push(']');
            }
            Value::Object(pairs) => {
                out.push('{');
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_string(k, out);
                    out.push(':');
                    v.write_to(out);
                }
                out.push('}');
            }
        }
    }

    /// Parses a textual value.
    pub fn decode(text: &str) -> Result<Value, ValueError> {
        let text = text.trim();
        match text.as_bytes().first() {
            Some(b'[') => decode_array(text),
            Some(b'{') => decode_object(text),
            Some(b'"') => decode_string(text).map(Value::String),
            _ => decode_scalar(text),
        }
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

fn write_string(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(literal) => out.push_str(&literal),
        // Serializing a &str cannot fail.
        Err(_) => out.push_str("\"\""),
    }
}

fn write_float(f: f64, out: &mut String) {
    if !f.is_finite() {
        out.push_str("null");
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        let _ = write!(out, "{}", f as i64);
    } else {
        let _ = write!(out, "{f}");
    }
}

fn decode_string(text: &str) -> Result<String, ValueError> {
    serde_json::from_str::<String>(text).map_err(|e| ValueError::BadString(text.to_string(), e))
}

fn decode_scalar(text: &str) -> Result<Value, ValueError> {
    match text {
        "null" => return Ok(Value::Null),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(Value::Float(f)),
        _ => Err(ValueError::BadLiteral(text.to_string())),
    }
}

fn decode_array(text: &str) -> Result<Value, ValueError> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| ValueError::NotArray(text.to_string()))?
        .trim();
    let mut items = Vec::new();
    if inner.is_empty() {
        return Ok(Value::Array(items));
    }

    let mut start = 0;
    loop {
        let end = next_byte(inner, b',', start);
        let element = inner[start..end.unwrap_or(inner.len())].trim();
        if element.is_empty() {
            return Err(ValueError::MissingElement(text.to_string()));
        }
        items.push(Value::decode(element)?);
        match end {
            Some(pos) => start = pos + 1,
            None => break,
        }
    }
    Ok(Value::Array(items))
}

fn decode_object(text: &str) -> Result<Value, ValueError> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| ValueError::NotObject(text.to_string()))?
        .trim();
    let mut pairs = Vec::new();
    if inner.is_empty() {
        return Ok(Value::Object(pairs));
    }

    let mut start = 0;
    loop {
        let colon =
            next_byte(inner, b':', start).ok_or_else(|| ValueError::MissingColon(inner.to_string()))?;
        let key = inner[start..colon].trim();
        if key.is_empty() {
            return Err(ValueError::MissingKey(text.to_string()));
        }
        let key = decode_string(key)?;

        start = colon + 1;
        let end = next_byte(inner, b',', start);
        let value = inner[start..end.unwrap_or(inner.len())].trim();
        if value.is_empty() {
            return Err(ValueError::MissingValue(text.to_string()));
        }
        pairs.push((key, Value::decode(value)?));
        match end {
            Some(pos) => start = pos + 1,
            None => break,
        }
    }
    Ok(Value::Object(pairs))
}

/// Position of the next `ch` at nesting depth zero and outside string
/// literals, searching from `from`.
fn next_byte(s: &str, ch: u8, from: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut squares: i32 = 0;
    let mut braces: i32 = 0;

    for (pos, &c) in bytes.iter().enumerate().skip(from) {
        if in_quotes {
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                in_quotes = false;
            }
            continue;
        }
        if c == ch
            && ((c == b']' && squares == 1 && braces == 0)
                || (c == b'}' && squares == 0 && braces == 1)
                || (squares == 0 && braces == 0))
        {
            return Some(pos);
        }
        match c {
            b'"' => in_quotes = true,
            b'[' => squares += 1,
            b']' => squares -= 1,
            b'{' => braces += 1,
            b'}' => braces -= 1,
            _ => {}
        }
    }
    None
}
