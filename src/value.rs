//! Implementation of parameter values.

use std::fmt;

use serde::Serialize;
use serde_yaml_ng::Value as YamlValue;

/// An error that occurs when converting a configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// The YAML value carries a tag, which is not supported.
    #[error("tagged YAML values are not supported: `{0}`")]
    Tagged(String),
    /// The YAML number cannot be represented.
    #[error("number `{0}` cannot be represented as an integer or a float")]
    Number(String),
}

/// Represents a resolved parameter value.
///
/// Values keep the type they were declared with in the experiment
/// configuration; string interpolation always uses the [`Display`]
/// implementation.
///
/// [`Display`]: fmt::Display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// The value is a boolean.
    Boolean(bool),
    /// The value is an integer.
    Integer(i64),
    /// The value is a float.
    Float(f64),
    /// The value is a string.
    String(String),
}

impl Value {
    /// Converts a YAML scalar into a value.
    ///
    /// Returns `Ok(None)` if the YAML value is a sequence or a mapping.
    ///
    /// A YAML `null` becomes an empty string so that keys declared without a
    /// value (e.g. `start_condition_cmd:`) read as "not configured".
    pub fn from_yaml(value: &YamlValue) -> Result<Option<Self>, ValueError> {
        match value {
            YamlValue::Null => Ok(Some(Self::String(String::new()))),
            YamlValue::Bool(b) => Ok(Some(Self::Boolean(*b))),
            YamlValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(Self::Integer(i)))
                } else if let Some(f) = n.as_f64() {
                    Ok(Some(Self::Float(f)))
                } else {
                    Err(ValueError::Number(n.to_string()))
                }
            }
            YamlValue::String(s) => Ok(Some(Self::String(s.clone()))),
            YamlValue::Sequence(_) | YamlValue::Mapping(_) => Ok(None),
            YamlValue::Tagged(tagged) => Err(ValueError::Tagged(tagged.tag.to_string())),
        }
    }

    /// Gets the value as a string slice.
    ///
    /// Returns `None` if the value is not a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Gets the value as an integer.
    ///
    /// Floats with no fractional part and strings containing an integer are
    /// converted.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Gets the name of the value's type for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }

    /// Determines if the value is "truthy".
    ///
    /// Zero, the empty string and `false` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            // The debug representation keeps a trailing `.0` on whole floats
            Self::Float(v) => write!(f, "{v:?}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn display() {
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(Value::Integer(-3).to_string(), "-3");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(Value::from("hello").to_string(), "hello");
    }

    #[test]
    fn from_yaml() {
        let yaml: YamlValue = serde_yaml_ng::from_str("[1, 1.5, true, foo, ~, [x]]").unwrap();
        let values = yaml
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| Value::from_yaml(v).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(
            values,
            [
                Some(Value::Integer(1)),
                Some(Value::Float(1.5)),
                Some(Value::Boolean(true)),
                Some(Value::from("foo")),
                Some(Value::from("")),
                None,
            ]
        );
    }

    #[test]
    fn integer_conversion() {
        assert_eq!(Value::from(" 42 ").as_integer(), Some(42));
        assert_eq!(Value::Float(60.0).as_integer(), Some(60));
        assert_eq!(Value::Float(60.5).as_integer(), None);
        assert_eq!(Value::Boolean(true).as_integer(), None);
    }
}
