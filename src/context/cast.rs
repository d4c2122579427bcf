//! Loosely-typed scalar input and explicit conversions out of it.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CastError {
    #[error("can not cast {kind} to {target}")]
    Unsupported {
        kind: &'static str,
        target: &'static str,
    },

    #[error("can not parse {value:?} as {target}")]
    Unparsable { value: String, target: &'static str },
}

/// The closed set of primitive values handlers may pass around untyped.
///
/// Form values arrive as strings, JSON bodies carry numbers and booleans; a
/// `Scalar` holds any of them and converts on demand.
///
/// ```
/// use condor::context::Scalar;
///
/// assert_eq!(Scalar::from("12.9").cast_to_int(), Ok(12));
/// assert_eq!(Scalar::from(3).cast_to_float(), Ok(3.0));
/// assert!(Scalar::from(true).cast_to_int().is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
        }
    }

    /// Converts to an integer. Floats and numeric strings are truncated toward zero.
    pub fn cast_to_int(&self) -> Result<i64, CastError> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::UInt(u) => i64::try_from(*u).map_err(|_| CastError::Unparsable {
                value: u.to_string(),
                target: "int",
            }),
            Self::Float(f) => Ok(f.trunc() as i64),
            Self::Str(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
                .ok_or_else(|| CastError::Unparsable {
                    value: s.clone(),
                    target: "int",
                }),
            Self::Bool(_) => Err(CastError::Unsupported {
                kind: self.kind(),
                target: "int",
            }),
        }
    }

    pub fn cast_to_float(&self) -> Result<f64, CastError> {
        match self {
            Self::Int(i) => Ok(*i as f64),
            Self::UInt(u) => Ok(*u as f64),
            Self::Float(f) => Ok(*f),
            Self::Str(s) => s.trim().parse().map_err(|_| CastError::Unparsable {
                value: s.clone(),
                target: "float",
            }),
            Self::Bool(_) => Err(CastError::Unsupported {
                kind: self.kind(),
                target: "float",
            }),
        }
    }

    pub fn cast_to_string(&self) -> String {
        self.to_string()
    }

    /// A short human-readable description, for debugging output.
    pub fn describe(&self) -> String {
        format!("Type: {}\nValue: {self}", self.kind())
    }

    /// Accepts the primitive JSON kinds; arrays, objects and `null` are rejected.
    pub fn from_json(value: &Value) -> Result<Self, CastError> {
        match value {
            Value::String(s) => Ok(Self::Str(s.clone())),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Self::UInt(u))
                } else {
                    Ok(Self::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Value::Null => Err(CastError::Unsupported {
                kind: "null",
                target: "scalar",
            }),
            Value::Array(_) => Err(CastError::Unsupported {
                kind: "array",
                target: "scalar",
            }),
            Value::Object(_) => Err(CastError::Unsupported {
                kind: "object",
                target: "scalar",
            }),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! scalar_from {
    ($variant:ident as $target:ty: $($source:ty),+) => {
        $(
            impl From<$source> for Scalar {
                fn from(value: $source) -> Self {
                    Self::$variant(value as $target)
                }
            }
        )+
    };
}

scalar_from!(Int as i64: i8, i16, i32, i64, isize);
scalar_from!(UInt as u64: u8, u16, u32, u64, usize);
scalar_from!(Float as f64: f32, f64);
