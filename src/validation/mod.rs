//! Rule-string validation of request data.
//!
//! Each field gets a `|`-separated rule list:
//!
//! ```
//! use condor::validation::Validator;
//! use serde_json::json;
//!
//! let result = Validator::new()
//!     .validate(
//!         &json!({ "email": "not-an-email", "age": 15 }),
//!         [("email", "required|email"), ("age", "int|min:18"), ("name", "required")],
//!     )
//!     .unwrap();
//!
//! assert!(result.failed());
//! assert_eq!(result.message("age"), Some("age: must be no less than 18"));
//! assert_eq!(result.message("name"), Some("name: cannot be blank"));
//! ```
//!
//! Only `required` rejects a missing or empty value; every other rule lets it
//! through, so optional fields are written without `required`.

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::LazyLock,
};

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern compiles")
});
static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(0|[1-9][0-9]*)$").expect("integer pattern compiles"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid validation rule: {rule}")]
    UnknownRule { rule: String },

    #[error("invalid value for validation rule '{rule}': {reason}")]
    InvalidArgument { rule: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Rule {
    Required,
    Email,
    Url,
    Alpha,
    Digit,
    AlphaNumeric,
    LowerCase,
    UpperCase,
    Int,
    Float,
    Uuid,
    Json,
    Ip,
    Ipv4,
    Ipv6,
    Min(f64),
    Max(f64),
    Length(usize, usize),
    In(Vec<String>),
}

impl Rule {
    fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if let Some((name, arg)) = raw.split_once(':') {
            let arg = arg.trim();
            return match name.trim() {
                "min" => Ok(Self::Min(number_arg("min", arg)?)),
                "max" => Ok(Self::Max(number_arg("max", arg)?)),
                "length" => {
                    let (min, max) =
                        arg.split_once(',')
                            .ok_or_else(|| ValidationError::InvalidArgument {
                                rule: "length",
                                reason: format!("expected MIN,MAX, got {arg:?}"),
                            })?;
                    Ok(Self::Length(count_arg(min)?, count_arg(max)?))
                }
                "in" => Ok(Self::In(
                    arg.split(',').map(|v| v.trim().to_owned()).collect(),
                )),
                _ => Err(ValidationError::UnknownRule { rule: raw.to_owned() }),
            };
        }

        Ok(match raw {
            "required" => Self::Required,
            "email" => Self::Email,
            "url" => Self::Url,
            "alpha" => Self::Alpha,
            "digit" => Self::Digit,
            "alphaNumeric" => Self::AlphaNumeric,
            "lowerCase" => Self::LowerCase,
            "upperCase" => Self::UpperCase,
            "int" => Self::Int,
            "float" => Self::Float,
            "uuid" => Self::Uuid,
            "json" => Self::Json,
            "ip" => Self::Ip,
            "ipv4" => Self::Ipv4,
            "ipv6" => Self::Ipv6,
            _ => return Err(ValidationError::UnknownRule { rule: raw.to_owned() }),
        })
    }

    /// `None` if `value` passes, otherwise the failure message.
    fn check(&self, value: &Value) -> Option<String> {
        if is_empty(value) {
            return matches!(self, Self::Required).then(|| "cannot be blank".to_owned());
        }
        let text = as_text(value);

        let ok = match self {
            Self::Required => true,
            Self::Email => EMAIL.is_match(&text),
            Self::Url => url::Url::parse(&text).is_ok_and(|u| u.has_host()),
            Self::Alpha => text.chars().all(|c| c.is_ascii_alphabetic()),
            Self::Digit => text.chars().all(|c| c.is_ascii_digit()),
            Self::AlphaNumeric => text.chars().all(|c| c.is_ascii_alphanumeric()),
            Self::LowerCase => text.to_lowercase() == text,
            Self::UpperCase => text.to_uppercase() == text,
            Self::Int => INTEGER.is_match(&text),
            Self::Float => text.trim().parse::<f64>().is_ok_and(f64::is_finite),
            Self::Uuid => uuid::Uuid::parse_str(&text).is_ok(),
            Self::Json => serde_json::from_str::<Value>(&text).is_ok(),
            Self::Ip => text.parse::<IpAddr>().is_ok(),
            Self::Ipv4 => text.parse::<Ipv4Addr>().is_ok(),
            Self::Ipv6 => text.parse::<Ipv6Addr>().is_ok(),
            Self::Min(min) => as_number(value).is_some_and(|n| n >= *min),
            Self::Max(max) => as_number(value).is_some_and(|n| n <= *max),
            Self::Length(min, max) => {
                let len = match value {
                    Value::Array(items) => items.len(),
                    _ => text.chars().count(),
                };
                (*min..=*max).contains(&len)
            }
            Self::In(allowed) => allowed.iter().any(|a| *a == text),
        };
        if ok {
            return None;
        }

        Some(match self {
            Self::Required => "cannot be blank".to_owned(),
            Self::Email => "must be a valid email address".to_owned(),
            Self::Url => "must be a valid URL".to_owned(),
            Self::Alpha => "must contain English letters only".to_owned(),
            Self::Digit => "must contain digits only".to_owned(),
            Self::AlphaNumeric => "must contain letters and digits only".to_owned(),
            Self::LowerCase => "must be in lower case".to_owned(),
            Self::UpperCase => "must be in upper case".to_owned(),
            Self::Int => "must be an integer number".to_owned(),
            Self::Float => "must be a floating point number".to_owned(),
            Self::Uuid => "must be a valid UUID".to_owned(),
            Self::Json => "must be in valid JSON format".to_owned(),
            Self::Ip => "must be a valid IP address".to_owned(),
            Self::Ipv4 => "must be a valid IPv4 address".to_owned(),
            Self::Ipv6 => "must be a valid IPv6 address".to_owned(),
            Self::Min(min) => format!("must be no less than {min}"),
            Self::Max(max) => format!("must be no greater than {max}"),
            Self::Length(min, max) => format!("the length must be between {min} and {max}"),
            Self::In(_) => "must be a valid value".to_owned(),
        })
    }
}

fn number_arg(rule: &'static str, arg: &str) -> Result<f64, ValidationError> {
    arg.parse().map_err(|_| ValidationError::InvalidArgument {
        rule,
        reason: format!("{arg:?} is not a number"),
    })
}

fn count_arg(arg: &str) -> Result<usize, ValidationError> {
    arg.trim().parse().map_err(|_| ValidationError::InvalidArgument {
        rule: "length",
        reason: format!("{arg:?} is not a length"),
    })
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Outcome of [`Validator::validate`]: at most one message per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    messages: BTreeMap<String, String>,
}

impl ValidationResult {
    pub fn failed(&self) -> bool {
        !self.messages.is_empty()
    }

    /// Failure messages keyed by field, formatted `"<field>: <reason>"`.
    pub fn messages(&self) -> &BTreeMap<String, String> {
        &self.messages
    }

    pub fn message(&self, field: &str) -> Option<&str> {
        self.messages.get(field).map(String::as_str)
    }

    /// The messages as a JSON object, ready to send back to the client.
    pub fn messages_json(&self) -> String {
        Value::from_iter(
            self.messages
                .iter()
                .map(|(field, message)| (field.clone(), Value::String(message.clone()))),
        )
        .to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Checks each `(field, rules)` pair against `data`, a JSON object.
    ///
    /// A field stops at its first failing rule. Fields of `data` without rules
    /// are ignored.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] if a rule string is malformed; this is a programming
    /// error, not a validation failure.
    pub fn validate<K, R>(
        &self,
        data: &Value,
        rules: impl IntoIterator<Item = (K, R)>,
    ) -> Result<ValidationResult, ValidationError>
    where
        K: AsRef<str>,
        R: AsRef<str>,
    {
        let mut result = ValidationResult::default();
        for (field, rule_list) in rules {
            let field = field.as_ref();
            let parsed = rule_list
                .as_ref()
                .split('|')
                .filter(|r| !r.trim().is_empty())
                .map(Rule::parse)
                .collect::<Result<Vec<_>, _>>()?;

            let value = data.get(field).unwrap_or(&Value::Null);
            if let Some(reason) = parsed.iter().find_map(|rule| rule.check(value)) {
                result.messages.insert(field.to_owned(), format!("{field}: {reason}"));
            }
        }
        Ok(result)
    }
}
