use crate::Errors;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of a stage parameter
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Color([u8; 3]),
    Choice(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            ParamValue::Choice(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<[u8; 3]> {
        match self {
            ParamValue::Color(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Color([r, g, b]) => write!(f, "#{:02x}{:02x}{:02x}", r, g, b),
            ParamValue::Choice(v) => write!(f, "{}", v),
        }
    }
}

/// Kind and constraints of a parameter
///
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Int {
        minimum: i64,
        maximum: i64,
        step: i64,
    },
    Float {
        minimum: f64,
        maximum: f64,
        step: f64,
    },
    /// `(label, value)` pairs; the value is what is stored
    Choice(Vec<(&'static str, &'static str)>),
    Color,
    Check,
}

/// Declaration of a stage parameter
///
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub label: &'static str,
    pub kind: ParamKind,
    pub default: ParamValue,
}

impl Param {
    pub fn int(label: &'static str, minimum: i64, maximum: i64, step: i64, default: i64) -> Self {
        assert!(minimum <= default && default <= maximum && step > 0);
        Self {
            label,
            kind: ParamKind::Int {
                minimum,
                maximum,
                step,
            },
            default: ParamValue::Int(default),
        }
    }

    pub fn float(label: &'static str, minimum: f64, maximum: f64, step: f64, default: f64) -> Self {
        assert!(minimum <= default && default <= maximum && step > 0.0);
        Self {
            label,
            kind: ParamKind::Float {
                minimum,
                maximum,
                step,
            },
            default: ParamValue::Float(default),
        }
    }

    /// Choice parameter, the first entry is the default
    ///
    pub fn choice(label: &'static str, choices: &[(&'static str, &'static str)]) -> Self {
        assert!(!choices.is_empty());
        Self {
            label,
            kind: ParamKind::Choice(choices.to_vec()),
            default: ParamValue::Choice(choices[0].1.to_string()),
        }
    }

    pub fn color(label: &'static str, default: [u8; 3]) -> Self {
        Self {
            label,
            kind: ParamKind::Color,
            default: ParamValue::Color(default),
        }
    }

    pub fn check(label: &'static str, default: bool) -> Self {
        Self {
            label,
            kind: ParamKind::Check,
            default: ParamValue::Bool(default),
        }
    }

    /// Checks that `value` is acceptable for the parameter.
    ///
    /// Integer parameters whose minimum is odd and whose step is even (kernel sizes) only
    /// take odd values. Integers are accepted for float parameters and come back as
    /// `Float`; every other accepted value comes back unchanged.
    ///
    pub fn validate(&self, value: &ParamValue) -> Result<ParamValue> {
        let invalid = |reason: String| -> anyhow::Error {
            Errors::InvalidParam(self.label.to_string(), reason).into()
        };

        match (&self.kind, value) {
            (
                ParamKind::Int {
                    minimum,
                    maximum,
                    step,
                },
                ParamValue::Int(v),
            ) => {
                if v < minimum || v > maximum {
                    return Err(invalid(format!(
                        "{} is outside of [{}, {}]",
                        v, minimum, maximum
                    )));
                }
                if step % 2 == 0 && minimum % 2 != 0 && v % 2 == 0 {
                    return Err(invalid(format!("{} must be odd", v)));
                }
                Ok(value.clone())
            }
            (
                ParamKind::Float {
                    minimum, maximum, ..
                },
                v,
            ) if v.as_float().is_some() => {
                let v = v.as_float().unwrap_or_default();
                if !v.is_finite() || v < *minimum || v > *maximum {
                    return Err(invalid(format!(
                        "{} is outside of [{}, {}]",
                        v, minimum, maximum
                    )));
                }
                Ok(ParamValue::Float(v))
            }
            (ParamKind::Choice(choices), ParamValue::Choice(v)) => {
                if choices.iter().any(|(_, c)| c == v) {
                    Ok(value.clone())
                } else {
                    Err(invalid(format!(
                        "`{}` is not one of {:?}",
                        v,
                        choices.iter().map(|(_, c)| *c).collect::<Vec<_>>()
                    )))
                }
            }
            (ParamKind::Color, ParamValue::Color(_)) | (ParamKind::Check, ParamValue::Bool(_)) => {
                Ok(value.clone())
            }
            (kind, value) => Err(invalid(format!(
                "{:?} does not match a {} parameter",
                value,
                kind.name()
            ))),
        }
    }
}

impl ParamKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::Int { .. } => "integer",
            ParamKind::Float { .. } => "float",
            ParamKind::Choice(_) => "choice",
            ParamKind::Color => "colour",
            ParamKind::Check => "check box",
        }
    }
}

/// Parses a colour written as `#rrggbb` or `rrggbb`
///
pub fn parse_color(s: &str) -> Option<[u8; 3]> {
    let s = s.strip_prefix('#').unwrap_or(s);
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}
