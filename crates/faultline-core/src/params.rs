//! Strategy parameter schemas.
//!
//! Every strategy variant declares the parameters it accepts; values from
//! the configuration file and `key=value` CLI overrides are validated
//! against that schema when the run is assembled, so unknown or missing
//! required keys fail before the run starts, not at first use.

use std::collections::BTreeMap;

use crate::error::ConfigError;

/// Declared kind of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Floating point (integers coerce).
    Float,
    /// String.
    Str,
}

impl ParamKind {
    fn name(self) -> &'static str {
        match self {
            ParamKind::Bool => "bool",
            ParamKind::Int => "integer",
            ParamKind::Float => "float",
            ParamKind::Str => "string",
        }
    }
}

/// A validated parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// String.
    Str(String),
}

impl ParamValue {
    fn kind_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
        }
    }

    fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::Boolean(flag) => Some(ParamValue::Bool(*flag)),
            toml::Value::Integer(number) => Some(ParamValue::Int(*number)),
            toml::Value::Float(number) => Some(ParamValue::Float(*number)),
            toml::Value::String(text) => Some(ParamValue::Str(text.clone())),
            _ => None,
        }
    }

    fn coerce(self, kind: ParamKind, key: &str) -> Result<Self, ConfigError> {
        let matches = match (&self, kind) {
            (ParamValue::Bool(_), ParamKind::Bool)
            | (ParamValue::Int(_), ParamKind::Int)
            | (ParamValue::Float(_), ParamKind::Float)
            | (ParamValue::Str(_), ParamKind::Str) => true,
            (ParamValue::Int(number), ParamKind::Float) => {
                return Ok(ParamValue::Float(*number as f64));
            }
            _ => false,
        };
        if matches {
            Ok(self)
        } else {
            Err(ConfigError::ParameterType {
                key: key.to_string(),
                expected: kind.name(),
                got: self.kind_name().to_string(),
            })
        }
    }

    /// Parse a raw override string into the declared kind.
    fn parse(kind: ParamKind, key: &str, raw: &str) -> Result<Self, ConfigError> {
        let wrong = |got: &str| ConfigError::ParameterType {
            key: key.to_string(),
            expected: kind.name(),
            got: got.to_string(),
        };
        match kind {
            ParamKind::Bool => raw
                .parse::<bool>()
                .map(ParamValue::Bool)
                .map_err(|_| wrong(raw)),
            ParamKind::Int => raw
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| wrong(raw)),
            ParamKind::Float => raw
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|_| wrong(raw)),
            ParamKind::Str => Ok(ParamValue::Str(raw.to_string())),
        }
    }
}

/// Declaration of one parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    /// Parameter key.
    pub key: &'static str,
    /// Declared kind.
    pub kind: ParamKind,
    /// Whether the parameter must be supplied.
    pub required: bool,
    /// Default applied when not supplied (ignored for required params).
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    /// A parameter that must be supplied.
    pub fn required(key: &'static str, kind: ParamKind) -> Self {
        Self {
            key,
            kind,
            required: true,
            default: None,
        }
    }

    /// An optional parameter with a default.
    pub fn optional(key: &'static str, kind: ParamKind, default: ParamValue) -> Self {
        Self {
            key,
            kind,
            required: false,
            default: Some(default),
        }
    }

    /// An optional parameter without a default (absent when not supplied).
    pub fn optional_no_default(key: &'static str, kind: ParamKind) -> Self {
        Self {
            key,
            kind,
            required: false,
            default: None,
        }
    }
}

/// The declared schema of one strategy variant.
#[derive(Debug, Clone)]
pub struct ParamSchema {
    /// Strategy variant name, for error messages.
    pub strategy: &'static str,
    /// Declared parameters.
    pub specs: Vec<ParamSpec>,
}

impl ParamSchema {
    /// Validate a TOML table plus raw `key=value` overrides into a typed
    /// parameter set.
    pub fn validate(
        &self,
        table: &toml::value::Table,
        overrides: &[(String, String)],
    ) -> Result<StrategyParams, ConfigError> {
        let mut values: BTreeMap<String, ParamValue> = BTreeMap::new();

        for (key, raw) in table {
            let spec = self.spec_for(key)?;
            let value = ParamValue::from_toml(raw).ok_or_else(|| ConfigError::ParameterType {
                key: key.clone(),
                expected: spec.kind.name(),
                got: raw.type_str().to_string(),
            })?;
            values.insert(key.clone(), value.coerce(spec.kind, key)?);
        }

        // Overrides layer on top of the file, coerced by the declared kind.
        for (key, raw) in overrides {
            let spec = self.spec_for(key)?;
            values.insert(key.clone(), ParamValue::parse(spec.kind, key, raw)?);
        }

        for spec in &self.specs {
            if values.contains_key(spec.key) {
                continue;
            }
            if spec.required {
                return Err(ConfigError::MissingParameter {
                    strategy: self.strategy.to_string(),
                    key: spec.key.to_string(),
                });
            }
            if let Some(default) = &spec.default {
                values.insert(spec.key.to_string(), default.clone());
            }
        }

        Ok(StrategyParams { values })
    }

    fn spec_for(&self, key: &str) -> Result<&ParamSpec, ConfigError> {
        self.specs
            .iter()
            .find(|spec| spec.key == key)
            .ok_or_else(|| ConfigError::UnknownParameter {
                strategy: self.strategy.to_string(),
                key: key.to_string(),
            })
    }
}

/// Validated, typed parameters for one strategy instance.
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    values: BTreeMap<String, ParamValue>,
}

impl StrategyParams {
    /// Empty parameter set, for strategies without parameters.
    pub fn empty() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Typed boolean lookup.
    pub fn bool(&self, key: &str) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(ParamValue::Bool(flag)) => Ok(*flag),
            _ => Err(self.missing(key)),
        }
    }

    /// Typed integer lookup.
    pub fn int(&self, key: &str) -> Result<i64, ConfigError> {
        match self.get(key) {
            Some(ParamValue::Int(number)) => Ok(*number),
            _ => Err(self.missing(key)),
        }
    }

    /// Typed float lookup (validated integers coerce at load time).
    pub fn float(&self, key: &str) -> Result<f64, ConfigError> {
        match self.get(key) {
            Some(ParamValue::Float(number)) => Ok(*number),
            Some(ParamValue::Int(number)) => Ok(*number as f64),
            _ => Err(self.missing(key)),
        }
    }

    /// Typed string lookup.
    pub fn str(&self, key: &str) -> Result<&str, ConfigError> {
        match self.get(key) {
            Some(ParamValue::Str(text)) => Ok(text),
            _ => Err(self.missing(key)),
        }
    }

    /// Optional integer, `None` when absent.
    pub fn opt_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(ParamValue::Int(number)) => Some(*number),
            _ => None,
        }
    }

    fn missing(&self, key: &str) -> ConfigError {
        ConfigError::MissingParameter {
            strategy: "<instance>".to_string(),
            key: key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParamSchema {
        ParamSchema {
            strategy: "random_fuzzer",
            specs: vec![
                ParamSpec::required("drop_probability", ParamKind::Float),
                ParamSpec::optional("min_delay_ms", ParamKind::Int, ParamValue::Int(10)),
                ParamSpec::optional_no_default("seed", ParamKind::Int),
            ],
        }
    }

    fn table(text: &str) -> toml::value::Table {
        text.parse::<toml::Table>().unwrap()
    }

    #[test]
    fn missing_required_key_fails_at_load() {
        let err = schema().validate(&table(""), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter { .. }));
    }

    #[test]
    fn unknown_key_fails_at_load() {
        let err = schema()
            .validate(&table("drop_probability = 0.1\nbogus = 3"), &[])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownParameter { .. }));
    }

    #[test]
    fn defaults_and_coercion_apply() {
        let params = schema().validate(&table("drop_probability = 1"), &[]).unwrap();
        assert_eq!(params.float("drop_probability").unwrap(), 1.0);
        assert_eq!(params.int("min_delay_ms").unwrap(), 10);
        assert_eq!(params.opt_int("seed"), None);
    }

    #[test]
    fn overrides_win_and_are_type_checked() {
        let params = schema()
            .validate(
                &table("drop_probability = 0.5"),
                &[("drop_probability".to_string(), "0.9".to_string())],
            )
            .unwrap();
        assert_eq!(params.float("drop_probability").unwrap(), 0.9);

        let err = schema()
            .validate(
                &table("drop_probability = 0.5"),
                &[("min_delay_ms".to_string(), "fast".to_string())],
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParameterType { .. }));
    }

    #[test]
    fn wrong_toml_type_is_rejected() {
        let err = schema()
            .validate(&table("drop_probability = \"lots\""), &[])
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParameterType { .. }));
    }
}
