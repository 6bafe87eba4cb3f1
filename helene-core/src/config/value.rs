use std::collections::HashMap;

use super::ConfigError;

/// A single configuration value that can be converted to various types.
#[derive(Debug, Clone)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<ConfigValue>),
    Map(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub(crate) fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Bool(b) => ConfigValue::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ConfigValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    ConfigValue::Float(f)
                } else {
                    ConfigValue::String(n.to_string())
                }
            }
            serde_yaml::Value::String(s) => ConfigValue::String(s.clone()),
            serde_yaml::Value::Null => ConfigValue::Null,
            serde_yaml::Value::Sequence(seq) => {
                ConfigValue::List(seq.iter().map(ConfigValue::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => {
                let mut result = HashMap::new();
                for (k, v) in map {
                    let key = match k {
                        serde_yaml::Value::String(s) => s.clone(),
                        other => format!("{other:?}"),
                    };
                    result.insert(key, ConfigValue::from_yaml(v));
                }
                ConfigValue::Map(result)
            }
            other => ConfigValue::String(format!("{other:?}")),
        }
    }
}

/// Trait for converting a `ConfigValue` into a concrete type.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be used as a config value type",
    label = "not a valid config value type",
    note = "built-in types: String, i64, f64, bool, Option<T>, Vec<T>. Implement `FromConfigValue` for custom types."
)]
pub trait FromConfigValue: Sized {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError>;
}

impl FromConfigValue for String {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::String(s) => Ok(s.clone()),
            ConfigValue::Integer(i) => Ok(i.to_string()),
            ConfigValue::Float(f) => Ok(f.to_string()),
            ConfigValue::Bool(b) => Ok(b.to_string()),
            ConfigValue::Null | ConfigValue::List(_) | ConfigValue::Map(_) => {
                Err(ConfigError::TypeMismatch {
                    key: key.to_string(),
                    expected: "String",
                })
            }
        }
    }
}

impl FromConfigValue for i64 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Integer(i) => Ok(*i),
            ConfigValue::String(s) => s.parse().map_err(|_| ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "i64",
            }),
            _ => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "i64",
            }),
        }
    }
}

impl FromConfigValue for u64 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        i64::from_config_value(value, key).map(|v| v.max(0) as u64)
    }
}

impl FromConfigValue for f64 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Float(f) => Ok(*f),
            ConfigValue::Integer(i) => Ok(*i as f64),
            ConfigValue::String(s) => s.parse().map_err(|_| ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "f64",
            }),
            _ => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "f64",
            }),
        }
    }
}

impl FromConfigValue for bool {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Bool(b) => Ok(*b),
            ConfigValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::TypeMismatch {
                    key: key.to_string(),
                    expected: "bool",
                }),
            },
            _ => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "bool",
            }),
        }
    }
}

impl<T: FromConfigValue> FromConfigValue for Option<T> {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Null => Ok(None),
            v => T::from_config_value(v, key).map(Some),
        }
    }
}

impl<T: FromConfigValue> FromConfigValue for Vec<T> {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| T::from_config_value(v, &format!("{key}[{i}]")))
                .collect(),
            // Fallback: single value -> vec of one
            other => Ok(vec![T::from_config_value(other, key)?]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_conversions_from_scalars() {
        assert_eq!(
            String::from_config_value(&ConfigValue::Integer(42), "k").unwrap(),
            "42"
        );
        assert_eq!(
            String::from_config_value(&ConfigValue::Bool(true), "k").unwrap(),
            "true"
        );
        assert!(String::from_config_value(&ConfigValue::Null, "k").is_err());
    }

    #[test]
    fn integer_conversion_parses_strings() {
        assert_eq!(
            i64::from_config_value(&ConfigValue::String("7".into()), "k").unwrap(),
            7
        );
        assert!(i64::from_config_value(&ConfigValue::String("nope".into()), "k").is_err());
    }

    #[test]
    fn u64_conversion_clamps_negative() {
        assert_eq!(
            u64::from_config_value(&ConfigValue::Integer(-5), "k").unwrap(),
            0
        );
    }

    #[test]
    fn bool_conversion_accepts_yes_no_variants() {
        assert!(bool::from_config_value(&ConfigValue::String("yes".into()), "k").unwrap());
        assert!(!bool::from_config_value(&ConfigValue::String("0".into()), "k").unwrap());
        assert!(bool::from_config_value(&ConfigValue::String("maybe".into()), "k").is_err());
    }

    #[test]
    fn option_conversion_treats_null_as_none() {
        assert!(Option::<i64>::from_config_value(&ConfigValue::Null, "k")
            .unwrap()
            .is_none());
        assert_eq!(
            Option::<i64>::from_config_value(&ConfigValue::Integer(3), "k").unwrap(),
            Some(3)
        );
    }

    #[test]
    fn vec_conversion_lifts_scalar_to_single_element() {
        let v = Vec::<String>::from_config_value(&ConfigValue::String("solo".into()), "k").unwrap();
        assert_eq!(v, vec!["solo".to_string()]);
    }

    #[test]
    fn vec_conversion_rejects_bad_element() {
        let list = ConfigValue::List(vec![ConfigValue::Integer(1), ConfigValue::Bool(false)]);
        assert!(Vec::<i64>::from_config_value(&list, "k").is_err());
    }

    #[test]
    fn from_yaml_maps_sequences_and_mappings() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("a: 1\nb:\n  - x\n  - y\n").unwrap();
        match ConfigValue::from_yaml(&yaml) {
            ConfigValue::Map(m) => {
                assert!(matches!(m.get("a"), Some(ConfigValue::Integer(1))));
                assert!(matches!(m.get("b"), Some(ConfigValue::List(l)) if l.len() == 2));
            }
            other => panic!("expected Map, got {other:?}"),
        }
    }
}
