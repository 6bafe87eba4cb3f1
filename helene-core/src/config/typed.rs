use super::{ConfigError, HeleneConfig};

/// Metadata about a single configuration property.
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    /// Relative key (e.g., `"port"`).
    pub key: String,
    /// Absolute key (e.g., `"helene.port"`).
    pub full_key: String,
    /// Rust type name (e.g., `"i64"`).
    pub type_name: &'static str,
    /// Whether the property is required (no default and not `Option`).
    pub required: bool,
    /// Default value as a string, if any.
    pub default_value: Option<String>,
    /// Description from doc comments.
    pub description: Option<String>,
    /// Whether this entry is itself a nested section rather than a leaf value.
    pub is_section: bool,
    /// Explicit environment variable override, if any.
    pub env_var: Option<String>,
}

/// Trait for strongly-typed configuration sections.
///
/// Implemented by hand for each section (the host framework's
/// `#[derive(ConfigProperties)]` macro is not carried over — Helene has
/// one fixed top-level `ServerConfig`, not an open set of injectable
/// sections, so a derive macro buys nothing here).
pub trait ConfigProperties: Sized {
    /// The configuration key prefix (e.g., `"helene"`).
    fn prefix() -> &'static str;

    /// Metadata about all expected properties.
    fn properties_metadata() -> Vec<PropertyMeta>;

    /// Construct from a `HeleneConfig` instance.
    fn from_config(config: &HeleneConfig) -> Result<Self, ConfigError>;
}
