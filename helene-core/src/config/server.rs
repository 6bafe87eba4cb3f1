use super::{ConfigError, ConfigProperties, HeleneConfig, PropertyMeta};

/// Typed view over the `helene.*` configuration section (§6 of the design).
///
/// Hand-implements [`ConfigProperties`] rather than deriving it — there is
/// exactly one top-level section in this server, so a derive macro would
/// only add indirection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means "reject all cross-origin requests".
    pub origins: Vec<String>,
    pub rate_limit_max: u32,
    pub rate_limit_window_ms: u64,
    /// Consecutive rate-limit violations from one node before it is force-closed (§4.4).
    pub rate_limit_max_violations: u32,
    pub heartbeat_interval_ms: u64,
    pub termination_factor: u32,
    /// Redis URL for the cluster bus adapter; `None` disables clustering.
    pub bus_url: Option<String>,
    pub bus_namespace: String,
    pub method_cache_capacity: usize,
    /// Whether this node should register itself for global lookup (§6 `globalInstance`).
    pub global_instance: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            origins: Vec::new(),
            rate_limit_max: 120,
            rate_limit_window_ms: 60_000,
            rate_limit_max_violations: 5,
            heartbeat_interval_ms: 10_000,
            termination_factor: 2,
            bus_url: None,
            bus_namespace: "helene".to_string(),
            method_cache_capacity: 1_000,
            global_instance: false,
        }
    }
}

impl ConfigProperties for ServerConfig {
    fn prefix() -> &'static str {
        "helene"
    }

    fn properties_metadata() -> Vec<PropertyMeta> {
        let d = ServerConfig::default();
        vec![
            leaf("host", "String", false, Some(d.host.clone()), "bind address"),
            leaf("port", "u16", false, Some(d.port.to_string()), "bind port"),
            leaf(
                "rate_limit.max",
                "u32",
                false,
                Some(d.rate_limit_max.to_string()),
                "requests allowed per window per remote address",
            ),
            leaf(
                "rate_limit.window_ms",
                "u64",
                false,
                Some(d.rate_limit_window_ms.to_string()),
                "sliding window length in milliseconds",
            ),
            leaf(
                "rate_limit.max_violations",
                "u32",
                false,
                Some(d.rate_limit_max_violations.to_string()),
                "consecutive rate-limit violations before a node is force-closed",
            ),
            leaf(
                "heartbeat_interval_ms",
                "u64",
                false,
                Some(d.heartbeat_interval_ms.to_string()),
                "server ping interval",
            ),
            leaf(
                "termination_factor",
                "u32",
                false,
                Some(d.termination_factor.to_string()),
                "multiple of heartbeat_interval_ms before an unresponsive node is reaped",
            ),
            leaf("bus.url", "String", false, None, "Redis URL for cluster fan-out; unset disables clustering"),
            leaf(
                "bus.namespace",
                "String",
                false,
                Some(d.bus_namespace.clone()),
                "channel namespace prefix on the bus",
            ),
            leaf(
                "method_cache.capacity",
                "usize",
                false,
                Some(d.method_cache_capacity.to_string()),
                "max entries kept in the method result cache",
            ),
            leaf(
                "global_instance",
                "bool",
                false,
                Some(d.global_instance.to_string()),
                "register this server for process-wide lookup",
            ),
        ]
    }

    fn from_config(config: &HeleneConfig) -> Result<Self, ConfigError> {
        let d = ServerConfig::default();
        Ok(ServerConfig {
            host: config.get_or("helene.host", d.host),
            port: config.get_or::<i64>("helene.port", d.port as i64) as u16,
            origins: config.get_or("helene.origins", Vec::new()),
            rate_limit_max: config.get_or::<i64>("helene.rate_limit.max", d.rate_limit_max as i64) as u32,
            rate_limit_window_ms: config
                .get_or::<i64>("helene.rate_limit.window_ms", d.rate_limit_window_ms as i64)
                as u64,
            rate_limit_max_violations: config
                .get_or::<i64>("helene.rate_limit.max_violations", d.rate_limit_max_violations as i64)
                as u32,
            heartbeat_interval_ms: config
                .get_or::<i64>("helene.heartbeat_interval_ms", d.heartbeat_interval_ms as i64)
                as u64,
            termination_factor: config
                .get_or::<i64>("helene.termination_factor", d.termination_factor as i64)
                as u32,
            bus_url: config.get("helene.bus.url").ok(),
            bus_namespace: config.get_or("helene.bus.namespace", d.bus_namespace),
            method_cache_capacity: config
                .get_or::<i64>("helene.method_cache.capacity", d.method_cache_capacity as i64)
                as usize,
            global_instance: config.get_or("helene.global_instance", d.global_instance),
        })
    }
}

fn leaf(
    key: &str,
    type_name: &'static str,
    required: bool,
    default_value: Option<String>,
    description: &str,
) -> PropertyMeta {
    PropertyMeta {
        key: key.to_string(),
        full_key: format!("helene.{key}"),
        type_name,
        required,
        default_value,
        description: Some(description.to_string()),
        is_section: false,
        env_var: None,
    }
}
