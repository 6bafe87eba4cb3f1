use super::ConfigError;

/// Trait for secret resolution backends.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<String, ConfigError>;
}

/// Default resolver: env vars and file references.
///
/// Supports the following reference formats:
/// - `${VAR_NAME}` — resolves from environment variable
/// - `${env:VAR_NAME}` — explicit env var resolution
/// - `${file:/path/to/secret}` — reads from file (trimmed)
pub struct DefaultSecretResolver;

impl SecretResolver for DefaultSecretResolver {
    fn resolve(&self, reference: &str) -> Result<String, ConfigError> {
        if let Some(path) = reference.strip_prefix("file:") {
            std::fs::read_to_string(path.trim())
                .map(|s| s.trim().to_string())
                .map_err(|e| ConfigError::Load(format!("Secret file '{}': {}", path.trim(), e)))
        } else if let Some(var) = reference.strip_prefix("env:") {
            std::env::var(var.trim())
                .map_err(|_| ConfigError::NotFound(format!("env:{}", var.trim())))
        } else {
            std::env::var(reference.trim())
                .map_err(|_| ConfigError::NotFound(reference.trim().to_string()))
        }
    }
}

/// Resolve `${...}` placeholders in a string value.
pub fn resolve_placeholders(
    value: &str,
    resolver: &dyn SecretResolver,
) -> Result<String, ConfigError> {
    let mut result = value.to_string();
    while let Some(start) = result.find("${") {
        let end = result[start..]
            .find('}')
            .ok_or_else(|| ConfigError::Load(format!("Unclosed placeholder in: {}", value)))?;
        let reference = &result[start + 2..start + end];
        let resolved = resolver.resolve(reference)?;
        result = format!("{}{}{}", &result[..start], resolved, &result[start + end + 1..]);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_bare_env_var() {
        std::env::set_var("HELENE_SECRETS_TEST_BARE", "bare-value");
        let resolved =
            resolve_placeholders("${HELENE_SECRETS_TEST_BARE}", &DefaultSecretResolver).unwrap();
        assert_eq!(resolved, "bare-value");
        std::env::remove_var("HELENE_SECRETS_TEST_BARE");
    }

    #[test]
    fn resolves_explicit_env_prefix() {
        std::env::set_var("HELENE_SECRETS_TEST_EXPLICIT", "explicit-value");
        let resolved = resolve_placeholders(
            "prefix-${env:HELENE_SECRETS_TEST_EXPLICIT}-suffix",
            &DefaultSecretResolver,
        )
        .unwrap();
        assert_eq!(resolved, "prefix-explicit-value-suffix");
        std::env::remove_var("HELENE_SECRETS_TEST_EXPLICIT");
    }

    #[test]
    fn resolves_file_reference() {
        let dir = std::env::temp_dir();
        let path = dir.join("helene-secrets-test-file.txt");
        std::fs::write(&path, "file-secret\n").unwrap();
        let resolved =
            resolve_placeholders(&format!("${{file:{}}}", path.display()), &DefaultSecretResolver)
                .unwrap();
        assert_eq!(resolved, "file-secret");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_env_var_errors() {
        let err = resolve_placeholders("${HELENE_SECRETS_TEST_MISSING}", &DefaultSecretResolver);
        assert!(err.is_err());
    }

    #[test]
    fn unclosed_placeholder_errors() {
        let err = resolve_placeholders("${unterminated", &DefaultSecretResolver);
        assert!(matches!(err, Err(ConfigError::Load(_))));
    }
}
