use std::collections::HashMap;
use std::env;

use crate::error::ResolverError;
use crate::traits::KeyResolver;

const ENV_PREFIX: &str = "env:";

/// Resolves credentials from environment variables.
/// Values are read at call time and never cached.
#[derive(Debug, Default)]
pub struct EnvResolver;

impl EnvResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a source naming exactly one variable, e.g. `env:PRESS_API_KEY`
    pub fn resolve_single(&self, source: &str) -> Result<String, ResolverError> {
        let mut resolved = self.resolve(source)?;
        if resolved.len() != 1 {
            return Err(ResolverError::UnsupportedSource(format!(
                "expected exactly one variable, got {}",
                resolved.len()
            )));
        }
        let var = resolved.keys().next().cloned().unwrap_or_default();
        resolved
            .remove(&var)
            .ok_or(ResolverError::MissingKey(var))
    }
}

impl KeyResolver for EnvResolver {
    /// Parses "env:VAR1,VAR2" and returns non-empty values from the environment
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError> {
        let vars = source.strip_prefix(ENV_PREFIX).ok_or_else(|| {
            ResolverError::UnsupportedSource(format!("expected 'env:' prefix, got: {}", source))
        })?;

        let mut result = HashMap::new();
        for var in vars.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            match env::var(var) {
                Ok(value) if !value.trim().is_empty() => {
                    result.insert(var.to_string(), value);
                }
                _ => return Err(ResolverError::MissingKey(var.to_string())),
            }
        }

        if result.is_empty() {
            return Err(ResolverError::UnsupportedSource("empty env source".to_string()));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_single_credential() {
        env::set_var("PRESSMON_TEST_KEY_A", "abc123");

        let resolver = EnvResolver::new();
        let key = resolver.resolve_single("env:PRESSMON_TEST_KEY_A").unwrap();
        assert_eq!(key, "abc123");

        env::remove_var("PRESSMON_TEST_KEY_A");
    }

    #[test]
    fn test_resolve_multiple_vars() {
        env::set_var("PRESSMON_TEST_KEY_B", "one");
        env::set_var("PRESSMON_TEST_KEY_C", "two");

        let resolver = EnvResolver::new();
        let result = resolver
            .resolve("env:PRESSMON_TEST_KEY_B, PRESSMON_TEST_KEY_C")
            .unwrap();
        assert_eq!(result.get("PRESSMON_TEST_KEY_B"), Some(&"one".to_string()));
        assert_eq!(result.get("PRESSMON_TEST_KEY_C"), Some(&"two".to_string()));

        assert!(matches!(
            resolver.resolve_single("env:PRESSMON_TEST_KEY_B,PRESSMON_TEST_KEY_C"),
            Err(ResolverError::UnsupportedSource(_))
        ));

        env::remove_var("PRESSMON_TEST_KEY_B");
        env::remove_var("PRESSMON_TEST_KEY_C");
    }

    #[test]
    fn test_blank_value_is_missing() {
        env::set_var("PRESSMON_TEST_KEY_BLANK", "  ");

        let resolver = EnvResolver::new();
        match resolver.resolve_single("env:PRESSMON_TEST_KEY_BLANK") {
            Err(ResolverError::MissingKey(var)) => assert_eq!(var, "PRESSMON_TEST_KEY_BLANK"),
            other => panic!("Expected MissingKey, got {:?}", other),
        }

        env::remove_var("PRESSMON_TEST_KEY_BLANK");
    }

    #[test]
    fn test_missing_var() {
        let resolver = EnvResolver::new();
        let result = resolver.resolve("env:PRESSMON_NONEXISTENT_12345");
        assert!(matches!(result, Err(ResolverError::MissingKey(_))));
    }

    #[test]
    fn test_invalid_source() {
        let resolver = EnvResolver::new();
        assert!(resolver.resolve("vault:secret/press").is_err());
        assert!(resolver.resolve("env:").is_err());
    }
}
