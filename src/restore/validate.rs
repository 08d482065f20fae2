use crate::config::env::StackEnv;
use crate::config::model::EnvKeys;
use crate::error::{Result, VaultError};

const MIN_KEY_LEN: usize = 16;

pub fn is_base64_like(value: &str) -> bool {
    value.len() >= MIN_KEY_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-'))
}

/// The archived `.env` must carry a non-empty encryption key. Returns warnings
/// for keys that do not look like generated base64 material.
pub fn validate_env_backup(env: &StackEnv, keys: &EnvKeys) -> Result<Vec<String>> {
    let Some(key) = env.encryption_key(keys) else {
        return Err(VaultError::message(format!(
            "archived environment has no {} value",
            keys.encryption_key
        )));
    };
    let mut warnings = Vec::new();
    if !is_base64_like(key) {
        warnings.push(format!(
            "{} in archived environment does not look like a base64 key",
            keys.encryption_key
        ));
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    #[test]
    fn key_shapes() {
        assert!(is_base64_like("c2VjcmV0LWtleS1tYXRlcmlhbA=="));
        assert!(is_base64_like("abcdEFGH1234-_+/"));
        assert!(!is_base64_like("short"));
        assert!(!is_base64_like("has spaces in the key value"));
    }

    #[test]
    fn missing_key_is_fatal() {
        let keys = test_config().env_keys;
        let env = StackEnv::from_pairs([("DOMAIN", "app.example.com")]);
        assert!(validate_env_backup(&env, &keys).is_err());
        let env = StackEnv::from_pairs([("ENCRYPTION_KEY", "  ")]);
        assert!(validate_env_backup(&env, &keys).is_err());
    }

    #[test]
    fn odd_key_is_a_warning() {
        let keys = test_config().env_keys;
        let env = StackEnv::from_pairs([("ENCRYPTION_KEY", "changeme")]);
        let warnings = validate_env_backup(&env, &keys).expect("valid");
        assert_eq!(warnings.len(), 1);
        let env = StackEnv::from_pairs([("ENCRYPTION_KEY", "c2VjcmV0LWtleS1tYXRlcmlhbA==")]);
        assert!(validate_env_backup(&env, &keys).expect("valid").is_empty());
    }
}
