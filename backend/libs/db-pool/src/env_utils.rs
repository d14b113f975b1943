//! Environment variable parsing helpers shared by service configs.

use std::str::FromStr;

/// Parse an environment variable, falling back to `default` when it is
/// missing or does not parse.
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse an environment variable, returning `None` if missing or invalid.
pub fn parse_env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Boolean flag: `1`/`true`/`yes` (any case) are true, `0`/`false`/`no` are false.
pub fn parse_env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_parse_env_with_default() {
        let result: u32 = parse_env_with_default("LIKES_NONEXISTENT_VAR", 42);
        assert_eq!(result, 42);

        std::env::set_var("LIKES_TEST_PORT", "8080");
        let result: u16 = parse_env_with_default("LIKES_TEST_PORT", 3000);
        assert_eq!(result, 8080);
        std::env::remove_var("LIKES_TEST_PORT");
    }

    #[test]
    #[serial_test::serial]
    fn test_parse_env_optional() {
        assert_eq!(parse_env_optional::<u64>("LIKES_NONEXISTENT_VAR"), None);

        std::env::set_var("LIKES_TEST_OPT", "123");
        assert_eq!(parse_env_optional::<u64>("LIKES_TEST_OPT"), Some(123));
        std::env::set_var("LIKES_TEST_OPT", "abc");
        assert_eq!(parse_env_optional::<u64>("LIKES_TEST_OPT"), None);
        std::env::remove_var("LIKES_TEST_OPT");
    }

    #[test]
    #[serial_test::serial]
    fn test_parse_env_flag() {
        std::env::remove_var("LIKES_TEST_FLAG");
        assert!(parse_env_flag("LIKES_TEST_FLAG", true));

        std::env::set_var("LIKES_TEST_FLAG", "FALSE");
        assert!(!parse_env_flag("LIKES_TEST_FLAG", true));
        std::env::set_var("LIKES_TEST_FLAG", "1");
        assert!(parse_env_flag("LIKES_TEST_FLAG", false));
        std::env::set_var("LIKES_TEST_FLAG", "maybe");
        assert!(!parse_env_flag("LIKES_TEST_FLAG", false));
        std::env::remove_var("LIKES_TEST_FLAG");
    }
}
