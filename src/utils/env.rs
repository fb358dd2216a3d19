//! Environment variable helpers for configuration overrides

/// Environment variable as Option
///
/// Returns `None` when unset or not valid unicode.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Environment variable as boolean
///
/// "true", "1", "yes" and "on" (case-insensitive) are true; anything else,
/// or an unset variable, is false.
pub fn env_bool(key: &str) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false)
}

/// Environment variable parsed as `T`
///
/// Returns `None` if unset or unparseable.
pub fn env_int<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env_opt(key)?.trim().parse().ok()
}
