use std::env;

use crate::error::{HeraldError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

pub fn env_flag(key: &str) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Expand `${VAR_NAME}` references in a configuration document.
///
/// Unset variables expand to the empty string, matching shell semantics
/// for config templates. Unclosed references are an error.
pub fn expand_env(input: &str) -> Result<String> {
    substitute(input, |name| {
        Ok(env::var(name).unwrap_or_else(|_| {
            tracing::warn!(var = %name, "config references unset env var, expanding to empty");
            String::new()
        }))
    })
}

fn substitute<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Result<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(HeraldError::UnclosedEnvVar(input.to_string()));
            }
            result.push_str(&lookup(&var_name)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_basic() {
        std::env::set_var("HERALD_TEST_HOST", "example.com");
        let result = expand_env("https://${HERALD_TEST_HOST}/hook").unwrap();
        assert_eq!(result, "https://example.com/hook");
        std::env::remove_var("HERALD_TEST_HOST");
    }

    #[test]
    fn expanded_values_are_not_expanded_again() {
        std::env::set_var("HERALD_TEST_NESTED", "a${b}");
        assert_eq!(expand_env("x: ${HERALD_TEST_NESTED}").unwrap(), "x: a${b}");
        std::env::remove_var("HERALD_TEST_NESTED");
    }

    #[test]
    fn expand_env_missing_is_empty() {
        let result = expand_env("cluster: \"${HERALD_NOT_SET_67890}\"").unwrap();
        assert_eq!(result, "cluster: \"\"");
    }

    #[test]
    fn expand_env_unclosed() {
        assert!(matches!(
            expand_env("namespace: ${UNCLOSED"),
            Err(HeraldError::UnclosedEnvVar(_))
        ));
    }

    #[test]
    fn plain_dollar_is_kept() {
        assert_eq!(expand_env("cost: $5").unwrap(), "cost: $5");
    }
}
