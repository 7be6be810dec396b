//! Stage environment variables

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment variables visible in a stage.
///
/// Values can reference earlier variables with `${VAR}` or `$VAR`, see
/// [`resolve`][Environment::resolve].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Environment {
    /// Environment variables as key-value pairs.
    #[serde(flatten)]
    pub vars: BTreeMap<String, String>,
}

impl Environment {
    /// Creates a new empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Inserts a variable in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Gets an environment variable by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&String> {
        self.vars.get(key)
    }

    /// Overlays `other` on top of this environment.
    #[must_use]
    pub fn merged(mut self, other: &Environment) -> Self {
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
        self
    }

    /// Returns true if no variable is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Iterates variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Resolves a value that may contain variable expansions like `${VAR}` or `$VAR`.
    ///
    /// Unknown variables are left untouched.
    #[must_use]
    pub fn resolve(&self, value: &str) -> String {
        let mut result = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(dollar) = rest.find('$') {
            result.push_str(&rest[..dollar]);
            let after = &rest[dollar + 1..];

            let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
                match braced.find('}') {
                    Some(end) => (&braced[..end], end + 2),
                    None => ("", 0),
                }
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            };

            match self.vars.get(name) {
                Some(resolved) if !name.is_empty() => {
                    result.push_str(resolved);
                    rest = &after[consumed..];
                }
                _ => {
                    result.push('$');
                    rest = after;
                }
            }
        }

        result.push_str(rest);
        result
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Returns true for names usable as `ENV`/`ARG` keys
#[must_use]
pub fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_set_get() {
        let env = Environment::new().set("NODE_ENV", "production").set("PORT", "3000");
        assert_eq!(env.get("PORT").map(String::as_str), Some("3000"));
        assert_eq!(env.len(), 2);
        assert!(env.get("DEBUG").is_none());
    }

    #[test]
    fn test_environment_merged_child_wins() {
        let parent = Environment::new().set("NODE_ENV", "development").set("PORT", "3000");
        let child = Environment::new().set("NODE_ENV", "test").set("CI", "true");
        let merged = parent.merged(&child);

        assert_eq!(merged.get("NODE_ENV").map(String::as_str), Some("test"));
        assert_eq!(merged.get("PORT").map(String::as_str), Some("3000"));
        assert_eq!(merged.get("CI").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_resolve_braced_and_bare() {
        let env = Environment::new().set("APP", "/app").set("PORT", "3000");
        assert_eq!(env.resolve("${APP}/dist"), "/app/dist");
        assert_eq!(env.resolve("$APP/logs:$PORT"), "/app/logs:3000");
    }

    #[test]
    fn test_resolve_leaves_unknown_untouched() {
        let env = Environment::new().set("APP", "/app");
        assert_eq!(env.resolve("${MISSING}/x"), "${MISSING}/x");
        assert_eq!(env.resolve("cost: $5"), "cost: $5");
        assert_eq!(env.resolve("trailing $"), "trailing $");
        assert_eq!(env.resolve("${unclosed"), "${unclosed");
    }

    #[test]
    fn test_variable_names() {
        assert!(is_valid_variable_name("NODE_ENV"));
        assert!(is_valid_variable_name("_private"));
        assert!(!is_valid_variable_name("1PORT"));
        assert!(!is_valid_variable_name("NODE-ENV"));
        assert!(!is_valid_variable_name(""));
    }
}
