//! Variable expansion over tokens
//!
//! `$NAME` and `${NAME}` (NAME = `[A-Za-z_][A-Za-z0-9_]*`) are replaced by the
//! lookup's value. Unresolved references and an unclosed `${` stay as written.
//! Only value and positional tokens are expanded, so a variable can never turn
//! into a flag. Expanded tokens are literal, which makes a second pass a no-op.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::error::KurlError;
use crate::token::{Token, TokenKind};

/// Source of variable values.
pub trait EnvironmentLookup {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvironmentLookup for ProcessEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Resolves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnv;

impl EnvironmentLookup for NoEnv {
    fn lookup(&self, _name: &str) -> Option<String> {
        None
    }
}

impl EnvironmentLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvironmentLookup for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<T: EnvironmentLookup + ?Sized> EnvironmentLookup for &T {
    fn lookup(&self, name: &str) -> Option<String> {
        (**self).lookup(name)
    }
}

/// Explicit variables with an optional fallback lookup.
///
/// ```rust
/// use kurl::{EnvironmentLookup, VarMap};
///
/// let vars = VarMap::new().with("HOST", "example.com");
/// assert_eq!(vars.lookup("HOST").as_deref(), Some("example.com"));
/// assert_eq!(vars.lookup("MISSING"), None);
/// ```
#[derive(Default)]
pub struct VarMap {
    vars: HashMap<String, String>,
    fallback: Option<Box<dyn EnvironmentLookup + Send + Sync>>,
}

impl std::fmt::Debug for VarMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.vars.keys().collect();
        names.sort();
        f.debug_struct("VarMap")
            .field("names", &names)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Consult `fallback` for names not set explicitly.
    pub fn with_fallback(mut self, fallback: impl EnvironmentLookup + Send + Sync + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Add `NAME=VALUE` pairs. A pair without `=` is an error.
    pub fn extend_pairs<I, S>(&mut self, pairs: I) -> Result<(), KurlError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pair in pairs {
            let pair = pair.as_ref();
            let (name, value) = pair.split_once('=').ok_or_else(|| KurlError::Settings {
                path: "--var".to_string(),
                reason: format!("expected NAME=VALUE, got '{}'", name_part(pair)),
            })?;
            self.insert(name, value);
        }
        Ok(())
    }

    /// Load a dotenv file. Later files override earlier ones.
    pub fn load_env_file(&mut self, path: &Path) -> Result<(), KurlError> {
        let settings_error = |reason: String| KurlError::Settings {
            path: path.display().to_string(),
            reason,
        };
        let iter = dotenvy::from_path_iter(path).map_err(|e| settings_error(e.to_string()))?;
        let mut loaded = 0usize;
        for item in iter {
            let (name, value) = item.map_err(|e| settings_error(e.to_string()))?;
            self.insert(name, value);
            loaded += 1;
        }
        debug!(path = %path.display(), loaded, "loaded env file");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl EnvironmentLookup for VarMap {
    fn lookup(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| self.fallback.as_ref().and_then(|f| f.lookup(name)))
    }
}

// A malformed pair may be a secret; only show what precedes any whitespace.
fn name_part(pair: &str) -> &str {
    pair.split_whitespace().next().unwrap_or("")
}

/// Expand every value and positional token; flags pass through untouched.
pub fn expand(tokens: &[Token], env: &dyn EnvironmentLookup) -> Vec<Token> {
    tokens
        .iter()
        .map(|token| match token.kind() {
            TokenKind::Flag => token.clone(),
            kind if token.is_template() => {
                Token::literal(kind, expand_str(token.text(), env), token.position())
            }
            _ => token.clone(),
        })
        .collect()
}

/// `$$`, `${NAME}` or `$NAME`
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\$|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("valid placeholder regex")
});

/// Expand one template string. `$$` yields a literal `$`.
pub fn expand_str(template: &str, env: &dyn EnvironmentLookup) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let Some(name) = caps.get(1).or_else(|| caps.get(2)) else {
                return "$".to_string();
            };
            env.lookup(name.as_str())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn env() -> HashMap<String, String> {
        HashMap::from([
            ("HOST".to_string(), "x.test".to_string()),
            ("TOKEN".to_string(), "abc".to_string()),
            ("FLAG".to_string(), "-k".to_string()),
        ])
    }

    #[test]
    fn test_plain_and_braced() {
        let env = env();
        assert_eq!(expand_str("https://$HOST/a", &env), "https://x.test/a");
        assert_eq!(expand_str("${HOST}:8080", &env), "x.test:8080");
        assert_eq!(expand_str("$HOSTNAME", &env), "$HOSTNAME");
    }

    #[test]
    fn test_unresolved_and_malformed_left_verbatim() {
        let env = env();
        assert_eq!(expand_str("$MISSING ${MISSING}", &env), "$MISSING ${MISSING}");
        assert_eq!(expand_str("${HOST", &env), "${HOST");
        assert_eq!(expand_str("${1X}", &env), "${1X}");
        assert_eq!(expand_str("cost: $5", &env), "cost: $5");
        assert_eq!(expand_str("end$", &env), "end$");
    }

    #[test]
    fn test_escaped_dollar() {
        assert_eq!(expand_str("$$HOST", &env()), "$HOST");
    }

    #[test]
    fn test_single_quotes_suppress_expansion() {
        let tokens = tokenize(r#"-H 'X: $TOKEN' -H "Y: $TOKEN" https://$HOST"#).unwrap();
        let expanded = expand(&tokens, &env());
        assert_eq!(expanded[1].text(), "X: $TOKEN");
        assert_eq!(expanded[3].text(), "Y: abc");
        assert_eq!(expanded[4].text(), "https://x.test");
    }

    #[test]
    fn test_value_never_becomes_flag() {
        let tokens = tokenize("$FLAG https://x.test").unwrap();
        let expanded = expand(&tokens, &env());
        assert_eq!(expanded[0].kind(), TokenKind::PlainString);
        assert_eq!(expanded[0].text(), "-k");
    }

    #[test]
    fn test_idempotent() {
        let tokens = tokenize(r#"-d '$$TOKEN' -d "$TOKEN" https://$HOST"#).unwrap();
        let once = expand(&tokens, &env());
        let twice = expand(&once, &env());
        assert_eq!(once, twice);
        assert_eq!(once[1].text(), "$$TOKEN");
    }

    #[test]
    fn test_var_map_fallback_and_pairs() {
        let mut vars = VarMap::new().with_fallback(env());
        vars.extend_pairs(["HOST=override.test"]).unwrap();
        assert_eq!(vars.lookup("HOST").as_deref(), Some("override.test"));
        assert_eq!(vars.lookup("TOKEN").as_deref(), Some("abc"));
        assert!(vars.extend_pairs(["NOEQUALS"]).is_err());
    }

    #[test]
    fn test_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "API_HOST=api.test\n# comment\nAPI_KEY=\"k 1\"\n").unwrap();
        let mut vars = VarMap::new();
        vars.load_env_file(&path).unwrap();
        assert_eq!(vars.lookup("API_HOST").as_deref(), Some("api.test"));
        assert_eq!(vars.lookup("API_KEY").as_deref(), Some("k 1"));
    }
}
