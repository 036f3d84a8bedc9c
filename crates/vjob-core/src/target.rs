//! Target identifiers
//!
//! A target names a file or directory inside some method: `mem:/docs/a.txt`,
//! `file:///tmp/x`. Full URI syntax is someone else's problem; the engine
//! only needs the scheme (to resolve a method) and the method-relative path.

use core::fmt;

/// Scheme assumed for bare paths
pub const DEFAULT_SCHEME: &str = "file";

/// Identifier of a file or directory behind some method
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target(String);

impl Target {
    /// Wrap a target string as given by the caller
    pub fn new(raw: impl Into<String>) -> Self {
        Target(raw.into())
    }

    /// Scheme part (`mem`, `file`, …)
    pub fn scheme(&self) -> &str {
        match self.split() {
            Some((scheme, _)) => scheme,
            None => DEFAULT_SCHEME,
        }
    }

    /// Method-relative path, always starting with `/`
    pub fn path(&self) -> &str {
        let rest = match self.split() {
            Some((_, rest)) => rest,
            None => self.0.as_str(),
        };
        // file:///tmp/x → /tmp/x
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        if rest.is_empty() {
            "/"
        } else {
            rest
        }
    }

    /// Last path component, empty for the root
    pub fn name(&self) -> &str {
        let path = self.path().trim_end_matches('/');
        path.rsplit('/').next().unwrap_or("")
    }

    /// Child target `self/name`
    pub fn join(&self, name: &str) -> Target {
        let base = self.0.trim_end_matches('/');
        Target(format!("{}/{}", base, name.trim_start_matches('/')))
    }

    /// Parent target, `None` at the root
    pub fn parent(&self) -> Option<Target> {
        let path = self.path().trim_end_matches('/');
        let idx = path.rfind('/')?;
        if path.is_empty() {
            return None;
        }
        let parent_path = if idx == 0 { "/" } else { &path[..idx] };
        Some(Target(format!("{}:{}", self.scheme(), parent_path)))
    }

    /// The raw string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> Option<(&str, &str)> {
        let (scheme, rest) = self.0.split_once(':')?;
        let valid = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        valid.then_some((scheme, rest))
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::new(s)
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target(s)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", self.0)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_path() {
        let t = Target::new("mem:/docs/a.txt");
        assert_eq!(t.scheme(), "mem");
        assert_eq!(t.path(), "/docs/a.txt");
        assert_eq!(t.name(), "a.txt");

        let t = Target::new("file:///tmp/x");
        assert_eq!(t.scheme(), "file");
        assert_eq!(t.path(), "/tmp/x");
    }

    #[test]
    fn test_bare_path_defaults_to_file() {
        let t = Target::new("/etc/hosts");
        assert_eq!(t.scheme(), DEFAULT_SCHEME);
        assert_eq!(t.path(), "/etc/hosts");
    }

    #[test]
    fn test_join_and_parent() {
        let dir = Target::new("mem:/docs/");
        let child = dir.join("b.txt");
        assert_eq!(child.as_str(), "mem:/docs/b.txt");
        assert_eq!(child.parent().map(|p| p.path().to_string()), Some("/docs".into()));
        assert_eq!(Target::new("mem:/top").parent().map(|p| p.path().to_string()), Some("/".into()));
        assert_eq!(Target::new("mem:/").parent(), None);
    }
}
