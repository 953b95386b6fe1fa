use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Default well-known key under which a store records its root object's pid.
pub const ROOT_KEY: &str = "root";

/// Persistent identifier for a stored object.
///
/// A `Pid` is an opaque string, unique within a store for the store's whole
/// lifetime. Once assigned to an object it never changes. Pids double as
/// backing-store keys, so they are restricted to `[A-Za-z0-9._-]` and must
/// not start with a dot.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pid(String);

impl Pid {
    /// Generate a fresh, time-ordered pid.
    ///
    /// Uses UUID v7, so pids generated later sort after earlier ones. The
    /// pool relies on this only for a stable flush order, never for
    /// correctness.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Parse a pid from an existing string (e.g. a backing-store key).
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        validate(s)?;
        Ok(Self(s.to_string()))
    }

    /// The pid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short representation (first 8 characters) for logs.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

fn validate(s: &str) -> Result<(), TypeError> {
    if s.is_empty() {
        return Err(TypeError::EmptyPid);
    }
    if let Some(ch) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(TypeError::InvalidPidChar {
            pid: s.to_string(),
            ch,
        });
    }
    if s.starts_with('.') {
        return Err(TypeError::InvalidPidChar {
            pid: s.to_string(),
            ch: '.',
        });
    }
    Ok(())
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.short())
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Pid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Pid> for String {
    fn from(pid: Pid) -> Self {
        pid.0
    }
}

impl AsRef<str> for Pid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pids_are_unique() {
        let a = Pid::generate();
        let b = Pid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_pids_sort_by_creation() {
        let a = Pid::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Pid::generate();
        assert!(a < b);
    }

    #[test]
    fn generated_pid_is_a_valid_key() {
        let pid = Pid::generate();
        assert_eq!(Pid::parse(pid.as_str()).unwrap(), pid);
    }

    #[test]
    fn parse_rejects_empty() {
        assert_eq!(Pid::parse(""), Err(TypeError::EmptyPid));
    }

    #[test]
    fn parse_rejects_path_separators() {
        let err = Pid::parse("../etc").unwrap_err();
        assert!(matches!(err, TypeError::InvalidPidChar { ch: '/', .. }));
    }

    #[test]
    fn parse_rejects_leading_dot() {
        assert!(Pid::parse(".hidden").is_err());
    }

    #[test]
    fn short_is_8_chars() {
        let pid = Pid::generate();
        assert_eq!(pid.short().len(), 8);
        assert_eq!(Pid::parse("abc").unwrap().short(), "abc");
    }

    #[test]
    fn display_is_full_string() {
        let pid = Pid::parse("node-42").unwrap();
        assert_eq!(format!("{pid}"), "node-42");
        assert_eq!(format!("{pid:?}"), "Pid(node-42)");
    }

    #[test]
    fn serde_roundtrip_is_a_plain_string() {
        let pid = Pid::parse("abc123").unwrap();
        let json = serde_json::to_string(&pid).unwrap();
        assert_eq!(json, "\"abc123\"");
        let parsed: Pid = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, pid);
    }

    #[test]
    fn serde_rejects_invalid_pid() {
        let result: Result<Pid, _> = serde_json::from_str("\"a/b\"");
        assert!(result.is_err());
    }
}
