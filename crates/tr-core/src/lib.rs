//! Shared primitives used across Trellis crates.

use core::fmt;

/// Result alias used across the workspace.
pub type DriveResult<T> = Result<T, DriveError>;

/// Workspace error: a dotted machine-matchable code plus a human message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveError {
    pub code: &'static str,
    pub message: String,
}

impl DriveError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True when the code sits under `prefix` (`"net.fetch"` matches `"net.fetch.timeout"`).
    pub fn is_kind(&self, prefix: &str) -> bool {
        self.code == prefix
            || (self.code.starts_with(prefix)
                && self.code.as_bytes().get(prefix.len()).copied() == Some(b'.'))
    }
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for DriveError {}

/// Fresh random identifier in hyphenated UUID form.
///
/// Used for request correlation ids and history restoration identifiers.
pub fn fresh_uid() -> String {
    uuid::Uuid::new_v4().hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::DriveError;
    use super::fresh_uid;

    #[test]
    fn kind_matches_on_dotted_boundaries() {
        let error = DriveError::new("net.fetch.timeout", "slow");
        assert!(error.is_kind("net.fetch"));
        assert!(error.is_kind("net.fetch.timeout"));
        assert!(!error.is_kind("net.fet"));
        assert!(!error.is_kind("frame"));
    }

    #[test]
    fn display_includes_code() {
        let error = DriveError::new("frame.missing", "no frame `x`");
        assert_eq!(error.to_string(), "frame.missing: no frame `x`");
    }

    #[test]
    fn uids_are_unique() {
        assert_ne!(fresh_uid(), fresh_uid());
        assert_eq!(fresh_uid().len(), 36);
    }
}
