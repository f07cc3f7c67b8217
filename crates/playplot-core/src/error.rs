//! Error types following panic-free policy.

use thiserror::Error;

// ============================================================================
// Input Errors
// ============================================================================

/// Errors raised while building a session from samples, a path or a URL.
///
/// Every variant is raised before any worker is spawned, so a failing
/// constructor never leaves processes or threads behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    /// Sample data has an unusable shape (empty, ragged channels, zero rate).
    #[error("Invalid sample data: {0}")]
    InvalidShape(String),

    /// The source is malformed or cannot be reached (missing file, bad URL, HTTP 4xx).
    #[error("Invalid audio source {location}: {reason}")]
    InvalidSource { location: String, reason: String },

    /// The source was read but its contents are not a decodable audio format.
    #[error("Unreadable audio format in {location}: {reason}")]
    UnreadableFormat { location: String, reason: String },

    /// A remote source could not be fetched (connection, timeout, HTTP 5xx).
    #[error("Network failure fetching {url}: {reason}")]
    Network { url: String, reason: String },
}

/// Category of an [`InputError`], for callers that branch on the failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputErrorKind {
    InvalidShape,
    InvalidSource,
    UnreadableFormat,
    Network,
}

impl InputError {
    /// Returns the category of this error.
    pub fn kind(&self) -> InputErrorKind {
        match self {
            Self::InvalidShape(_) => InputErrorKind::InvalidShape,
            Self::InvalidSource { .. } => InputErrorKind::InvalidSource,
            Self::UnreadableFormat { .. } => InputErrorKind::UnreadableFormat,
            Self::Network { .. } => InputErrorKind::Network,
        }
    }

    pub(crate) fn invalid_source(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSource {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unreadable(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::UnreadableFormat {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Invalid session configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Field value outside its accepted range
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// Environment override could not be parsed
    #[error("Invalid value for environment variable {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

// ============================================================================
// Mapping Errors
// ============================================================================

/// Invalid time/position mapping definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    /// Fewer points than needed to interpolate
    #[error("Mapping needs at least two points, got {0}")]
    TooFewPoints(usize),

    /// Points must be strictly increasing to be invertible
    #[error("Mapping {axis} values must be strictly increasing (at index {index})")]
    NotMonotonic { axis: &'static str, index: usize },

    /// NaN or infinite coordinate
    #[error("Mapping contains a non-finite value at index {0}")]
    NonFinite(usize),

    /// Dense ticks span an empty position range
    #[error("Dense mapping range is empty ({first}..{last})")]
    EmptyRange { first: f64, last: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_kinds_are_distinct() {
        let errors = [
            InputError::InvalidShape("empty".to_string()),
            InputError::invalid_source("a.wav", "not found"),
            InputError::unreadable("a.wav", "no RIFF header"),
            InputError::network("http://x", "refused"),
        ];
        let kinds: Vec<_> = errors.iter().map(InputError::kind).collect();
        assert_eq!(
            kinds,
            vec![
                InputErrorKind::InvalidShape,
                InputErrorKind::InvalidSource,
                InputErrorKind::UnreadableFormat,
                InputErrorKind::Network,
            ]
        );
    }

    #[test]
    fn test_input_error_display() {
        let error = InputError::network("http://example.invalid/a.wav", "connection refused");
        let display = format!("{error}");
        assert!(display.contains("Network failure"));
        assert!(display.contains("http://example.invalid/a.wav"));
        assert!(display.contains("connection refused"));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::InvalidValue {
            field: "volume",
            value: "1.5".to_string(),
            expected: "a value in [0, 1]",
        };
        assert_eq!(
            format!("{error}"),
            "Invalid volume: 1.5 (expected a value in [0, 1])"
        );
    }
}
