//! Configurator error taxonomy.
//!
//! Precondition failures are returned before anything reaches the
//! dataplane. Dataplane failures from independent follow-up calls are
//! collected into an [`ErrorList`] and returned together once every step
//! has been attempted.

use std::fmt;
use thiserror::Error;
use vswitch_dpapi::ApiError;

/// Error type for configurator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Malformed or incomplete desired configuration.
    #[error("invalid config for {resource}: {reason}")]
    InvalidConfig { resource: String, reason: String },

    /// A dataplane call for this resource failed.
    #[error("{resource}: {source}")]
    Dataplane {
        resource: String,
        #[source]
        source: ApiError,
    },

    /// The dataplane does not speak the messages this configurator needs.
    #[error("incompatible dataplane for {configurator}: {source}")]
    Incompatible {
        configurator: String,
        #[source]
        source: ApiError,
    },

    /// A resource expected to be known was not found.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Reading or writing persisted state failed.
    #[error("persistence error for {path}: {reason}")]
    Persistence { path: String, reason: String },

    /// Several independent steps failed.
    #[error("{0}")]
    Multiple(ErrorList),
}

impl ConfigError {
    /// Creates a precondition error.
    pub fn invalid(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidConfig {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Creates a dataplane error for the given resource.
    pub fn dataplane(resource: impl Into<String>, source: ApiError) -> Self {
        ConfigError::Dataplane {
            resource: resource.into(),
            source,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ConfigError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns true if this is a precondition error.
    pub fn is_precondition(&self) -> bool {
        matches!(self, ConfigError::InvalidConfig { .. })
    }

    /// Returns the number of individual failures represented.
    pub fn failure_count(&self) -> usize {
        match self {
            ConfigError::Multiple(list) => list.len(),
            _ => 1,
        }
    }
}

/// Result type for configurator operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Ordered collection of failures from best-effort steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorList(Vec<ConfigError>);

impl ErrorList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds an error. Nested lists are flattened.
    pub fn push(&mut self, error: ConfigError) {
        match error {
            ConfigError::Multiple(list) => self.0.extend(list.0),
            other => self.0.push(other),
        }
    }

    /// Records the error of a failed step, passing a success value through.
    pub fn record<T>(&mut self, result: ConfigResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// Appends every error of another list.
    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigError> {
        self.0.iter()
    }

    /// Returns `Ok` for no errors, the error itself for one, and
    /// [`ConfigError::Multiple`] otherwise.
    pub fn into_result(mut self) -> ConfigResult<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(ConfigError::Multiple(self)),
        }
    }

    /// Flattens a result into its individual errors.
    pub fn from_result(result: ConfigResult<()>) -> Self {
        let mut list = ErrorList::new();
        list.record(result);
        list
    }
}

impl IntoIterator for ErrorList {
    type Item = ConfigError;
    type IntoIter = std::vec::IntoIter<ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors:", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            write!(f, " [{}] {}", i + 1, e)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vswitch_dpapi::ApiStatus;

    #[test]
    fn test_into_result_shapes() {
        assert!(ErrorList::new().into_result().is_ok());

        let mut one = ErrorList::new();
        one.push(ConfigError::invalid("loop1", "missing name"));
        assert!(one.into_result().unwrap_err().is_precondition());

        let mut two = ErrorList::new();
        two.push(ConfigError::invalid("loop1", "missing name"));
        two.push(ConfigError::dataplane(
            "loop1",
            ApiError::status("sw_interface_set_mtu", ApiStatus::InvalidValue),
        ));
        let err = two.into_result().unwrap_err();
        assert_eq!(err.failure_count(), 2);
        assert!(err.to_string().starts_with("2 errors:"));
    }

    #[test]
    fn test_nested_lists_flatten() {
        let mut inner = ErrorList::new();
        inner.push(ConfigError::not_found("interface", "a"));
        inner.push(ConfigError::not_found("interface", "b"));

        let mut outer = ErrorList::new();
        outer.push(ConfigError::Multiple(inner));
        outer.push(ConfigError::not_found("interface", "c"));
        assert_eq!(outer.len(), 3);
    }

    #[test]
    fn test_record_passes_values() {
        let mut errors = ErrorList::new();
        assert_eq!(errors.record(Ok::<_, ConfigError>(5)), Some(5));
        assert_eq!(
            errors.record(Err::<u32, _>(ConfigError::not_found("key", "1"))),
            None
        );
        assert_eq!(errors.len(), 1);
    }
}
