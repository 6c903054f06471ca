use std::error;
use std::fmt;

/// Result type of fallible conduit operations.
pub type ConduitResult<T> = Result<T, ConduitError>;

/// Error type shared by every conduit module.
///
/// An error is either a single [`ErrorKind`] with a static description and an
/// optional dynamic detail, or an aggregate of several errors. Callers branch on
/// [`ConduitError::kind`]; the description and detail are for humans.
#[derive(Debug, Clone)]
pub struct ConduitError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<ConduitError>),
}

/// Error categories.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Workload API errors
    Conflict,
    NotFound,
    InvalidStatusTransition,

    // Caller errors
    PreconditionFailed,
    InvalidState,
    ValidationError,
    ConfigError,

    // Collaborator errors
    StorageError,
    QueueError,
    SignalError,

    // IO & serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    Unknown,
}

impl ConduitError {
    /// Aggregates several errors into one.
    pub fn many(errors: Vec<ConduitError>) -> ConduitError {
        ConduitError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the kind of this error, or of the first aggregated error.
    ///
    /// An empty aggregate reports [`ErrorKind::Unknown`].
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every kind contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the static description, or the first one of an aggregate.
    pub fn description(&self) -> Option<&'static str> {
        match self.repr {
            ErrorRepr::WithDescription(_, desc)
            | ErrorRepr::WithDescriptionAndDetail(_, desc, _) => Some(desc),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|err| err.description()),
        }
    }

    /// Returns the dynamic detail, or the first one found in an aggregate.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|err| err.detail()),
            ErrorRepr::WithDescription(_, _) => None,
        }
    }
}

impl PartialEq for ConduitError {
    fn eq(&self, other: &ConduitError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for ConduitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => match errors.as_slice() {
                [] => write!(f, "Multiple errors occurred (empty)"),
                [error] => fmt::Display::fmt(error, f),
                errors => {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl error::Error for ConduitError {}

impl From<(ErrorKind, &'static str)> for ConduitError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> ConduitError {
        ConduitError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for ConduitError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> ConduitError {
        ConduitError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for ConduitError
where
    E: Into<ConduitError>,
{
    fn from(errors: Vec<E>) -> ConduitError {
        ConduitError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for ConduitError {
    fn from(err: std::io::Error) -> ConduitError {
        ConduitError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Syntax, data and EOF failures are deserialization errors; IO failures keep
/// their own kind.
impl From<serde_json::Error> for ConduitError {
    fn from(err: serde_json::Error) -> ConduitError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        ConduitError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Unique violations become [`ErrorKind::Conflict`]; everything else is a storage error.
impl From<sqlx::Error> for ConduitError {
    fn from(err: sqlx::Error) -> ConduitError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                (ErrorKind::Conflict, "Database unique constraint violated")
            }
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                (ErrorKind::StorageError, "Database connection unavailable")
            }
            sqlx::Error::Io(_) => (ErrorKind::IoError, "Database I/O error"),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => (
                ErrorKind::DeserializationError,
                "Database value could not be decoded",
            ),
            _ => (ErrorKind::StorageError, "Database operation failed"),
        };

        ConduitError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, conduit_error};

    #[test]
    fn test_simple_error_creation() {
        let err = ConduitError::from((ErrorKind::NotFound, "Workload not found"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.detail(), None);
        assert_eq!(err.description(), Some("Workload not found"));
        assert_eq!(err.kinds(), vec![ErrorKind::NotFound]);
    }

    #[test]
    fn test_error_with_detail() {
        let err = ConduitError::from((
            ErrorKind::InvalidStatusTransition,
            "Cannot heartbeat workload",
            "workload w1 is not yet running".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidStatusTransition);
        assert_eq!(err.detail(), Some("workload w1 is not yet running"));
    }

    #[test]
    fn test_multiple_errors() {
        let multi_err = ConduitError::many(vec![
            ConduitError::from((ErrorKind::StorageError, "State write failed")),
            ConduitError::from((
                ErrorKind::SignalError,
                "Signal failed",
                "mailbox closed".to_string(),
            )),
        ]);

        assert_eq!(multi_err.kind(), ErrorKind::StorageError);
        assert_eq!(
            multi_err.kinds(),
            vec![ErrorKind::StorageError, ErrorKind::SignalError]
        );
        assert_eq!(multi_err.detail(), Some("mailbox closed"));
    }

    #[test]
    fn test_empty_aggregate_is_unknown() {
        let err = ConduitError::many(vec![]);
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.to_string(), "Multiple errors occurred (empty)");
    }

    #[test]
    fn test_display_formats() {
        let err = ConduitError::from((ErrorKind::Conflict, "Workload already exists"));
        assert_eq!(err.to_string(), "Conflict: Workload already exists");

        let err = ConduitError::from((
            ErrorKind::Conflict,
            "Workload already exists",
            "w1".to_string(),
        ));
        assert_eq!(err.to_string(), "Conflict: Workload already exists -> w1");

        let err = ConduitError::many(vec![
            ConduitError::from((ErrorKind::NotFound, "a")),
            ConduitError::from((ErrorKind::Conflict, "b")),
        ]);
        assert_eq!(
            err.to_string(),
            "Multiple errors occurred (2 total):\n  1: NotFound: a\n  2: Conflict: b"
        );
    }

    #[test]
    fn test_equality_compares_kinds() {
        let a = ConduitError::from((ErrorKind::NotFound, "first"));
        let b = ConduitError::from((ErrorKind::NotFound, "second"));
        let c = ConduitError::from((ErrorKind::Conflict, "first"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ConduitError::from(json_err);
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }

    #[test]
    fn test_macros() {
        let err = conduit_error!(ErrorKind::QueueError, "Ack failed");
        assert_eq!(err.kind(), ErrorKind::QueueError);

        let err = conduit_error!(ErrorKind::QueueError, "Ack failed", "w1");
        assert_eq!(err.detail(), Some("w1"));

        fn failing() -> ConduitResult<()> {
            bail!(ErrorKind::PreconditionFailed, "Wrong connection", "c1");
        }
        assert_eq!(failing().unwrap_err().kind(), ErrorKind::PreconditionFailed);
    }
}
