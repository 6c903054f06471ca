/// Builds a [`crate::error::ConduitError`] from a kind, a static description
/// and an optional detail.
///
/// # Examples
///
/// ```
/// use conduit::conduit_error;
/// use conduit::error::ErrorKind;
///
/// let error = conduit_error!(ErrorKind::NotFound, "Workload not found");
/// let error = conduit_error!(ErrorKind::NotFound, "Workload not found", "w1");
/// ```
#[macro_export]
macro_rules! conduit_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::ConduitError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::ConduitError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::ConduitError`].
///
/// # Examples
///
/// ```
/// use conduit::bail;
/// use conduit::error::{ConduitResult, ErrorKind};
///
/// fn claim(id: &str) -> ConduitResult<()> {
///     if id.is_empty() {
///         bail!(ErrorKind::ValidationError, "Workload id is empty");
///     }
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::conduit_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::conduit_error!($kind, $desc, $detail))
    };
}
