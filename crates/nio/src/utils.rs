//! Small helpers shared across the crate.

/// Returns `Err($error)` from the enclosing function unless `$predicate`
/// holds.
///
/// ```ignore
/// ensure!(state.status == Status::Open, HttpError::ConnectionClosed);
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
