//! Build-time errors. A `BuildError` aborts the whole feature build; no
//! partial artifact is handed out.

use thiserror::Error;

/// Rejections from the external namespace / budget service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReserveError {
    #[error("name '{0}' is already taken in the global register namespace")]
    NameCollision(String),
    #[error("synchronized-parameter budget exhausted while reserving '{0}'")]
    BudgetExhausted(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    /// A name was re-allocated within this build with a different kind or
    /// storage class.
    #[error("register '{name}': {detail}")]
    NameCollision { name: String, detail: String },

    /// A required proximity sensor is not bound for a tracked pair.
    #[error("tracked pair '{pair}' is missing required sensor '{sensor}'")]
    MissingSensor { pair: String, sensor: &'static str },

    /// A primitive was configured outside its documented numeric domain.
    #[error("'{register}' used outside its numeric domain: {detail}")]
    Domain { register: String, detail: String },

    /// The external service refused a reservation.
    #[error(transparent)]
    Broker(#[from] ReserveError),

    /// A conditional select was built with no branches.
    #[error("conditional select writing '{register}' has no branches")]
    EmptySelect { register: String },
}
