use err_derive::Error;

use infra::ids::{Entity, Id};

/// Conditions a catalog operation refuses to apply. Nothing is written when
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error(display = "no {} with id {}", _0, _1)]
    NotFound(&'static str, String),
    #[error(display = "{}", _0)]
    StructuralViolation(String),
    #[error(display = "{} cannot use {}: it would become its own ingredient", composite, via)]
    CycleDetected { composite: String, via: String },
    #[error(display = "{} is still used by {} ingredient line(s)", name, uses)]
    ReferentialConflict { name: String, uses: usize },
}

impl CatalogError {
    pub fn not_found<T: Entity>(id: &Id<T>) -> Self {
        CatalogError::NotFound(T::PREFIX, id.to_string())
    }

    pub fn violation<S: Into<String>>(reason: S) -> Self {
        CatalogError::StructuralViolation(reason.into())
    }
}

/// Pulls a `CatalogError` back out of an operation's error, if that is what it was.
pub fn catalog_error(err: &anyhow::Error) -> Option<&CatalogError> {
    err.downcast_ref::<CatalogError>()
}
