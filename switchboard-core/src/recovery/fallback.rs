//! Fallback execution
//!
//! Substitute an alternative operation or a default value when the
//! primary one fails.

use crate::providers::error::{ProviderError, ProviderResult};
use std::future::Future;
use tracing::warn;

/// Run `primary`; on any failure run `alternative` instead.
pub async fn fallback<T, P, PF, A, AF>(primary: P, alternative: A) -> ProviderResult<T>
where
    P: FnOnce() -> PF,
    PF: Future<Output = ProviderResult<T>>,
    A: FnOnce() -> AF,
    AF: Future<Output = ProviderResult<T>>,
{
    match primary().await {
        Ok(value) => Ok(value),
        Err(error) => {
            warn!(%error, "primary operation failed, running fallback");
            alternative().await
        }
    }
}

/// Run `primary`; on a failure matching `predicate` run `alternative`,
/// otherwise propagate the error.
pub async fn fallback_if<T, P, PF, A, AF>(
    primary: P,
    predicate: impl FnOnce(&ProviderError) -> bool,
    alternative: A,
) -> ProviderResult<T>
where
    P: FnOnce() -> PF,
    PF: Future<Output = ProviderResult<T>>,
    A: FnOnce() -> AF,
    AF: Future<Output = ProviderResult<T>>,
{
    match primary().await {
        Ok(value) => Ok(value),
        Err(error) if predicate(&error) => {
            warn!(%error, "primary operation failed, running fallback");
            alternative().await
        }
        Err(error) => Err(error),
    }
}

/// Run `primary`; on any failure return `default` instead of propagating.
pub async fn fallback_value<T, P, PF>(primary: P, default: T) -> T
where
    P: FnOnce() -> PF,
    PF: Future<Output = ProviderResult<T>>,
{
    match primary().await {
        Ok(value) => value,
        Err(error) => {
            warn!(%error, "primary operation failed, substituting default value");
            default
        }
    }
}
