#[cfg(not(feature = "parking-lot"))]
pub use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "parking-lot")]
pub use parking_lot::{Mutex, MutexGuard};

/// Locks `mutex`, mapping a poisoned std lock into the caller's error type.
#[cfg(not(feature = "parking-lot"))]
pub(crate) fn lock<'a, T, E>(mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, E>
where
    E: From<PoisonError<MutexGuard<'a, T>>>,
{
    Ok(mutex.lock()?)
}

/// Locks `mutex`. `parking_lot` locks cannot be poisoned.
#[cfg(feature = "parking-lot")]
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn lock<T, E>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, E> {
    Ok(mutex.lock())
}
