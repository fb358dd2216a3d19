//! Lock helpers for async contexts

use tokio::sync::Mutex;

/// Run `f` with the mutex held, releasing it before returning
///
/// Keeps the critical section synchronous, so no lock is held across an
/// await point.
pub async fn with_lock<T, F, R>(mutex: &Mutex<T>, f: F) -> R
where
    F: FnOnce(&mut T) -> R,
{
    let mut guard = mutex.lock().await;
    f(&mut guard)
}
