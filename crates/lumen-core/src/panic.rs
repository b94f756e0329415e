use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Best-effort extraction of a human readable message from a panic payload.
pub fn panic_payload_to_str(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "<non-string panic payload>".to_string()
}

/// Run `f`, converting a panic into `Err(message)`.
///
/// Callbacks handed to lumen (disposers, cleanup hooks, task executors) are
/// untrusted; one broken callback must never unwind through a registry lock
/// or a worker loop.
pub fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| panic_payload_to_str(&*panic))
}
