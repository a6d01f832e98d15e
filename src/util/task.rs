use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Runs `future`, turning a panic into an `Err` carrying the panic message.
///
/// Background tasks wrap their work in this so a panic is reported to the
/// UI instead of silently killing the task.
pub async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(panic_message)
}

/// Blocking counterpart of [`catch_task_panic`] for work on a plain thread.
pub fn catch_thread_panic<F, T>(f: F) -> Result<T, String>
where
    F: FnOnce() -> T,
{
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_passes_through() {
        assert_eq!(catch_task_panic(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_panic_message_captured() {
        let result: Result<(), String> = catch_task_panic(async { panic!("boom") }).await;
        assert_eq!(result, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_formatted_panic_message_captured() {
        let n = 3;
        let result: Result<(), String> =
            catch_task_panic(async move { panic!("bad {}", n) }).await;
        assert_eq!(result, Err("bad 3".to_string()));
    }

    #[test]
    fn test_thread_panic_captured() {
        assert_eq!(catch_thread_panic(|| 1), Ok(1));
        let result: Result<(), String> = catch_thread_panic(|| panic!("worker died"));
        assert_eq!(result, Err("worker died".to_string()));
    }
}
