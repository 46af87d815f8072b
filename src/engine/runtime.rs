//! Blocking bridge for the async client libraries
//!
//! The driver interface is synchronous, while `mysql_async` and `tokio-postgres` are
//! async. Each async driver owns a [`DriverRuntime`] and drives its futures through
//! [`DriverRuntime::block_on`].
//!
//! Callers may already be inside a tokio runtime (an async application calling the
//! manager). Blocking on a runtime from such a thread panics, so in that case the
//! future is driven from a scoped helper thread instead. Dropping the runtime never
//! blocks either.

use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};

pub(crate) struct DriverRuntime {
    handle: Handle,
    // Taken on drop
    runtime: Option<Runtime>,
}

impl DriverRuntime {
    pub(crate) fn new(thread_name: &str) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(thread_name)
            .enable_all()
            .build()?;
        Ok(Self { handle: runtime.handle().clone(), runtime: Some(runtime) })
    }

    /// Run `future` to completion on the driver's runtime
    ///
    /// Works from plain threads and from threads that are inside another tokio runtime.
    pub(crate) fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        if Handle::try_current().is_err() {
            return self.handle.block_on(future);
        }

        tracing::trace!("blocking call from async context, using a helper thread");
        let handle = &self.handle;
        std::thread::scope(|scope| {
            match scope.spawn(move || handle.block_on(future)).join() {
                Ok(output) => output,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }
}

impl Drop for DriverRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_block_on_plain_thread() {
        let runtime = DriverRuntime::new("test-plain").unwrap();
        let value = runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            42
        });
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_block_on_inside_current_thread_runtime() {
        let runtime = DriverRuntime::new("test-nested").unwrap();
        let value = runtime.block_on(async {
            let spawned = tokio::spawn(async { 7 });
            spawned.await.unwrap_or_default()
        });
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_on_inside_multi_thread_runtime() {
        let runtime = DriverRuntime::new("test-nested-mt").unwrap();
        let mut buffer = String::from("borrowed");
        let len = runtime.block_on(async {
            buffer.push('!');
            buffer.len()
        });
        assert_eq!(len, 9);
        assert_eq!(buffer, "borrowed!");
    }

    #[tokio::test]
    async fn test_drop_inside_runtime() {
        let runtime = DriverRuntime::new("test-drop").unwrap();
        runtime.block_on(async {});
        drop(runtime);
    }
}
