use futures::channel::oneshot;
use std::future::Future;

/// Runs `work` on a dedicated thread and returns a future for its result.
///
/// The future resolves to `None` when the worker could not be started or died before
/// answering, so callers map that onto their own failure variant.
pub(crate) fn offload<T, F>(name: &'static str, work: F) -> impl Future<Output = Option<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name(format!("svgate-{name}"))
        .spawn(move || {
            let _ = tx.send(work());
        });
    if let Err(err) = spawned {
        tracing::warn!(task = name, error = %err, "failed to start worker thread");
    }

    async move { rx.await.ok() }
}
