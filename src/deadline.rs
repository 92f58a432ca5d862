use std::future::Future;
use std::time::Duration;

/// Await `fut`, giving up after `limit` when one is configured.
pub(crate) async fn bounded<T, E, F>(
    limit: Option<Duration>,
    fut: F,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        },
        None => fut.await,
    }
}
