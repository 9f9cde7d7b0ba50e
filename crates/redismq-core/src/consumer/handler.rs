use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::AbortHandle;

use crate::error::HandlerError;
use crate::message::Message;

/// Queue-specific processing logic plugged into a consumer.
///
/// Returning `Ok` acknowledges the message. An error, a panic or running
/// past the consume timeout all count as one failed attempt.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self.0)(message).await
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run the handler on its own task, bounded by `timeout`.
///
/// Exactly one outcome is produced: once the timeout fires the handler task
/// is aborted and a late completion is never observed.
pub(crate) async fn dispatch(
    handler: Arc<dyn MessageHandler>,
    message: Message,
    timeout: Option<Duration>,
) -> Result<(), HandlerError> {
    let task = tokio::spawn(async move { handler.handle(message).await });
    let _guard = AbortOnDrop(task.abort_handle());

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(HandlerError::new(format!(
                    "consumer timed out after {}ms",
                    limit.as_millis()
                )))
            }
        },
        None => task.await,
    };
    match joined {
        Ok(result) => result,
        Err(err) => Err(HandlerError::new(format!("handler panicked: {err}"))),
    }
}
