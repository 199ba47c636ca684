//! Notification listeners.
//!
//! Any `Fn(Notification) -> impl Future<Output = anyhow::Result<()>>` closure
//! is a listener. Each registered listener is driven by its own task that
//! receives notifications in socket order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::protocol::Notification;

pub type ListenerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Receiver of server-pushed notifications
pub trait NotificationListener: Send + Sync + 'static {
    fn on_notification(&self, notification: Notification) -> ListenerFuture;
}

impl<F, Fut> NotificationListener for F
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn on_notification(&self, notification: Notification) -> ListenerFuture {
        Box::pin(self(notification))
    }
}

/// Drive one listener until its channel closes or `cancel` fires.
///
/// A failing invocation is logged and the next notification is still
/// delivered.
pub(crate) async fn run_listener(
    listener: Arc<dyn NotificationListener>,
    mut rx: mpsc::UnboundedReceiver<Notification>,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(notification) => notification,
                None => break,
            },
        };

        let method = notification.method.clone();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = listener.on_notification(notification) => {
                if let Err(e) = result {
                    error!("got exception during invoke callback \"{}\": {:#}", method, e);
                }
            }
        }
    }
}
