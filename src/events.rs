//! Observer fan-out used for lifecycle callbacks.
//!
//! Subscribers are notified one after another in registration order. A
//! subscriber that returns an error or panics is logged and skipped; it never
//! reaches the publisher or the subscribers registered after it.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback failed: {0}")]
    Failed(String),
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        CallbackError::Failed(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        CallbackError::Failed(message.to_string())
    }
}

#[async_trait]
pub trait Subscriber<E: Send + Sync + 'static>: Send + Sync {
    async fn notify(&self, event: &E) -> Result<(), CallbackError>;
}

#[async_trait]
impl<E, F, Fut> Subscriber<E> for F
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    async fn notify(&self, event: &E) -> Result<(), CallbackError> {
        (self)(event.clone()).await
    }
}

pub struct Subscribers<E: Send + Sync + 'static> {
    inner: RwLock<Vec<Arc<dyn Subscriber<E>>>>,
}

impl<E: Send + Sync + 'static> Default for Subscribers<E> {
    fn default() -> Self {
        Self { inner: RwLock::new(Vec::new()) }
    }
}

impl<E: Send + Sync + 'static> Subscribers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<E> + 'static,
    {
        self.inner.write().await.push(Arc::new(subscriber));
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Notifies every subscriber and returns how many of them failed.
    pub async fn notify_all(&self, kind: &str, event: &E) -> usize {
        // Snapshot so a subscriber may register further subscribers without deadlocking.
        let subscribers = self.inner.read().await.clone();
        let mut failures = 0;
        for (index, subscriber) in subscribers.iter().enumerate() {
            match AssertUnwindSafe(subscriber.notify(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!(kind, index, error = %e, "Subscriber returned an error");
                }
                Err(panic) => {
                    failures += 1;
                    tracing::error!(kind, index, panic = %panic_message(panic.as_ref()), "Subscriber panicked");
                }
            }
        }
        failures
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_failing_subscriber_does_not_stop_fan_out() {
        let subscribers: Subscribers<u32> = Subscribers::new();
        let seen = Arc::new(AtomicUsize::new(0));

        subscribers
            .subscribe(|_n: u32| async move { Err::<(), CallbackError>("boom".into()) })
            .await;
        subscribers
            .subscribe(|n: u32| async move {
                if n > 0 {
                    panic!("subscriber blew up");
                }
                Ok::<(), CallbackError>(())
            })
            .await;
        let counter = seen.clone();
        subscribers
            .subscribe(move |n: u32| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(n as usize, Ordering::SeqCst);
                    Ok::<(), CallbackError>(())
                }
            })
            .await;

        let failures = subscribers.notify_all("test", &3).await;
        assert_eq!(failures, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(subscribers.len().await, 3);
    }
}
