use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Alert;

pub const DEFAULT_ALERT_QUEUE: usize = 256;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound alert sink (chat bot, webhook, log)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str, tags: &[String]) -> Result<(), NotifyError>;

    fn name(&self) -> &str {
        "notifier"
    }
}

/// Writes alerts to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str, tags: &[String]) -> Result<(), NotifyError> {
        tracing::warn!(tags = ?tags, "📣 {}", message);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Fire-and-forget handle to a background delivery task.
///
/// Scan loops never wait on the notifier: alerts are queued with `try_send`
/// and dropped with a warning when the queue is full or the task is gone.
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<Alert>,
}

impl AlertDispatcher {
    /// Spawn the delivery task. It exits once every dispatcher clone is dropped.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Alert>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if let Err(e) = notifier.send(&alert.message, &alert.tags).await {
                    tracing::error!(
                        notifier = notifier.name(),
                        "Failed to deliver alert ({}): {}",
                        alert.kind.tag(),
                        e
                    );
                }
            }
            tracing::debug!("Alert delivery task stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue an alert; returns false if it was dropped
    pub fn dispatch(&self, alert: Alert) -> bool {
        match self.tx.try_send(alert) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(alert)) => {
                tracing::warn!("Alert queue full, dropping: {}", alert.message);
                false
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                tracing::warn!("Alert task stopped, dropping: {}", alert.message);
                false
            }
        }
    }
}
