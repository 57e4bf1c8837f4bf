//! User-visible notifications (toasts).
//!
//! Sinks are fire-and-forget: callers never learn whether anyone saw the
//! message.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub variant: Variant,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: Variant::Default,
            created_at: Utc::now(),
        }
    }

    pub fn failure(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            variant: Variant::Destructive,
            ..Self::success(title, description)
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notifications to the log.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        match n.variant {
            Variant::Default => tracing::info!(title = %n.title, "{}", n.description),
            Variant::Destructive => tracing::warn!(title = %n.title, "{}", n.description),
        }
    }
}

/// Fans notifications out to subscribers and keeps the latest few for
/// clients that poll.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
    recent: Arc<Mutex<VecDeque<Notification>>>,
    keep: usize,
}

impl BroadcastNotifier {
    pub fn new(keep: usize) -> Self {
        let (tx, _) = broadcast::channel(keep.max(1) * 2);
        Self {
            tx,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(keep))),
            keep,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Newest last.
    pub fn recent(&self) -> Vec<Notification> {
        let recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        recent.iter().cloned().collect()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, n: Notification) {
        TracingNotifier.notify(n.clone());
        {
            let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
            recent.push_back(n.clone());
            while recent.len() > self.keep {
                recent.pop_front();
            }
        }
        // no receivers is fine
        let _ = self.tx.send(n);
    }
}
