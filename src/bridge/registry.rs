//! The set of connected viewers and the concurrent fan-out over it.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

pub type ViewerId = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewerPushError {
    #[error("viewer channel closed")]
    Closed,

    #[error("viewer queue full")]
    Full,

    #[error("viewer push timed out after {0:?}")]
    Timeout(Duration),
}

/// Somewhere an encoded envelope can be pushed.
#[async_trait]
pub trait ViewerSink: Send + Sync {
    async fn push(&self, frame: Arc<str>) -> Result<(), ViewerPushError>;
}

/// Sink backed by the bounded queue a viewer's writer task drains.
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ViewerSink for ChannelSink {
    async fn push(&self, frame: Arc<str>) -> Result<(), ViewerPushError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ViewerPushError::Full,
            mpsc::error::TrySendError::Closed(_) => ViewerPushError::Closed,
        })
    }
}

/// Outcome of pushing one frame to every viewer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub evicted: Vec<ViewerId>,
}

/// Concurrency-safe viewer set. Clones share the same set.
#[derive(Clone)]
pub struct ViewerRegistry {
    viewers: Arc<RwLock<HashMap<ViewerId, Arc<dyn ViewerSink>>>>,
    next_id: Arc<AtomicU64>,
    push_timeout: Duration,
}

impl ViewerRegistry {
    pub fn new(push_timeout: Duration) -> Self {
        Self {
            viewers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            push_timeout,
        }
    }

    pub async fn register(&self, sink: Arc<dyn ViewerSink>) -> ViewerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut viewers = self.viewers.write().await;
            viewers.insert(id, sink);
            viewers.len()
        };
        tracing::info!(component = "bridge", viewer_id = id, viewers = count, "Viewer connected");
        id
    }

    /// Remove a viewer. Returns false if it was already gone.
    pub async fn unregister(&self, id: ViewerId) -> bool {
        let (removed, count) = {
            let mut viewers = self.viewers.write().await;
            let removed = viewers.remove(&id).is_some();
            (removed, viewers.len())
        };
        if removed {
            tracing::info!(component = "bridge", viewer_id = id, viewers = count, "Viewer disconnected");
        }
        removed
    }

    /// Longest a single push to one viewer may take.
    pub fn push_timeout(&self) -> Duration {
        self.push_timeout
    }

    pub async fn len(&self) -> usize {
        self.viewers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.viewers.read().await.is_empty()
    }

    /// Push `frame` to every viewer registered right now.
    ///
    /// Pushes run concurrently; any viewer whose push fails or times out is
    /// evicted. Returns only after every push has settled.
    pub async fn fan_out(&self, frame: Arc<str>) -> FanOutReport {
        let snapshot: Vec<(ViewerId, Arc<dyn ViewerSink>)> = {
            let viewers = self.viewers.read().await;
            viewers.iter().map(|(id, sink)| (*id, sink.clone())).collect()
        };
        if snapshot.is_empty() {
            return FanOutReport::default();
        }

        let timeout = self.push_timeout;
        let pushes = snapshot.into_iter().map(|(id, sink)| {
            let frame = frame.clone();
            async move {
                let result = match tokio::time::timeout(timeout, sink.push(frame)).await {
                    Ok(result) => result,
                    Err(_) => Err(ViewerPushError::Timeout(timeout)),
                };
                (id, result)
            }
        });

        let mut report = FanOutReport::default();
        for (id, result) in join_all(pushes).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(component = "bridge", viewer_id = id, error = %e, "Evicting viewer");
                    report.evicted.push(id);
                }
            }
        }

        if !report.evicted.is_empty() {
            let mut viewers = self.viewers.write().await;
            for id in &report.evicted {
                viewers.remove(id);
            }
        }
        report
    }
}
