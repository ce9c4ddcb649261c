//! Fixed pools of ordered worker lanes.
//!
//! Each lane is one bounded queue drained by exactly one task, so items that
//! hash to the same lane are handled strictly in enqueue order. A full queue
//! makes `dispatch` wait; nothing is dropped on the producer side.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::partition::lane_index;
use crate::error::PipelineError;

#[async_trait]
pub trait LaneHandler<T: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, item: T) -> Result<(), PipelineError>;
}

pub struct LanePool<T> {
    name: &'static str,
    senders: Vec<mpsc::Sender<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> LanePool<T> {
    /// Spawn `lanes` workers onto the current tokio runtime.
    pub fn spawn<H: LaneHandler<T>>(
        name: &'static str,
        lanes: usize,
        capacity: usize,
        handler: Arc<H>,
    ) -> Self {
        let mut senders = Vec::with_capacity(lanes);
        let mut workers = Vec::with_capacity(lanes);
        for lane in 0..lanes {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            workers.push(tokio::spawn(run_lane(name, lane, rx, handler.clone())));
        }
        tracing::info!(
            name = "pipeline.lanes_started",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            pool = name,
            lanes,
            capacity,
            message = "lane pool started"
        );
        Self {
            name,
            senders,
            workers,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lanes(&self) -> usize {
        self.senders.len()
    }

    pub fn lane_for(&self, key: &str) -> usize {
        lane_index(key, self.senders.len())
    }

    /// Enqueue `item` on the lane owning `key`, waiting while that lane is full.
    pub async fn dispatch(&self, key: &str, item: T) -> Result<usize, PipelineError> {
        let lane = self.lane_for(key);
        self.senders[lane]
            .send(item)
            .await
            .map_err(|_| PipelineError::LaneClosed(self.name))?;
        Ok(lane)
    }

    /// Close every queue and wait for the workers to drain what is left.
    pub async fn shutdown(self) {
        drop(self.senders);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn run_lane<T, H>(name: &'static str, lane: usize, mut rx: mpsc::Receiver<T>, handler: Arc<H>)
where
    T: Send + 'static,
    H: LaneHandler<T>,
{
    while let Some(item) = rx.recv().await {
        match AssertUnwindSafe(handler.handle(item)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    name = "pipeline.item_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    pool = name,
                    lane,
                    error = %e,
                    message = "dropping item after handler error"
                );
            }
            Err(payload) => {
                let fault = PipelineError::Fault(describe_panic(payload.as_ref()));
                let backtrace = Backtrace::force_capture();
                tracing::error!(
                    name = "pipeline.item_fault",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    pool = name,
                    lane,
                    error = %fault,
                    backtrace = %backtrace,
                    message = "recovered from fault, dropping item"
                );
            }
        }
    }
    tracing::debug!(pool = name, lane, "lane closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl LaneHandler<(String, u32)> for Recorder {
        async fn handle(&self, item: (String, u32)) -> Result<(), PipelineError> {
            if item.1 == 13 {
                panic!("unlucky item");
            }
            if item.1 == 7 {
                return Err(PipelineError::MalformedMessage("seven".into()));
            }
            self.seen.lock().unwrap().push(item);
            Ok(())
        }
    }

    #[tokio::test]
    async fn items_for_one_key_keep_their_order() {
        let recorder = Arc::new(Recorder::default());
        let pool = LanePool::spawn("test", 4, 2, recorder.clone());
        for i in 0..50 {
            for key in ["a", "b", "c"] {
                pool.dispatch(key, (key.to_string(), 100 + i)).await.unwrap();
            }
        }
        pool.shutdown().await;

        let seen = recorder.seen.lock().unwrap();
        for key in ["a", "b", "c"] {
            let order: Vec<u32> = seen.iter().filter(|(k, _)| k == key).map(|(_, n)| *n).collect();
            assert_eq!(order, (100..150).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn lane_survives_errors_and_panics() {
        let recorder = Arc::new(Recorder::default());
        let pool = LanePool::spawn("test", 1, 8, recorder.clone());
        for n in [1, 7, 13, 2] {
            pool.dispatch("k", ("k".to_string(), n)).await.unwrap();
        }
        pool.shutdown().await;

        let seen: Vec<u32> = recorder.seen.lock().unwrap().iter().map(|(_, n)| *n).collect();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn same_key_always_picks_same_lane() {
        let pool = LanePool::spawn("test", 16, 1, Arc::new(Recorder::default()));
        assert_eq!(pool.lane_for("!room:local"), pool.lane_for("!room:local"));
        assert_eq!(pool.lanes(), 16);
        pool.shutdown().await;
    }
}
