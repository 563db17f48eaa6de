//! Parameterized worker pools with bounded request/result queues.
//!
//! A pool runs N workers sharing one bounded request channel; results come
//! back on a bounded result channel in completion order, not submission
//! order. `add_request` blocks when the request queue is full, which
//! propagates backpressure up to the producing cursor.
//!
//! A concurrency level of 0 runs the handler inline in the caller and queues
//! results locally, which keeps small runs and tests single-threaded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::IndexError;

/// The work a pool performs for each request.
pub type PoolHandler<Req, Res> = Arc<dyn Fn(Req) -> BoxFuture<'static, Res> + Send + Sync>;
/// Optional per-worker initializer, keyed by worker index. Used to give each
/// worker its own document-store connection.
pub type PoolInit = Arc<dyn Fn(usize) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct WorkerPool<Req, Res> {
  name: String,
  request_tx: Option<mpsc::Sender<Req>>,
  result_rx: mpsc::Receiver<Res>,
  inline: Option<(PoolHandler<Req, Res>, VecDeque<Res>)>,
  handles: Vec<JoinHandle<()>>,
  cancel: CancellationToken,
  submitted: usize,
  delivered: usize,
  completed: Arc<AtomicUsize>,
}

impl<Req: Send + 'static, Res: Send + 'static> WorkerPool<Req, Res> {
  pub fn new(
    name: &str,
    workers: usize,
    queue_size: usize,
    handler: PoolHandler<Req, Res>,
    init: Option<PoolInit>,
    cancel: CancellationToken,
  ) -> Self {
    let queue_size = queue_size.max(1);
    debug!(pool = name, workers, queue_size, "Starting worker pool");

    if workers == 0 {
      let (_, result_rx) = mpsc::channel(1);
      return Self {
        name: name.to_string(),
        request_tx: None,
        result_rx,
        inline: Some((handler, VecDeque::new())),
        handles: Vec::new(),
        cancel,
        submitted: 0,
        delivered: 0,
        completed: Arc::new(AtomicUsize::new(0)),
      };
    }

    let (request_tx, request_rx) = mpsc::channel::<Req>(queue_size);
    // headroom so workers never stall handing back a finished result
    let (result_tx, result_rx) = mpsc::channel::<Res>(queue_size + workers);
    let shared_rx = Arc::new(Mutex::new(request_rx));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
      let rx = shared_rx.clone();
      let tx = result_tx.clone();
      let handler = handler.clone();
      let init = init.clone();
      let cancel = cancel.clone();
      let completed = completed.clone();
      let pool_name = name.to_string();
      handles.push(tokio::spawn(async move {
        if let Some(init) = init {
          init(worker_id).await;
        }
        loop {
          let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = async { rx.lock().await.recv().await } => request,
          };
          let Some(request) = request else { break };
          // cancellation also interrupts in-flight work and a blocked hand-back
          let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = handler(request) => result,
          };
          let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(result) => sent,
          };
          if sent.is_err() {
            break;
          }
          completed.fetch_add(1, Ordering::SeqCst);
        }
        trace!(pool = %pool_name, worker_id, "Worker exiting");
      }));
    }

    Self {
      name: name.to_string(),
      request_tx: Some(request_tx),
      result_rx,
      inline: None,
      handles,
      cancel,
      submitted: 0,
      delivered: 0,
      completed,
    }
  }

  /// Submit a request; blocks when the request queue is full.
  pub async fn add_request(&mut self, request: Req) -> Result<(), IndexError> {
    self.submitted += 1;
    match (&self.request_tx, &mut self.inline) {
      (Some(tx), _) => tx
        .send(request)
        .await
        .map_err(|_| IndexError::PoolClosed(self.name.clone())),
      (None, Some((handler, results))) => {
        let result = handler(request).await;
        results.push_back(result);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
      (None, None) => Err(IndexError::PoolClosed(self.name.clone())),
    }
  }

  /// Whether a result is ready right now. Non-blocking.
  pub fn check_for_results(&mut self) -> bool {
    if let Some((_, results)) = &self.inline {
      return !results.is_empty();
    }
    !self.result_rx.is_empty()
  }

  /// Take a ready result without waiting.
  pub fn try_result(&mut self) -> Option<Res> {
    let result = match &mut self.inline {
      Some((_, results)) => results.pop_front(),
      None => self.result_rx.try_recv().ok(),
    };
    if result.is_some() {
      self.delivered += 1;
    }
    result
  }

  /// Next result, waiting for outstanding work. `None` once every submitted
  /// request has been delivered.
  pub async fn next_result(&mut self) -> Option<Res> {
    if self.delivered >= self.submitted {
      return None;
    }
    let result = match &mut self.inline {
      Some((_, results)) => results.pop_front(),
      None => self.result_rx.recv().await,
    };
    if result.is_some() {
      self.delivered += 1;
    }
    result
  }

  /// Whether submitted requests still await delivery.
  pub fn requests_pending(&self) -> bool {
    self.delivered < self.submitted
  }

  /// Wait until the workers have handled every submitted request. Results
  /// stay queued for the caller to drain.
  pub async fn wait_until_done(&self) {
    while self.completed.load(Ordering::SeqCst) < self.submitted {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  }

  /// Cancel in-flight work, signal workers to exit, and join them.
  pub async fn destroy(mut self) {
    debug!(pool = %self.name, "Destroying worker pool");
    self.cancel.cancel();
    self.request_tx.take();
    for handle in self.handles.drain(..) {
      let _ = handle.await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn doubling_handler() -> PoolHandler<u32, u32> {
    Arc::new(|n: u32| Box::pin(async move { n * 2 }))
  }

  #[tokio::test]
  async fn test_inline_pool() {
    let mut pool = WorkerPool::new("test", 0, 8, doubling_handler(), None, CancellationToken::new());
    assert!(!pool.check_for_results());

    pool.add_request(1).await.unwrap();
    pool.add_request(2).await.unwrap();
    assert!(pool.check_for_results());
    assert!(pool.requests_pending());

    assert_eq!(pool.next_result().await, Some(2));
    assert_eq!(pool.next_result().await, Some(4));
    assert_eq!(pool.next_result().await, None);
    assert!(!pool.requests_pending());
  }

  #[tokio::test]
  async fn test_threaded_pool_delivers_all() {
    // queue roomy enough to take every request before the drain starts
    let mut pool = WorkerPool::new("test", 4, 128, doubling_handler(), None, CancellationToken::new());
    for n in 0..100u32 {
      pool.add_request(n).await.unwrap();
    }
    let mut results = Vec::new();
    while let Some(result) = pool.next_result().await {
      results.push(result);
    }
    results.sort_unstable();
    let expected: Vec<u32> = (0..100).map(|n| n * 2).collect();
    assert_eq!(results, expected);
    pool.destroy().await;
  }

  #[tokio::test]
  async fn test_init_hook_runs_per_worker() {
    let inits = Arc::new(AtomicUsize::new(0));
    let init_counter = inits.clone();
    let init: PoolInit = Arc::new(move |_worker_id| {
      let counter = init_counter.clone();
      Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
      })
    });

    let mut pool = WorkerPool::new("test", 3, 8, doubling_handler(), Some(init), CancellationToken::new());
    pool.add_request(1).await.unwrap();
    assert_eq!(pool.next_result().await, Some(2));
    pool.wait_until_done().await;
    assert_eq!(inits.load(Ordering::SeqCst), 3);
    pool.destroy().await;
  }

  #[tokio::test]
  async fn test_destroy_cancels_workers() {
    let handler: PoolHandler<u32, u32> = Arc::new(|n: u32| {
      Box::pin(async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        n
      })
    });
    let mut pool = WorkerPool::new("test", 2, 8, handler, None, CancellationToken::new());
    pool.add_request(1).await.unwrap();
    // workers are blocked in the handler; destroy must still join promptly
    tokio::time::timeout(Duration::from_secs(5), pool.destroy())
      .await
      .expect("destroy should not hang");
  }

  #[tokio::test]
  async fn test_wait_until_done() {
    let mut pool = WorkerPool::new("test", 2, 8, doubling_handler(), None, CancellationToken::new());
    for n in 0..10u32 {
      pool.add_request(n).await.unwrap();
    }
    pool.wait_until_done().await;
    let mut count = 0;
    while pool.try_result().is_some() {
      count += 1;
    }
    assert_eq!(count, 10);
    pool.destroy().await;
  }
}
