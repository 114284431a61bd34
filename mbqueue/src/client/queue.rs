use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::client::message::Request;
use crate::client::target::Target;
use crate::tcp::frame::TxId;

/// Bounded FIFO of requests shared between the callers and the worker task
///
/// The lock is only held while pushing or popping, never across I/O. The request being
/// processed by the worker still counts towards the limit until it reaches a terminal outcome.
pub(crate) struct RequestQueue {
    limit: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    pending: VecDeque<Request>,
    in_flight: bool,
    tx_id: TxId,
}

impl RequestQueue {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                in_flight: false,
                tx_id: TxId::default(),
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// assign the next transaction id and append the request
    ///
    /// The request is handed back if the queue is full
    pub(crate) fn push(&self, mut request: Request, target: Target) -> Result<(), Request> {
        {
            let mut state = self.lock();
            if state.len() >= self.limit {
                return Err(request);
            }
            let tx_id = state.tx_id.next();
            request.assign(tx_id, target);
            tracing::debug!("queued request {} for {}", tx_id, request.target());
            state.pending.push_back(request);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// wait for the request at the head of the queue and take ownership of it
    ///
    /// The request remains counted against the limit until [`RequestQueue::finish`] is called
    pub(crate) async fn next(&self) -> Request {
        loop {
            {
                let mut state = self.lock();
                if let Some(request) = state.pending.pop_front() {
                    state.in_flight = true;
                    return request;
                }
            }
            self.notify.notified().await;
        }
    }

    /// release the slot of the request taken by [`RequestQueue::next`]
    pub(crate) fn finish(&self) {
        self.lock().in_flight = false;
    }

    /// drop every request that is not currently being processed
    pub(crate) fn clear(&self) -> usize {
        let removed: Vec<Request> = self.lock().pending.drain(..).collect();
        removed.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueState {
    fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight)
    }
}
