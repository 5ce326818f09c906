//! In-process message bus.
//!
//! Two pieces: a bounded per-channel [`InboundQueue`] that channel adapters
//! publish onto, and a per-`(channel, chat_id)` serial dispatch table
//! ([`ChatDispatch`]) the orchestrator uses to guarantee in-order processing
//! within one chat while letting different chats run in parallel — a
//! `DashMap<String, mpsc::Sender<_>>` lane table, the same shape used
//! elsewhere for per-client WebSocket senders, generalized here to inbound
//! `Message`s instead of outbound WS frames.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::warn;

use conduit_core::types::Message;

/// A bounded inbound queue for one channel (default capacity 1,000 per
/// channel). On overflow the *oldest* unprocessed
/// message is dropped, not the newest — `tokio::sync::mpsc` only supports
/// dropping the newest via `try_send`, so this wraps a plain `VecDeque`
/// behind a mutex with a `Notify` for the consumer side instead.
pub struct InboundQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Message>>,
    notify: Notify,
    dropped: std::sync::atomic::AtomicU64,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Publish a message. Never blocks; if the queue is at capacity the
    /// oldest queued message is dropped to make room.
    pub async fn publish(&self, message: Message) {
        let mut queue = self.inner.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!(channel = %message.channel, "inbound queue overflow, dropped oldest message");
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    /// Pop the next message, waiting if the queue is currently empty.
    pub async fn recv(&self) -> Message {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(msg) = queue.pop_front() {
                    return msg;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Per-`(channel, chat_id)` serial dispatch.
///
/// Each distinct chat gets its own bounded `mpsc` channel and exactly one
/// consumer task, so handing a message to `ChatDispatch::send` and having
/// the consumer invoke the pipeline in receive order is enough to satisfy
/// the guarantee without a global lock.
pub struct ChatDispatch {
    lanes: DashMap<(String, String), mpsc::Sender<Message>>,
    lane_capacity: usize,
}

impl ChatDispatch {
    pub fn new(lane_capacity: usize) -> Self {
        Self {
            lanes: DashMap::new(),
            lane_capacity,
        }
    }

    /// Route `message` to its chat's lane, spawning a consumer task driven
    /// by `handle` the first time a given `(channel, chat_id)` is seen.
    pub fn dispatch<F, Fut>(self: &Arc<Self>, message: Message, handle: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let key = (message.channel.as_str().to_string(), message.chat_id.as_str().to_string());
        let sender = {
            if let Some(existing) = self.lanes.get(&key) {
                existing.clone()
            } else {
                let (tx, mut rx) = mpsc::channel::<Message>(self.lane_capacity);
                self.lanes.insert(key.clone(), tx.clone());
                let handle = Arc::new(handle);
                tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        (handle)(msg).await;
                    }
                });
                tx
            }
        };
        if let Err(e) = sender.try_send(message) {
            warn!(error = %e, "chat dispatch lane full or closed, message dropped");
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::types::{ContentBlock, Identity};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(chat: &str, text: &str) -> Message {
        Message {
            id: format!("m-{text}").into(),
            channel: "telegram".into(),
            chat_id: chat.into(),
            sender: Identity::new("u1"),
            content: vec![ContentBlock::text(text)],
            reply_to: None,
            timestamp: chrono::Utc::now(),
            is_group: false,
            mentioned_bot: false,
            reply_to_bot: false,
            participant: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn inbound_queue_drops_oldest_on_overflow() {
        let queue = InboundQueue::new(2);
        queue.publish(msg("c1", "one")).await;
        queue.publish(msg("c1", "two")).await;
        queue.publish(msg("c1", "three")).await;
        assert_eq!(queue.dropped_count(), 1);
        let first = queue.recv().await;
        assert_eq!(first.text(), "two");
    }

    #[tokio::test]
    async fn chat_dispatch_processes_same_chat_in_order() {
        let dispatch = Arc::new(ChatDispatch::new(16));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let order = order.clone();
            let counter = counter.clone();
            dispatch.dispatch(msg("c1", &i.to_string()), move |m| {
                let order = order.clone();
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    order.lock().unwrap().push(m.text());
                }
            });
        }

        // give the lane's consumer task time to drain.
        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 5 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(*order.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
    }
}
