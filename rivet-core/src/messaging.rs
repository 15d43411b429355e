//! Message-queue plumbing for one-way operations.

use crate::logging::{debug, trace};
use crate::{Dto, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

/// A request DTO travelling through a queue.
#[derive(Debug)]
pub struct Message {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub body: Box<dyn Dto>,
    /// Queue the sender expects replies on.
    pub reply_to: Option<String>,
}

impl Message {
    pub fn new(body: Box<dyn Dto>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            body,
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    /// Queue name for the body's type, `mq:<Type>.inq`.
    pub fn queue_name(&self) -> String {
        format!("mq:{}.inq", self.body.type_info().name())
    }
}

/// Publishes one-way requests instead of executing them inline.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn publish(&self, message: Message) -> Result<()>;
}

/// Unbounded in-process queue.
pub struct InMemoryMessageQueue {
    sender: mpsc::UnboundedSender<Message>,
    receiver: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Wait for the next message.
    pub async fn receive(&self) -> Option<Message> {
        self.receiver.lock().await.recv().await
    }

    /// Take the next message if one is queued.
    pub async fn try_receive(&self) -> Option<Message> {
        self.receiver.lock().await.try_recv().ok()
    }

    /// Take every queued message.
    pub async fn drain(&self) -> Vec<Message> {
        let mut receiver = self.receiver.lock().await;
        let mut messages = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            messages.push(message);
        }
        trace!(count = messages.len(), "drained queue");
        messages
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageProducer for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<()> {
        debug!(id = %message.id, queue = %message.queue_name(), "publishing message");
        self.sender
            .send(message)
            .map_err(|_| Error::Internal("message queue is closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_drain() {
        let queue = InMemoryMessageQueue::new();
        queue.publish(Message::new(Box::new(1u32))).await.unwrap();
        queue
            .publish(Message::new(Box::new("two".to_string())).with_reply_to("mq:replies"))
            .await
            .unwrap();

        let first = queue.try_receive().await.unwrap();
        assert_eq!(first.body.downcast_ref::<u32>(), Some(&1));
        assert_eq!(first.queue_name(), "mq:u32.inq");

        let rest = queue.drain().await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].reply_to.as_deref(), Some("mq:replies"));
        assert!(queue.try_receive().await.is_none());
    }
}
