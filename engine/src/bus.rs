//! In-process event bus: one topic per enrolled detector, fed by the
//! result pipeline and drained by streaming subscribers.
//!
//! Follows a reader/writer-lock-guarded registry pattern, generalized from
//! a single shared map to a topic-scoped subscription map with per-topic
//! FIFO delivery.

use async_trait::async_trait;
use shared::wire::ResultEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use shared::error::AppError;

/// Delivery channel capacity per subscription, kept at 1. A slow
/// subscriber's channel fills and `publish` blocks on it, throttling every
/// other subscriber on the same topic in turn.
const SUBSCRIPTION_CAPACITY: usize = 1;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: ResultEvent);
}

struct Subscriber {
    sender: mpsc::Sender<ResultEvent>,
}

struct Topic {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
}

impl Topic {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }
}

/// A live subscription. Dropping or calling [`Subscription::unsubscribe`]
/// stops the consumer task and removes it from the topic; both are
/// idempotent.
pub struct Subscription {
    id: Uuid,
    topic_id: Uuid,
    bus: EventBus,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Removes this subscription from its topic and awaits the consumer's
    /// exit. Safe to call more than once.
    pub async fn unsubscribe(&mut self) {
        self.bus.remove_subscriber(self.topic_id, self.id).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<Uuid, Arc<Topic>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn new_topic(&self, id: Uuid) -> shared::Result<()> {
        let mut topics = self.topics.write().await;
        if topics.contains_key(&id) {
            return Err(AppError::conflict(format!("topic {id} already exists")).into());
        }
        topics.insert(id, Arc::new(Topic::new()));
        Ok(())
    }

    async fn get_topic_arc(&self, id: Uuid) -> shared::Result<Arc<Topic>> {
        self.topics
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("topic {id} not found")).into())
    }

    pub async fn get_topic(&self, id: Uuid) -> shared::Result<()> {
        self.get_topic_arc(id).await.map(|_| ())
    }

    /// Closes a topic and drops its subscriber map; any outstanding
    /// `Subscription`s simply see their channel go away and exit.
    pub async fn close_topic(&self, id: Uuid) {
        self.topics.write().await.remove(&id);
    }

    async fn remove_subscriber(&self, topic_id: Uuid, sub_id: Uuid) {
        if let Some(topic) = self.topics.read().await.get(&topic_id) {
            topic.subscribers.write().await.remove(&sub_id);
        }
    }

    /// Sends to every current subscriber sequentially, preserving per-topic
    /// FIFO order; a full (slow) subscriber channel makes `publish` wait,
    /// which is the throttling behavior B3 requires.
    pub async fn publish(&self, topic_id: Uuid, event: ResultEvent) -> shared::Result<()> {
        let topic = self.get_topic_arc(topic_id).await?;
        let subscribers = topic.subscribers.read().await;
        for subscriber in subscribers.values() {
            // A closed receiver (consumer exited) means this subscriber is
            // stale; publish never fails the caller over it.
            let _ = subscriber.sender.send(event.clone()).await;
        }
        Ok(())
    }

    /// Subscribes a handler to a topic; spawns a dedicated consumer task
    /// that calls `handler.handle(event)` for each delivered event until the
    /// channel closes.
    pub async fn subscribe(&self, topic_id: Uuid, handler: Arc<dyn Handler>) -> shared::Result<Subscription> {
        let topic = self.get_topic_arc(topic_id).await?;
        let (tx, mut rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let sub_id = Uuid::new_v4();
        topic.subscribers.write().await.insert(sub_id, Subscriber { sender: tx });

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler.handle(event).await;
            }
        });

        Ok(Subscription {
            id: sub_id,
            topic_id,
            bus: self.clone(),
            task: Some(task),
        })
    }

    /// Returns the raw delivery channel instead of driving a handler; the
    /// caller owns consuming it (e.g. to forward onto a streaming HTTP
    /// response).
    pub async fn subscribe_channel(&self, topic_id: Uuid) -> shared::Result<(Uuid, mpsc::Receiver<ResultEvent>)> {
        let topic = self.get_topic_arc(topic_id).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let sub_id = Uuid::new_v4();
        topic.subscribers.write().await.insert(sub_id, Subscriber { sender: tx });
        Ok((sub_id, rx))
    }

    pub async fn unsubscribe_channel(&self, topic_id: Uuid, sub_id: Uuid) {
        self.remove_subscriber(topic_id, sub_id).await;
    }

    /// Signals every subscriber on every topic to stop and waits for the
    /// topic map to drain (P7: no consumer left live after `Stop()`).
    pub async fn stop(&self) {
        let mut topics = self.topics.write().await;
        for topic in topics.values() {
            topic.subscribers.write().await.clear();
        }
        topics.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::State;
    use shared::wire::EventResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event() -> ResultEvent {
        ResultEvent {
            host_id: Uuid::new_v4(),
            host_name: "web1".into(),
            detector_id: Uuid::new_v4(),
            detector_name: "homepage".into(),
            result: EventResult {
                state: State::Ok,
                message: "200 OK".into(),
            },
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _event: ResultEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn duplicate_new_topic_fails() {
        let bus = EventBus::new();
        let id = Uuid::new_v4();
        bus.new_topic(id).await.unwrap();
        assert!(bus.new_topic(id).await.is_err());
    }

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let topic_id = Uuid::new_v4();
        bus.new_topic(topic_id).await.unwrap();

        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let _sub_a = bus.subscribe(topic_id, Arc::new(CountingHandler(count_a.clone()))).await.unwrap();
        let _sub_b = bus.subscribe(topic_id, Arc::new(CountingHandler(count_b.clone()))).await.unwrap();

        bus.publish(topic_id, sample_event()).await.unwrap();
        // Give the spawned consumer tasks a turn to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_to_missing_topic_errors() {
        let bus = EventBus::new();
        assert!(bus.publish(Uuid::new_v4(), sample_event()).await.is_err());
    }

    #[tokio::test]
    async fn subscribe_channel_receives_raw_events() {
        let bus = EventBus::new();
        let topic_id = Uuid::new_v4();
        bus.new_topic(topic_id).await.unwrap();
        let (_sub_id, mut rx) = bus.subscribe_channel(topic_id).await.unwrap();

        bus.publish(topic_id, sample_event()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.detector_name, "homepage");
    }

    #[tokio::test]
    async fn close_topic_then_publish_errors() {
        let bus = EventBus::new();
        let topic_id = Uuid::new_v4();
        bus.new_topic(topic_id).await.unwrap();
        bus.close_topic(topic_id).await;
        assert!(bus.publish(topic_id, sample_event()).await.is_err());
    }
}
