//! The event bus (spec §3 Event, §4.5, §5): an ordered, per-(project, session) topic
//! with a bounded replay buffer so reconnecting clients can resume with no gaps and
//! no duplicates (Testable Property 6 and 7).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub const REPLAY_BUFFER_SIZE: usize = 512;
const SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    TextSegment { text: String },
    ContentBlockStart { block_id: String, block_type: String, tool: Option<String> },
    ContentBlockUpdate { block_id: String, status: String, summary: Option<String> },
    Token { text: String, thinking: bool },
    Message { from: String, to: String, content: String },
    Activity { status: String, detail: Option<String> },
    ToolProgress { tool: String, stream: String, line: String },
    Run { phase: String, detail: serde_json::Value },
    AskUser { question_id: String, payload: serde_json::Value },
    Queue { detail: String },
    ModelFallback { requested: String, used: String },
    TurnComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub run_id: String,
    pub agent_id: String,
    pub sequence: u64,
    pub monotonic_timestamp_ms: u64,
    pub body: EventBody,
}

struct Topic {
    next_sequence: AtomicU64,
    replay: Mutex<std::collections::VecDeque<Event>>,
    sender: broadcast::Sender<Event>,
}

impl Topic {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_QUEUE_CAPACITY);
        Self {
            next_sequence: AtomicU64::new(0),
            replay: Mutex::new(std::collections::VecDeque::with_capacity(REPLAY_BUFFER_SIZE)),
            sender,
        }
    }
}

/// Multi-producer, multi-consumer bus keyed by `(project, session)`. Sequence numbers
/// are assigned atomically at publish time per topic, so ordering is strict and dense
/// within a topic (Testable Property 6); across topics no ordering is implied.
pub struct EventBus {
    topics: Mutex<HashMap<(String, String), Arc<Topic>>>,
    start_ms: std::time::Instant,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            start_ms: std::time::Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.start_ms.elapsed().as_millis() as u64
    }

    async fn topic_for(&self, project: &str, session: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock().await;
        topics
            .entry((project.to_string(), session.to_string()))
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone()
    }

    /// Publishes an event onto the topic, assigning the next sequence number.
    pub async fn publish(&self, project: &str, session: &str, run_id: &str, agent_id: &str, body: EventBody) -> Event {
        let topic = self.topic_for(project, session).await;
        let sequence = topic.next_sequence.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            run_id: run_id.to_string(),
            agent_id: agent_id.to_string(),
            sequence,
            monotonic_timestamp_ms: self.now_ms(),
            body,
        };
        {
            let mut replay = topic.replay.lock().await;
            if replay.len() >= REPLAY_BUFFER_SIZE {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }
        let _ = topic.sender.send(event.clone());
        event
    }

    /// Subscribes to a topic from an optional starting sequence. Returns the replay
    /// backlog (events with `sequence >= from_sequence`, in order) plus a receiver
    /// for live events. If `from_sequence` predates the replay buffer, the backlog
    /// is best-effort (oldest available) — callers detect this via `resync`.
    pub async fn subscribe(
        &self,
        project: &str,
        session: &str,
        from_sequence: Option<u64>,
    ) -> (Vec<Event>, broadcast::Receiver<Event>) {
        let topic = self.topic_for(project, session).await;
        let rx = topic.sender.subscribe();
        let replay = topic.replay.lock().await;
        let backlog: Vec<Event> = match from_sequence {
            Some(from) => replay.iter().filter(|e| e.sequence >= from).cloned().collect(),
            None => Vec::new(),
        };
        (backlog, rx)
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

    #[tokio::test]
    async fn sequence_is_strictly_increasing_and_dense() {
        let bus = EventBus::new();
        let mut seqs = Vec::new();
        for i in 0..10 {
            let e = bus
                .publish("p", "s", "run1", "agent1", EventBody::TextSegment { text: format!("{i}") })
                .await;
            seqs.push(e.sequence);
        }
        for w in seqs.windows(2) {
            assert_eq!(w[1], w[0] + 1);
        }
    }

    #[tokio::test]
    async fn subscribe_from_sequence_replays_then_streams_live_with_no_gaps() {
        let bus = EventBus::new();
        for i in 0..5 {
            bus.publish("p", "s", "run1", "agent1", EventBody::TextSegment { text: format!("{i}") })
                .await;
        }
        let (backlog, mut rx) = bus.subscribe("p", "s", Some(2)).await;
        assert_eq!(backlog.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3, 4]);

        let live = bus
            .publish("p", "s", "run1", "agent1", EventBody::TextSegment { text: "live".into() })
            .await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, live.sequence);
        assert_eq!(received.sequence, 5);
    }

    #[tokio::test]
    async fn separate_topics_have_independent_sequences() {
        let bus = EventBus::new();
        let e1 = bus
            .publish("p1", "s1", "run1", "a1", EventBody::TurnComplete)
            .await;
        let e2 = bus
            .publish("p2", "s2", "run2", "a2", EventBody::TurnComplete)
            .await;
        assert_eq!(e1.sequence, 0);
        assert_eq!(e2.sequence, 0);
    }
}
