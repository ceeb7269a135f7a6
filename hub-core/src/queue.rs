//! The shared message queue (§5 "Shared state"). FIFO, deduplicated by
//! `localId` at admission time, with a `pushIsolateAndClear` operation used
//! to inject `/new | /clear | /model` sentinels ahead of everything queued.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;

use hub_protocol::session::QueuedMessage;

pub type OnMessage = Box<dyn Fn(&QueuedMessage) + Send + Sync>;

#[derive(Default)]
struct Inner {
    items: VecDeque<QueuedMessage>,
    seen_local_ids: HashSet<String>,
    callback: Option<OnMessage>,
}

/// Shared between the `SessionLoop` and whichever launcher is currently
/// active; the launcher installs/removes the on-message callback (§5).
#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<Inner>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a message, deduplicating by `local_id` (messages without one
    /// are never deduplicated). Returns `false` if the message was dropped
    /// as a duplicate.
    pub fn push(&self, local_id: Option<String>, message: QueuedMessage) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = &local_id {
            if !inner.seen_local_ids.insert(id.clone()) {
                return false;
            }
        }
        inner.items.push_back(message.clone());
        if let Some(cb) = &inner.callback {
            cb(&message);
        }
        true
    }

    /// Drops everything queued and pushes a single isolate-command message
    /// (`/new`, `/clear`, `/model`) as the sole pending item.
    pub fn push_isolate_and_clear(&self, message: QueuedMessage) {
        debug_assert!(message.is_isolated(), "pushIsolateAndClear requires an isolated command");
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.clear();
        inner.items.push_back(message.clone());
        if let Some(cb) = &inner.callback {
            cb(&message);
        }
    }

    pub fn pop_front(&self) -> Option<QueuedMessage> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.pop_front()
    }

    pub fn peek_front(&self) -> Option<QueuedMessage> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn set_on_message(&self, callback: Option<OnMessage>) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).callback = callback;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use hub_protocol::config::CollaborationMode;
    use hub_protocol::config::PermissionMode;
    use hub_protocol::session::TurnMode;

    fn mode() -> TurnMode {
        TurnMode {
            permission_mode: PermissionMode::Default,
            model: None,
            collaboration_mode: CollaborationMode::Default,
        }
    }

    #[test]
    fn duplicate_local_id_is_dropped() {
        let queue = MessageQueue::new();
        let admitted = queue.push(Some("a".into()), QueuedMessage::new("hi", mode()));
        assert!(admitted);
        let admitted_again = queue.push(Some("a".into()), QueuedMessage::new("hi again", mode()));
        assert!(!admitted_again);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn fifo_ordering_is_preserved() {
        let queue = MessageQueue::new();
        queue.push(None, QueuedMessage::new("first", mode()));
        queue.push(None, QueuedMessage::new("second", mode()));
        assert_eq!(queue.pop_front().unwrap().text, "first");
        assert_eq!(queue.pop_front().unwrap().text, "second");
    }

    #[test]
    fn push_isolate_and_clear_discards_pending_items() {
        let queue = MessageQueue::new();
        queue.push(None, QueuedMessage::new("pending", mode()));
        queue.push_isolate_and_clear(QueuedMessage::new("/new", mode()));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_front().unwrap().text, "/new");
    }

    #[test]
    fn callback_fires_on_admission() {
        let queue = MessageQueue::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        queue.set_on_message(Some(Box::new(move |m| seen_clone.lock().unwrap().push(m.text.clone()))));
        queue.push(None, QueuedMessage::new("hi", mode()));
        assert_eq!(*seen.lock().unwrap(), vec!["hi".to_string()]);
    }
}
