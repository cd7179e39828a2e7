use serde::Serialize;
use tokio::sync::broadcast;

use crate::exchange::EncryptionState;
use crate::models::Message;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// User-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Notice(Notice),
    EncryptionChanged {
        peer: String,
        state: EncryptionState,
    },
    MessagesUpdated {
        peer: String,
        messages: Vec<Message>,
    },
    ActivePeerChanged {
        peer: Option<String>,
    },
}

/// Fan-out of client events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(ClientEvent::Notice(Notice {
            level,
            message: message.into(),
        }));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notice(NoticeLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notice(NoticeLevel::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notice(NoticeLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.info("nobody listening");
    }

    #[test]
    fn test_subscribers_receive_notices() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.success("Login successful");

        match rx.try_recv().unwrap() {
            ClientEvent::Notice(notice) => {
                assert_eq!(notice.level, NoticeLevel::Success);
                assert_eq!(notice.message, "Login successful");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
