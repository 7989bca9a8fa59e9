//! 单元测试用的记录型 Messenger

use crate::error::DriverError;
use crate::listener::{ListenerId, MessageListener};
use crate::messenger::Messenger;
use flex_protocol::{ArbitrationId, Envelope, ErrorCode, Message, MessageId, NodeId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 一次发送记录
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub node_id: NodeId,
    pub message: Message,
    pub expected_nodes: Option<Vec<NodeId>>,
}

/// 记录所有发送、按消息 ID 返回预设错误码的 Messenger
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<SentMessage>>,
    pub ack_codes: Mutex<HashMap<MessageId, ErrorCode>>,
    replies: Mutex<HashMap<MessageId, Vec<(NodeId, Message)>>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn MessageListener>)>>,
    next_id: AtomicU64,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ack_code(&self, message_id: MessageId, code: ErrorCode) {
        self.ack_codes.lock().insert(message_id, code);
    }

    /// 每次发送 `message_id` 后，依次模拟这些节点上报
    pub fn reply_on(&self, message_id: MessageId, replies: Vec<(NodeId, Message)>) {
        self.replies.lock().insert(message_id, replies);
    }

    pub fn sent_ids(&self) -> Vec<MessageId> {
        self.sent.lock().iter().map(|s| s.message.message_id()).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// 模拟节点上报一条消息
    pub fn deliver(&self, origin: NodeId, message: Message) {
        let envelope = Envelope {
            arbitration_id: ArbitrationId::new(NodeId::Host, origin, message.message_id()),
            message_index: 0,
            message,
        };
        for (_, listener) in self.listeners.lock().iter() {
            if listener.accepts(&envelope.arbitration_id) {
                listener.on_message(&envelope);
            }
        }
    }

    fn replay(&self, message_id: MessageId) {
        let replies = self.replies.lock().get(&message_id).cloned();
        for (origin, reply) in replies.unwrap_or_default() {
            self.deliver(origin, reply);
        }
    }
}

impl Messenger for RecordingMessenger {
    fn send(&self, node_id: NodeId, message: &Message) -> Result<(), DriverError> {
        self.sent.lock().push(SentMessage {
            node_id,
            message: message.clone(),
            expected_nodes: None,
        });
        self.replay(message.message_id());
        Ok(())
    }

    fn ensure_send(
        &self,
        node_id: NodeId,
        message: &Message,
        expected_nodes: &[NodeId],
        _timeout: Duration,
    ) -> Result<ErrorCode, DriverError> {
        self.sent.lock().push(SentMessage {
            node_id,
            message: message.clone(),
            expected_nodes: Some(expected_nodes.to_vec()),
        });
        let code = self
            .ack_codes
            .lock()
            .get(&message.message_id())
            .copied()
            .unwrap_or(ErrorCode::Ok);
        self.replay(message.message_id());
        Ok(code)
    }

    fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}
