//! 消息监听器
//!
//! 接收线程解码每一帧后，同步调用所有已注册监听器的 `on_message`。
//! 监听器只负责把消息转发到 channel，真正的处理在调用方线程完成。
//!
//! # 使用示例
//!
//! ```rust,ignore
//! let (listener, rx) = ChannelListener::new(&[MessageId::MoveCompleted]);
//! let _guard = ListenerGuard::new(&messenger, Arc::new(listener));
//! // guard 离开作用域时自动注销
//! ```

use crate::messenger::Messenger;
use crossbeam_channel::{Receiver, Sender, unbounded};
use flex_protocol::{ArbitrationId, Envelope, MessageId};
use smallvec::SmallVec;
use std::sync::Arc;

/// 监听器句柄，用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// 消息监听器 Trait
///
/// # 性能要求
///
/// - 在接收线程上同步调用，**禁止阻塞**
/// - 推荐使用 `try_send` 转发
pub trait MessageListener: Send + Sync {
    /// 当收到一条（通过过滤的）消息时调用
    fn on_message(&self, envelope: &Envelope);

    /// 过滤器，默认接收全部消息
    fn accepts(&self, arbitration_id: &ArbitrationId) -> bool {
        let _ = arbitration_id;
        true
    }
}

/// 按消息 ID 过滤并转发到 channel 的监听器
pub struct ChannelListener {
    sender: Sender<Envelope>,
    message_ids: SmallVec<[MessageId; 4]>,
}

impl ChannelListener {
    /// 创建监听器及对应的接收端
    ///
    /// `message_ids` 为空时接收全部消息。
    pub fn new(message_ids: &[MessageId]) -> (Self, Receiver<Envelope>) {
        let (sender, receiver) = unbounded();
        (
            Self {
                sender,
                message_ids: SmallVec::from_slice(message_ids),
            },
            receiver,
        )
    }
}

impl MessageListener for ChannelListener {
    fn on_message(&self, envelope: &Envelope) {
        // 接收端已释放时丢弃
        let _ = self.sender.try_send(envelope.clone());
    }

    fn accepts(&self, arbitration_id: &ArbitrationId) -> bool {
        self.message_ids.is_empty() || self.message_ids.contains(&arbitration_id.message_id)
    }
}

/// RAII 监听器注册
///
/// 构造时注册，析构时注销，保证所有退出路径（包括 `?` 提前返回和 panic）
/// 都不会遗留监听器。
pub struct ListenerGuard<'a, M: Messenger + ?Sized> {
    messenger: &'a M,
    id: ListenerId,
}

impl<'a, M: Messenger + ?Sized> ListenerGuard<'a, M> {
    pub fn new(messenger: &'a M, listener: Arc<dyn MessageListener>) -> Self {
        let id = messenger.add_listener(listener);
        Self { messenger, id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl<M: Messenger + ?Sized> Drop for ListenerGuard<'_, M> {
    fn drop(&mut self) {
        self.messenger.remove_listener(self.id);
    }
}
