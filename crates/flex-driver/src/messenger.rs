//! 总线消息收发
//!
//! [`Messenger`] 是运动协调层依赖的传输接口；[`CanMessenger`] 是基于
//! `SplittableAdapter` 的实现：一个接收线程负责解码与监听器分发，
//! 发送经由互斥保护的 TX 半部在调用方线程完成。

use crate::error::DriverError;
use crate::listener::{ChannelListener, ListenerGuard, ListenerId, MessageListener};
use crossbeam_channel::RecvTimeoutError;
use flex_can::{CanError, FlexFrame, RxAdapter, SplittableAdapter, TxAdapter};
use flex_protocol::{ArbitrationId, Envelope, ErrorCode, Message, MessageId, NodeId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 带确认发送的最短等待时间
pub const MIN_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// 传输接口
///
/// 所有方法都可以从多个线程并发调用。
pub trait Messenger: Send + Sync {
    /// 发送一条消息（不等待确认）
    fn send(&self, node_id: NodeId, message: &Message) -> Result<(), DriverError>;

    /// 发送并等待 `expected_nodes` 全部确认
    ///
    /// 返回第一个非 `ok` 的错误码，全部确认则返回 `ErrorCode::Ok`，
    /// 等待超时返回 `ErrorCode::Timeout`。`expected_nodes` 为空时按
    /// [`resolve_expected_nodes`] 推断。
    fn ensure_send(
        &self,
        node_id: NodeId,
        message: &Message,
        expected_nodes: &[NodeId],
        timeout: Duration,
    ) -> Result<ErrorCode, DriverError>;

    /// 注册监听器
    fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId;

    /// 注销监听器（重复注销无副作用）
    fn remove_listener(&self, id: ListenerId);
}

/// 未显式给出确认节点时的默认集合
///
/// 广播默认等待 gantry_x / gantry_y / head，单播等待目标节点本身。
pub fn resolve_expected_nodes(node_id: NodeId, expected_nodes: &[NodeId]) -> Vec<NodeId> {
    if !expected_nodes.is_empty() {
        return expected_nodes.to_vec();
    }
    if node_id == NodeId::Broadcast {
        vec![NodeId::GantryX, NodeId::GantryY, NodeId::Head]
    } else {
        vec![node_id]
    }
}

// ============================================================================
// 确认跟踪
// ============================================================================

/// 跟踪一次带确认发送还缺哪些节点
///
/// gripper / head 由两个子控制器分别确认，两个子节点都确认后父节点才算完成。
#[derive(Debug)]
pub(crate) struct AckTracker {
    pending: BTreeSet<NodeId>,
    subnode_acks: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl AckTracker {
    pub(crate) fn new(expected: &[NodeId]) -> Self {
        Self {
            pending: expected.iter().copied().collect(),
            subnode_acks: BTreeMap::new(),
        }
    }

    /// 记录一个节点的确认
    pub(crate) fn record(&mut self, origin: NodeId) {
        if self.pending.remove(&origin) {
            return;
        }
        let Some(parent) = origin.parent() else {
            trace!("Ignoring ack from unexpected node {}", origin);
            return;
        };
        if !self.pending.contains(&parent) {
            return;
        }
        let seen = self.subnode_acks.entry(parent).or_default();
        seen.insert(origin);
        if parent.subnodes().iter().all(|sub| seen.contains(sub)) {
            self.pending.remove(&parent);
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn missing(&self) -> Vec<NodeId> {
        self.pending.iter().copied().collect()
    }
}

// ============================================================================
// CanMessenger
// ============================================================================

type ListenerTable = Vec<(ListenerId, Arc<dyn MessageListener>)>;

/// 基于 CAN 适配器的消息收发器
///
/// # 线程模型
///
/// - RX 线程：接收帧 → 解码 → 同步调用监听器
/// - 调用方线程：编码 → 通过互斥保护的 TX 半部发送
///
/// Drop 时通知 RX 线程退出并等待其结束。
pub struct CanMessenger {
    tx: Mutex<Box<dyn TxAdapter + Send>>,
    listeners: Arc<RwLock<ListenerTable>>,
    next_message_index: AtomicU32,
    next_listener_id: AtomicU64,
    is_running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl CanMessenger {
    /// 分离适配器并启动接收线程
    ///
    /// # 错误
    /// - `DriverError::Can`: 适配器分离失败
    pub fn new<C>(can: C) -> Result<Self, DriverError>
    where
        C: SplittableAdapter,
        C::RxAdapter: Send + 'static,
        C::TxAdapter: Send + 'static,
    {
        let (rx_adapter, tx_adapter) = can.split()?;
        let listeners: Arc<RwLock<ListenerTable>> = Arc::new(RwLock::new(Vec::new()));
        let is_running = Arc::new(AtomicBool::new(true));

        let listeners_rx = listeners.clone();
        let is_running_rx = is_running.clone();
        let rx_thread = spawn(move || {
            rx_loop(rx_adapter, listeners_rx, is_running_rx);
        });

        Ok(Self {
            tx: Mutex::new(Box::new(tx_adapter)),
            listeners,
            next_message_index: AtomicU32::new(1),
            next_listener_id: AtomicU64::new(1),
            is_running,
            rx_thread: Some(rx_thread),
        })
    }

    /// 分配下一个消息序号（跳过 0）
    fn next_message_index(&self) -> u32 {
        loop {
            let index = self.next_message_index.fetch_add(1, Ordering::Relaxed);
            if index != 0 {
                return index;
            }
        }
    }

    /// 使用指定序号发送
    fn send_with_index(
        &self,
        node_id: NodeId,
        message: &Message,
        message_index: u32,
    ) -> Result<(), DriverError> {
        let arbitration_id = ArbitrationId::from_host(node_id, message.message_id());
        let frame: FlexFrame = message.to_frame(arbitration_id, message_index);
        trace!(
            "Sending {:?} to {} (index {})",
            message.message_id(),
            node_id,
            message_index
        );
        self.tx.lock().send(frame)?;
        Ok(())
    }

    /// 接收线程是否仍在运行
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

impl Messenger for CanMessenger {
    fn send(&self, node_id: NodeId, message: &Message) -> Result<(), DriverError> {
        self.send_with_index(node_id, message, self.next_message_index())
    }

    fn ensure_send(
        &self,
        node_id: NodeId,
        message: &Message,
        expected_nodes: &[NodeId],
        timeout: Duration,
    ) -> Result<ErrorCode, DriverError> {
        let expected = resolve_expected_nodes(node_id, expected_nodes);
        let (listener, rx) =
            ChannelListener::new(&[MessageId::Acknowledgement, MessageId::ErrorMessage]);
        let _guard = ListenerGuard::new(self, Arc::new(listener));

        let message_index = self.next_message_index();
        self.send_with_index(node_id, message, message_index)?;

        let mut tracker = AckTracker::new(&expected);
        let mut code = ErrorCode::Ok;
        let deadline = Instant::now() + timeout.max(MIN_ACK_TIMEOUT);

        while !tracker.is_complete() {
            match rx.recv_deadline(deadline) {
                Ok(envelope) if envelope.message_index == message_index => {
                    if let Message::ErrorMessage(err) = &envelope.message {
                        debug!(
                            "{} answered {:?} with {:?}",
                            envelope.origin(),
                            message.message_id(),
                            err.error_code
                        );
                        if code == ErrorCode::Ok {
                            code = err.error_code;
                        }
                    }
                    tracker.record(envelope.origin());
                },
                Ok(_) => {},
                Err(RecvTimeoutError::Timeout) => {
                    error!(
                        "Timed out waiting for ack of {:?} (index {}), missing {:?}",
                        message.message_id(),
                        message_index,
                        tracker.missing()
                    );
                    return Ok(ErrorCode::Timeout);
                },
                Err(RecvTimeoutError::Disconnected) => return Err(DriverError::ChannelClosed),
            }
        }
        Ok(code)
    }

    fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.write().retain(|(existing, _)| *existing != id);
    }
}

impl Drop for CanMessenger {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.rx_thread.take()
            && handle.join().is_err()
        {
            error!("CAN messenger RX thread panicked");
        }
    }
}

/// 接收循环
///
/// 解码失败的帧记录后丢弃；没有任何监听器接收的错误消息以 error 级别记录。
fn rx_loop(
    mut rx: impl RxAdapter,
    listeners: Arc<RwLock<ListenerTable>>,
    is_running: Arc<AtomicBool>,
) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: is_running flag is false, exiting");
            break;
        }

        let frame = match rx.receive() {
            Ok(frame) => frame,
            Err(CanError::Timeout) => continue,
            Err(CanError::Disconnected) => {
                error!("RX thread: adapter disconnected, exiting");
                is_running.store(false, Ordering::Release);
                break;
            },
            Err(e) => {
                warn!("RX thread: receive error: {}", e);
                std::thread::sleep(Duration::from_millis(1));
                continue;
            },
        };

        let envelope = match Envelope::from_frame(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable frame 0x{:X}: {}", frame.id, e);
                continue;
            },
        };

        let mut handled = false;
        for (_, listener) in listeners.read().iter() {
            if listener.accepts(&envelope.arbitration_id) {
                listener.on_message(&envelope);
                handled = true;
            }
        }

        if !handled {
            if let Message::ErrorMessage(err) = &envelope.message {
                error!(
                    "Unhandled error message from {}: {:?} ({:?})",
                    envelope.origin(),
                    err.error_code,
                    err.severity
                );
            } else {
                trace!(
                    "Unhandled {:?} from {}",
                    envelope.arbitration_id.message_id,
                    envelope.origin()
                );
            }
        }
    }
}
