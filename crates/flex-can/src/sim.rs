//! 内存仿真总线
//!
//! 主机侧得到一个 [`SimAdapter`]（实现 `CanAdapter` / `SplittableAdapter`），
//! 设备侧得到一个 [`SimPeer`]，测试在其上模拟节点固件。
//!
//! ```rust
//! use flex_can::sim::SimBus;
//! use flex_can::{CanAdapter, FlexFrame};
//! use std::time::Duration;
//!
//! let (mut host, peer) = SimBus::new();
//! host.send(FlexFrame::new(0x10, &[1, 2])).unwrap();
//! let frame = peer.recv_timeout(Duration::from_millis(10)).unwrap();
//! assert_eq!(frame.data_slice(), &[1, 2]);
//! ```

use crate::{CanAdapter, CanError, FlexFrame, RxAdapter, SplittableAdapter, TxAdapter};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::time::Duration;

/// 默认读超时，与 SocketCAN 适配器保持同一量级
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// 仿真总线构造器
pub struct SimBus;

impl SimBus {
    /// 创建一对互联的端点：(主机适配器, 设备端)
    pub fn new() -> (SimAdapter, SimPeer) {
        let (host_tx, peer_rx) = unbounded();
        let (peer_tx, host_rx) = unbounded();
        (
            SimAdapter {
                rx: host_rx,
                tx: host_tx,
                read_timeout: DEFAULT_READ_TIMEOUT,
            },
            SimPeer {
                rx: peer_rx,
                tx: peer_tx,
            },
        )
    }
}

/// 主机侧仿真适配器
pub struct SimAdapter {
    rx: Receiver<FlexFrame>,
    tx: Sender<FlexFrame>,
    read_timeout: Duration,
}

fn recv_with_timeout(rx: &Receiver<FlexFrame>, timeout: Duration) -> Result<FlexFrame, CanError> {
    match rx.recv_timeout(timeout) {
        Ok(frame) => Ok(frame),
        Err(RecvTimeoutError::Timeout) => Err(CanError::Timeout),
        Err(RecvTimeoutError::Disconnected) => Err(CanError::Disconnected),
    }
}

impl CanAdapter for SimAdapter {
    fn send(&mut self, frame: FlexFrame) -> Result<(), CanError> {
        self.tx.send(frame).map_err(|_| CanError::Disconnected)
    }

    fn receive(&mut self) -> Result<FlexFrame, CanError> {
        recv_with_timeout(&self.rx, self.read_timeout)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl SplittableAdapter for SimAdapter {
    type RxAdapter = SimRxAdapter;
    type TxAdapter = SimTxAdapter;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        Ok((
            SimRxAdapter {
                rx: self.rx,
                read_timeout: self.read_timeout,
            },
            SimTxAdapter { tx: self.tx },
        ))
    }
}

/// 仿真接收半部
pub struct SimRxAdapter {
    rx: Receiver<FlexFrame>,
    read_timeout: Duration,
}

impl RxAdapter for SimRxAdapter {
    fn receive(&mut self) -> Result<FlexFrame, CanError> {
        recv_with_timeout(&self.rx, self.read_timeout)
    }
}

/// 仿真发送半部
pub struct SimTxAdapter {
    tx: Sender<FlexFrame>,
}

impl TxAdapter for SimTxAdapter {
    fn send(&mut self, frame: FlexFrame) -> Result<(), CanError> {
        self.tx.send(frame).map_err(|_| CanError::Disconnected)
    }
}

/// 设备侧端点（可跨线程克隆）
#[derive(Clone)]
pub struct SimPeer {
    rx: Receiver<FlexFrame>,
    tx: Sender<FlexFrame>,
}

impl SimPeer {
    /// 向主机发送一帧；主机已断开时返回 `false`
    pub fn send(&self, frame: FlexFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// 等待主机发出的下一帧
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FlexFrame> {
        self.rx.recv_timeout(timeout).ok()
    }
}
