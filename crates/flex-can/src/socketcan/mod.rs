//! SocketCAN-FD 适配器实现
//!
//! Linux 平台下基于内核 SocketCAN 的 CAN-FD 收发。
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **接口配置**：波特率、FD 数据段速率由 `ip link` 完成，不在应用层设置
//! - **仅扩展帧**：节点协议全部使用 29 位仲裁 ID，标准帧在接收时被丢弃

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, FlexFrame};
use crate::{RxAdapter, SplittableAdapter, TxAdapter};
use socketcan::{CanAnyFrame, CanFdFrame, CanFdSocket, EmbeddedFrame, ExtendedId, Frame, Socket};
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{trace, warn};

/// 默认读超时（接收线程据此周期性检查退出标志）
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// CAN-FD 合法数据长度
const FD_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// 向上取整到合法的 CAN-FD 数据长度
fn fd_padded_len(len: usize) -> usize {
    FD_LENGTHS.iter().copied().find(|l| *l >= len).unwrap_or(64)
}

fn open_socket(interface: &str) -> Result<CanFdSocket, CanError> {
    CanFdSocket::open(interface).map_err(|e| {
        let kind = match e.kind() {
            io::ErrorKind::NotFound => CanDeviceErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => CanDeviceErrorKind::AccessDenied,
            _ => CanDeviceErrorKind::Backend,
        };
        CanError::Device(CanDeviceError::new(
            kind,
            format!("Failed to open CAN-FD interface '{}': {}", interface, e),
        ))
    })
}

fn to_fd_frame(frame: &FlexFrame) -> Result<CanFdFrame, CanError> {
    let mut padded = [0u8; 64];
    let len = frame.len as usize;
    padded[..len].copy_from_slice(frame.data_slice());
    ExtendedId::new(frame.id)
        .and_then(|id| CanFdFrame::new(id, &padded[..fd_padded_len(len)]))
        .ok_or_else(|| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InvalidFrame,
                format!("Failed to create FD frame with ID 0x{:X}", frame.id),
            ))
        })
}

fn write_frame(socket: &CanFdSocket, frame: &FlexFrame) -> Result<(), CanError> {
    let fd_frame = to_fd_frame(frame)?;
    socket.write_frame(&fd_frame).map_err(|e| {
        CanError::Io(io::Error::other(format!("SocketCAN transmit error: {}", e)))
    })?;
    trace!("Sent CAN-FD frame: ID=0x{:X}, len={}", frame.id, frame.len);
    Ok(())
}

/// 读取一帧数据帧；错误帧、远程帧和标准帧被跳过
fn read_frame(socket: &CanFdSocket) -> Result<FlexFrame, CanError> {
    loop {
        let any = socket.read_frame().map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => CanError::Timeout,
            _ => CanError::Io(e),
        })?;
        let frame = match any {
            CanAnyFrame::Fd(f) if f.is_extended() => FlexFrame::new(f.raw_id(), f.data()),
            CanAnyFrame::Normal(f) if f.is_extended() => FlexFrame::new(f.raw_id(), f.data()),
            CanAnyFrame::Error(e) => {
                warn!("CAN error frame received: {:?}", e);
                continue;
            },
            _ => continue,
        };
        trace!("Received CAN-FD frame: ID=0x{:X}, len={}", frame.id, frame.len);
        return Ok(frame);
    }
}

/// 禁用 Loopback，防止主机自己发出的帧回环到接收 socket
fn disable_loopback(socket: &CanFdSocket, interface: &str) {
    let loopback_enabled: libc::c_int = 0;
    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_CAN_RAW,
            libc::CAN_RAW_LOOPBACK,
            &loopback_enabled as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result < 0 {
        warn!(
            "Failed to disable CAN_RAW_LOOPBACK on '{}': {}",
            interface,
            io::Error::last_os_error()
        );
    }
}

/// SocketCAN-FD 适配器
///
/// # 示例
///
/// ```no_run
/// use flex_can::{CanAdapter, FlexFrame, SocketCanFdAdapter};
///
/// let mut adapter = SocketCanFdAdapter::new("can0").unwrap();
/// adapter.send(FlexFrame::new(0x1234, &[0, 0, 0, 1])).unwrap();
/// ```
pub struct SocketCanFdAdapter {
    socket: CanFdSocket,
    interface: String,
    read_timeout: Duration,
}

impl SocketCanFdAdapter {
    /// 打开 CAN-FD 接口
    ///
    /// # 错误
    /// - `CanError::Device`: 接口不存在或无权限
    /// - `CanError::Io`: 设置读超时失败
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();
        let socket = open_socket(&interface)?;
        disable_loopback(&socket, &interface);
        socket.set_read_timeout(DEFAULT_READ_TIMEOUT).map_err(CanError::Io)?;
        trace!("SocketCAN-FD interface '{}' opened", interface);

        Ok(Self {
            socket,
            interface,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// 获取接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// 设置读超时
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), CanError> {
        self.socket.set_read_timeout(timeout).map_err(CanError::Io)?;
        self.read_timeout = timeout;
        Ok(())
    }
}

impl CanAdapter for SocketCanFdAdapter {
    fn send(&mut self, frame: FlexFrame) -> Result<(), CanError> {
        write_frame(&self.socket, &frame)
    }

    fn receive(&mut self) -> Result<FlexFrame, CanError> {
        read_frame(&self.socket)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.set_read_timeout(timeout) {
            warn!("Failed to set receive timeout: {}", e);
        }
    }
}

impl SplittableAdapter for SocketCanFdAdapter {
    type RxAdapter = SocketCanFdRxAdapter;
    type TxAdapter = SocketCanFdTxAdapter;

    /// 分离为独立的 RX / TX 适配器
    ///
    /// 接收半部沿用当前 socket，发送半部在同一接口上另开一个 socket，
    /// 两者互不共享文件状态标志。
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        let tx_socket = open_socket(&self.interface)?;
        disable_loopback(&tx_socket, &self.interface);
        trace!(
            "SocketCanFdAdapter split into RX and TX adapters (interface: {})",
            self.interface
        );
        Ok((
            SocketCanFdRxAdapter {
                socket: self.socket,
            },
            SocketCanFdTxAdapter { socket: tx_socket },
        ))
    }
}

/// SocketCAN-FD 接收半部
pub struct SocketCanFdRxAdapter {
    socket: CanFdSocket,
}

impl RxAdapter for SocketCanFdRxAdapter {
    fn receive(&mut self) -> Result<FlexFrame, CanError> {
        read_frame(&self.socket)
    }
}

/// SocketCAN-FD 发送半部
pub struct SocketCanFdTxAdapter {
    socket: CanFdSocket,
}

impl TxAdapter for SocketCanFdTxAdapter {
    fn send(&mut self, frame: FlexFrame) -> Result<(), CanError> {
        write_frame(&self.socket, &frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fd_padded_len() {
        assert_eq!(fd_padded_len(0), 0);
        assert_eq!(fd_padded_len(8), 8);
        assert_eq!(fd_padded_len(9), 12);
        assert_eq!(fd_padded_len(19), 20);
        assert_eq!(fd_padded_len(33), 48);
        assert_eq!(fd_padded_len(64), 64);
    }

    #[test]
    fn test_to_fd_frame_pads_payload() {
        let frame = FlexFrame::new(0x1ABC_DEF0 & 0x1FFF_FFFF, &[1; 19]);
        let fd = to_fd_frame(&frame).unwrap();
        assert_eq!(fd.data().len(), 20);
        assert_eq!(&fd.data()[..19], &[1; 19]);
    }

    #[test]
    fn test_to_fd_frame_rejects_non_extended_id() {
        let frame = FlexFrame::new(0x2000_0000, &[0; 4]);
        match to_fd_frame(&frame) {
            Err(CanError::Device(e)) => assert_eq!(e.kind, CanDeviceErrorKind::InvalidFrame),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    #[ignore] // 需要 vcan0（FD 模式）
    fn test_open_vcan() {
        let adapter = SocketCanFdAdapter::new("vcan0");
        assert!(adapter.is_ok());
    }
}
