//! 取消令牌
//!
//! 基于 channel 断开实现：[`CancelHandle`] 持有唯一的 `Sender`，
//! 调用 `cancel()` 或直接 drop 后，所有 [`CancelToken`] 的接收端立即就绪，
//! 可以与其他 channel 一起参与 `select!`。

use crossbeam_channel::{Receiver, Sender, bounded, never};

/// 取消发起端
pub struct CancelHandle {
    _sender: Sender<()>,
}

impl CancelHandle {
    /// 发起取消（等价于 drop）
    pub fn cancel(self) {}
}

/// 取消监听端（可克隆）
#[derive(Clone)]
pub struct CancelToken {
    receiver: Receiver<()>,
}

impl CancelToken {
    /// 创建一对取消句柄
    pub fn new() -> (CancelHandle, CancelToken) {
        let (sender, receiver) = bounded(0);
        (CancelHandle { _sender: sender }, CancelToken { receiver })
    }

    /// 永远不会被取消的令牌
    pub fn never() -> CancelToken {
        CancelToken { receiver: never() }
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.receiver.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_disconnects_token() {
        let (handle, token) = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_never_token() {
        assert!(!CancelToken::never().is_cancelled());
    }
}
