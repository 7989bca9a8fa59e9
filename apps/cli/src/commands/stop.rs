//! 停止命令
//!
//! 广播 `StopRequest`，节点收到后立即中止当前运动并清空运动组

use anyhow::Result;
use clap::Args;
use flex_driver::{Messenger, MotionConfig};
use flex_protocol::{ErrorCode, Message, NodeId};

use crate::connection::open_messenger;

/// 停止命令参数
#[derive(Args, Debug)]
pub struct StopCommand {
    /// 需要确认的节点（缺省为 gantry_x, gantry_y, head）
    #[arg(short, long, value_delimiter = ',')]
    pub nodes: Vec<NodeId>,
}

impl StopCommand {
    /// 执行停止
    pub fn execute(&self, interface: &str, config: &MotionConfig) -> Result<()> {
        let messenger = open_messenger(interface, config)?;

        println!("🛑 发送停止请求...");
        let code = messenger.ensure_send(
            NodeId::Broadcast,
            &Message::StopRequest,
            &self.nodes,
            config.messenger.ack_timeout(),
        )?;

        match code {
            ErrorCode::Ok | ErrorCode::StopRequested => println!("✅ 停止完成"),
            other => println!("⚠️ 停止请求应答异常: {:?}", other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_command_defaults() {
        let cmd = StopCommand { nodes: Vec::new() };
        assert!(cmd.nodes.is_empty());
    }
}
