//! run 命令
//!
//! 执行运动计划文件

use anyhow::{Context, Result};
use clap::Args;
use flex_driver::{CancelToken, MotionConfig, MoveGroupRunner, plan_nodes};
use std::path::PathBuf;
use std::time::Instant;

use crate::commands::position::print_positions;
use crate::connection::open_messenger;
use crate::plan::PlanFile;

/// 运动计划执行参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 计划文件路径（TOML）
    #[arg(short, long)]
    pub plan: PathBuf,

    /// 第一个运动组的组号
    #[arg(long, default_value_t = 0)]
    pub start_index: u8,

    /// 步进电机直线运动忽略堵转检测
    #[arg(long)]
    pub ignore_stalls: bool,
}

impl RunCommand {
    /// 执行运动计划
    pub fn execute(&self, interface: &str, config: &MotionConfig) -> Result<()> {
        println!("📜 加载计划: {}", self.plan.display());
        let plan = PlanFile::load(&self.plan)?;
        let move_groups = plan.to_move_groups()?;
        let nodes = plan_nodes(&move_groups);
        println!("    {} 个运动组, 节点 {:?}", move_groups.len(), nodes);

        let messenger = open_messenger(interface, config)?;

        // Ctrl+C：中断等待并停止运动
        let (handle, token) = CancelToken::new();
        let mut handle = Some(handle);
        ctrlc::set_handler(move || {
            if let Some(handle) = handle.take() {
                eprintln!("\nReceived interrupt signal. Stopping motion...");
                handle.cancel();
            }
        })
        .context("Failed to set signal handler")?;

        let start = Instant::now();
        let mut runner = MoveGroupRunner::new(move_groups, self.start_index, self.ignore_stalls)
            .with_config(config.clone());
        let positions = runner.run_with_cancel(&messenger, &token)?;

        println!("✅ 执行完成，耗时 {:.2} 秒", start.elapsed().as_secs_f64());
        print_positions(&positions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_defaults() {
        let cmd = RunCommand {
            plan: PathBuf::from("plan.toml"),
            start_index: 0,
            ignore_stalls: false,
        };
        assert_eq!(cmd.start_index, 0);
        assert!(!cmd.ignore_stalls);
    }
}
