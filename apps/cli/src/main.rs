//! # Flex CLI
//!
//! 在 CAN-FD 总线上执行运动计划、查询节点状态。
//!
//! ```bash
//! # 执行运动计划（Ctrl+C 中断并停止运动）
//! flex-cli --interface can0 run --plan plan.toml
//!
//! # 读取限位开关
//! flex-cli limit-switches --nodes gantry_x,gantry_y
//!
//! # 读取 / 重估计电机位置
//! flex-cli position --nodes gantry_x --update
//!
//! # 广播停止
//! flex-cli stop
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flex_driver::MotionConfig;
use std::path::PathBuf;

mod commands;
mod connection;
mod plan;

use commands::{LimitSwitchesCommand, PositionCommand, RunCommand, StopCommand};

/// Flex CLI - 运动协调命令行工具
#[derive(Parser, Debug)]
#[command(name = "flex-cli")]
#[command(about = "Run Flex move plans and query motion nodes", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（TOML），缺省使用内置默认值
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// CAN-FD 接口
    #[arg(short, long, global = true, default_value = "can0")]
    interface: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 执行运动计划
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 读取限位开关
    LimitSwitches {
        #[command(flatten)]
        args: LimitSwitchesCommand,
    },

    /// 读取电机位置
    Position {
        #[command(flatten)]
        args: PositionCommand,
    },

    /// 广播停止请求
    Stop {
        #[command(flatten)]
        args: StopCommand,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<MotionConfig> {
    match path {
        Some(path) => MotionConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(MotionConfig::default()),
    }
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("flex_cli=info,flex_driver=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run { args } => args.execute(&cli.interface, &config),
        Commands::LimitSwitches { args } => args.execute(&cli.interface, &config),
        Commands::Position { args } => args.execute(&cli.interface, &config),
        Commands::Stop { args } => args.execute(&cli.interface, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use flex_protocol::NodeId;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_global_options() {
        let cli = Cli::parse_from([
            "flex-cli",
            "--interface",
            "vcan0",
            "run",
            "--plan",
            "plan.toml",
            "--start-index",
            "3",
            "--ignore-stalls",
        ]);
        assert_eq!(cli.interface, "vcan0");
        match cli.command {
            Commands::Run { args } => {
                assert_eq!(args.plan, PathBuf::from("plan.toml"));
                assert_eq!(args.start_index, 3);
                assert!(args.ignore_stalls);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_node_list() {
        let cli = Cli::parse_from(["flex-cli", "position", "--nodes", "gantry_x,head_l", "--update"]);
        match cli.command {
            Commands::Position { args } => {
                assert_eq!(args.nodes, vec![NodeId::GantryX, NodeId::HeadL]);
                assert!(args.update);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_node_is_rejected() {
        assert!(Cli::try_parse_from(["flex-cli", "limit-switches", "--nodes", "elbow"]).is_err());
    }

    #[test]
    fn test_missing_config_file_fails() {
        let path = PathBuf::from("/nonexistent/flex.toml");
        assert!(load_config(Some(&path)).is_err());
        assert_eq!(load_config(None).unwrap(), MotionConfig::default());
    }
}
