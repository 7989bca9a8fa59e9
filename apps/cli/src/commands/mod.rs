//! 命令定义和实现

pub mod limit_switches;
pub mod position;
pub mod run;
pub mod stop;

pub use limit_switches::LimitSwitchesCommand;
pub use position::PositionCommand;
pub use run::RunCommand;
pub use stop::StopCommand;
