//! 服务层模块
//!
//! 命令编排、事件流与配置生成

pub mod config_gen;
pub mod sequencer;
pub mod stream;
pub mod workflows;
