//! 配置模块
//!
//! 环境变量解析与应用目录

pub mod catalog;
pub mod env;

pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use env::{ConfigPaths, EnvConfig};
