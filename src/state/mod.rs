//! 运行时状态模块
//!
//! 管理应用状态、实体存储和进行中的工作流

pub mod app_state;
pub mod flights;
pub mod store;

pub use app_state::AppState;
pub use flights::{FlightConflict, FlightGuard, FlightRegistry};
pub use store::{Store, StoreData, StoreError};
