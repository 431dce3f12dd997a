//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod app;
pub mod progress;
pub mod security;
pub mod share;
pub mod storage;

// Re-exports for convenience
pub use app::{
    AppEvent, AppSource, AppStatus, AppStatusView, ManagedApplication, PortMapping,
    TransitionError, VolumeMapping,
};
pub use progress::{Outcome, ProgressEvent};
pub use security::{CheckOutcome, CheckResult, SecurityReport};
pub use share::{HostAlias, Settings, Share};
pub use storage::StoragePoolPartition;
