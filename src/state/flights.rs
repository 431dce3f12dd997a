//! 单飞守卫
//!
//! 同一实体同一时间最多一个进行中的工作流。
//! 检查与登记在同一把锁内完成，守卫释放时自动注销

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// 键已有进行中的操作
#[derive(Debug, Error, PartialEq, Eq)]
#[error("an operation on '{key}' ({operation}) is already in progress")]
pub struct FlightConflict {
    pub key: String,
    pub operation: String,
}

/// 进行中的操作
#[derive(Clone, Debug, Serialize)]
pub struct Flight {
    pub key: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    flights: Mutex<HashMap<String, Flight>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flight>> {
        self.flights.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 进行中操作登记表
#[derive(Clone, Default)]
pub struct FlightRegistry {
    inner: Arc<Inner>,
}

impl FlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记操作，键已被占用时返回冲突
    pub fn acquire(
        &self,
        key: impl Into<String>,
        operation: impl Into<String>,
    ) -> Result<FlightGuard, FlightConflict> {
        let key = key.into();
        let operation = operation.into();
        let mut flights = self.inner.lock();

        if let Some(existing) = flights.get(&key) {
            return Err(FlightConflict {
                key,
                operation: existing.operation.clone(),
            });
        }

        debug!(key = %key, operation = %operation, "Flight acquired");
        flights.insert(
            key.clone(),
            Flight {
                key: key.clone(),
                operation,
                started_at: Utc::now(),
            },
        );

        Ok(FlightGuard {
            inner: self.inner.clone(),
            key,
        })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// 当前进行中的操作（按键排序）
    pub fn active(&self) -> Vec<Flight> {
        let mut flights: Vec<Flight> = self.inner.lock().values().cloned().collect();
        flights.sort_by(|a, b| a.key.cmp(&b.key));
        flights
    }
}

/// 登记守卫，释放时注销
pub struct FlightGuard {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.lock().remove(&self.key);
        debug!(key = %self.key, "Flight released");
    }
}

/// 常用键
pub fn app_key(id: &str) -> String {
    format!("app:{}", id)
}

pub const ENGINE_KEY: &str = "engine";
pub const POOL_KEY: &str = "pool";
pub const SECURITY_KEY: &str = "security";
