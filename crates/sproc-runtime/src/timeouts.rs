//! # timeouts 模块说明
//!
//! ## 角色定位（Why）
//! - 运维需要在不重启进程的情况下调整单个过程的超时；
//! - 执行器在每次调用开始时读取一次生效值，因此改动只影响之后发出的调用，进行中的调用不受影响。
//!
//! ## 设计要求（What）
//! - 读路径零锁：`ArcSwap::load` 后查表；
//! - 写路径整表替换并递增修订号，修订号可用于日志确认热更新是否生效。

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use sproc_core::configuration::DEFAULT_TIMEOUT;

/// 可热替换的过程超时表。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `timeout_for` 对未登记的过程返回构造时的默认值；
///   - `set`/`replace` 原子生效，之后的 `timeout_for` 立即看到新值；
///   - 修订号从 0 开始，每次写入加一。
/// - **执行 (How)**：单条修改走 `rcu`，在并发写入时自动重试，保证不丢更新。
pub struct TimeoutTable {
    default: Duration,
    table: ArcSwap<HashMap<String, Duration>>,
    revision: AtomicU64,
}

impl TimeoutTable {
    pub fn new(default: Duration) -> Self {
        Self::with_entries(default, HashMap::new())
    }

    pub fn with_entries(default: Duration, entries: HashMap<String, Duration>) -> Self {
        Self {
            default,
            table: ArcSwap::from_pointee(entries),
            revision: AtomicU64::new(0),
        }
    }

    /// 过程当前生效的超时。
    pub fn timeout_for(&self, procedure: &str) -> Duration {
        self.table
            .load()
            .get(procedure)
            .copied()
            .unwrap_or(self.default)
    }

    /// 修改单个过程的超时。
    pub fn set(&self, procedure: impl Into<String>, timeout: Duration) {
        let procedure = procedure.into();
        self.table.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(procedure.clone(), timeout);
            next
        });
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// 整表替换。
    pub fn replace(&self, entries: HashMap<String, Duration>) {
        self.table.store(Arc::new(entries));
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default
    }
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl fmt::Debug for TimeoutTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutTable")
            .field("default", &self.default)
            .field("entries", &self.table.load().len())
            .field("revision", &self.revision())
            .finish()
    }
}
