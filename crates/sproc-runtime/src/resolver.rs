//! 分片解析：原始分片键对分片数取模，选出数据源。

use std::{fmt, sync::Arc};

use sproc_core::{DataSource, SprocError};

/// 固定分片列表上的解析器。
///
/// # 教案式说明
/// - **意图 (Why)**：分片拓扑在进程生命周期内不变，用不可变 `Vec` 即可无锁共享；
/// - **契约 (What)**：
///   - 分片下标 = `raw % N`，`N` 为构造时传入的数据源个数；
///   - `N == 0` 时任何解析都返回 [`SprocError::NoShardsConfigured`]，而非 panic；
/// - **风险 (Trade-offs)**：取模意味着扩容会重新分布全部键，扩容需配合数据迁移。
pub struct ShardResolver {
    shards: Vec<Arc<dyn DataSource>>,
}

impl ShardResolver {
    pub fn new(shards: Vec<Arc<dyn DataSource>>) -> Self {
        Self { shards }
    }

    /// 单数据源部署。
    pub fn single(source: Arc<dyn DataSource>) -> Self {
        Self::new(vec![source])
    }

    /// 解析原始分片键，返回分片下标与对应数据源。
    pub fn resolve(&self, raw: u64) -> Result<(usize, &Arc<dyn DataSource>), SprocError> {
        let count = self.shards.len();
        if count == 0 {
            return Err(SprocError::NoShardsConfigured);
        }
        // u64 -> usize 在 32 位目标上可能截断，先在 u64 域取模。
        let index = (raw % count as u64) as usize;
        Ok((index, &self.shards[index]))
    }

    /// 全部分片，按下标顺序。
    pub fn shards(&self) -> &[Arc<dyn DataSource>] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl fmt::Debug for ShardResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.shards.iter().map(|shard| shard.name()))
            .finish()
    }
}
