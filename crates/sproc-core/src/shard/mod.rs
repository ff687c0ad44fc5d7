//! # shard 模块说明
//!
//! ## 角色定位（Why）
//! - 从调用参数计算原始分片键（`u64`），最终分片下标（`raw mod N`）由运行时的分片解析器负责；
//! - 策略集合是封闭注册表：配置装载时按名称解析一次，未知名称立即报错，而不是等到首次调用。
//!
//! ## 设计要求（What）
//! - [`ShardKeyStrategy::shard_key`] 确定性、无副作用；空输入或 NULL 返回 0，类型不符返回 [`ShardKeyError`]，
//!   不把错误参数悄悄落到分片 0；
//! - 新策略只需实现同一 trait 并注册到 [`StrategyRegistry`]。

mod identity;
mod md5_string;

use std::{collections::HashMap, fmt, sync::Arc};

pub use identity::{IdentityStrategy, NoShardStrategy};
pub use md5_string::Md5StringStrategy;

use crate::{
    error::{ConfigurationError, ShardKeyError},
    value::Value,
};

/// 分片键策略。
pub trait ShardKeyStrategy: Send + Sync + fmt::Debug {
    /// 注册表中的名称。
    fn name(&self) -> &'static str;

    /// 计算原始分片键。
    fn shard_key(&self, arguments: &[Value]) -> Result<u64, ShardKeyError>;
}

/// 能提供自身分片键输入值的领域类型。
pub trait ShardSource {
    fn shard_key_input(&self) -> Value;
}

/// 按策略计算原始分片键。
pub fn compute_shard_id(
    strategy: &dyn ShardKeyStrategy,
    arguments: &[Value],
) -> Result<u64, ShardKeyError> {
    strategy.shard_key(arguments)
}

/// 分片策略注册表。
///
/// # 教案式注释
/// - **意图 (Why)**：把“类名字符串驱动的动态加载”收敛为启动期可校验的名称映射；
/// - **契约 (What)**：`with_defaults` 预置 `md5-string`、`identity`、`none` 三个策略；
///   同名重复注册返回 [`ConfigurationError::DuplicateStrategy`]。
#[derive(Clone, Debug, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn ShardKeyStrategy>>,
}

impl StrategyRegistry {
    /// 空注册表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 含内建策略的注册表。
    pub fn with_defaults() -> Self {
        let mut strategies: HashMap<&'static str, Arc<dyn ShardKeyStrategy>> = HashMap::new();
        for strategy in [
            Arc::new(Md5StringStrategy) as Arc<dyn ShardKeyStrategy>,
            Arc::new(IdentityStrategy),
            Arc::new(NoShardStrategy),
        ] {
            strategies.insert(strategy.name(), strategy);
        }
        Self { strategies }
    }

    /// 注册自定义策略。
    pub fn register(&mut self, strategy: Arc<dyn ShardKeyStrategy>) -> Result<(), ConfigurationError> {
        let name = strategy.name();
        if self.strategies.contains_key(name) {
            return Err(ConfigurationError::DuplicateStrategy(name.to_owned()));
        }
        self.strategies.insert(name, strategy);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ShardKeyStrategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.strategies.keys().copied()
    }
}
