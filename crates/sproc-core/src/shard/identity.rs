use super::ShardKeyStrategy;
use crate::{error::ShardKeyError, value::Value};

/// 直接使用整数参数作为原始分片键；负数取绝对值，缺失或 NULL 为 0。
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityStrategy;

impl IdentityStrategy {
    pub const NAME: &'static str = "identity";
}

impl ShardKeyStrategy for IdentityStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn shard_key(&self, arguments: &[Value]) -> Result<u64, ShardKeyError> {
        match arguments.first() {
            None | Some(Value::Null) => Ok(0),
            Some(value) => value
                .as_i64()
                .map(i64::unsigned_abs)
                .ok_or_else(|| ShardKeyError {
                    strategy: Self::NAME,
                    expected: "integer",
                    found: value.kind_name(),
                }),
        }
    }
}

/// 未分片的过程：总是分片 0。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoShardStrategy;

impl NoShardStrategy {
    pub const NAME: &'static str = "none";
}

impl ShardKeyStrategy for NoShardStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn shard_key(&self, _arguments: &[Value]) -> Result<u64, ShardKeyError> {
        Ok(0)
    }
}
