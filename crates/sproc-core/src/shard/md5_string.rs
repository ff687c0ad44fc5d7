use super::ShardKeyStrategy;
use crate::{error::ShardKeyError, value::Value};

/// 基于字符串 MD5 的虚拟分片键。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 取第一个参数；若为数组则取其第一个元素（空数组 → 0）；
///   - 缺失或 NULL 返回 0；其余非文本值返回 [`ShardKeyError`]；空字符串照常参与哈希；
///   - 原始键 = `d[15] | d[14] << 8 | d[13] << 16`（`d` 为 MD5 摘要），共 24 位；
/// - **风险 (Trade-offs)**：跳过 `d[12]` 的取位方式沿用已有数据的分布，改动会使既有行落到别的分片。
#[derive(Clone, Copy, Debug, Default)]
pub struct Md5StringStrategy;

impl Md5StringStrategy {
    /// 名称 `md5-string`。
    pub const NAME: &'static str = "md5-string";

    fn key_of(text: &str) -> u64 {
        let digest = ::md5::compute(text.as_bytes());
        u64::from(digest[15]) | u64::from(digest[14]) << 8 | u64::from(digest[13]) << 16
    }
}

impl ShardKeyStrategy for Md5StringStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn shard_key(&self, arguments: &[Value]) -> Result<u64, ShardKeyError> {
        let input = match arguments.first() {
            Some(Value::Array(elements)) => elements.first(),
            other => other,
        };
        match input {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Text(text)) => Ok(Self::key_of(text)),
            Some(other) => Err(ShardKeyError {
                strategy: Self::NAME,
                expected: "text",
                found: other.kind_name(),
            }),
        }
    }
}
