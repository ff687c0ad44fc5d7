//! # configuration 模块说明
//!
//! ## 角色定位（Why）
//! - 描述“一个存储过程如何被调用”：参数顺序、返回形态、超时、分片策略、空对象行为、校验与分片范围；
//! - 绑定由外部配置（TOML 文档，见 [`ProcedureConfig`]）装载，核心只消费，不拥有配置源。
//!
//! ## 设计要求（What）
//! - 分片策略在装载时按名称解析为 `Arc<dyn ShardKeyStrategy>`，未知名称立即失败；
//! - 空对象行为没有默认值，必须逐个过程声明；
//! - 绑定中的 `timeout` 只是初始值，运行期以超时表为准，改动仅影响之后发出的调用。

mod document;

use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;

pub use document::{Defaults, NullCallSetting, ProcedureConfig, ProcedureEntry};

use crate::{
    marshal::NullCallBehavior,
    shard::{NoShardStrategy, ShardKeyStrategy},
    signature::ProcedureContext,
    value::Value,
};

/// 未声明超时时使用的默认值。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 声明的返回形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnShape {
    Void,
    Scalar,
    Row,
    Rows,
}

/// 调用落在哪些分片上。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardScope {
    /// 按分片键选择唯一分片。
    #[default]
    Single,
    /// 依次在所有分片执行，多行结果按分片顺序拼接。
    All,
    /// 依次尝试各分片，返回第一个非空结果。
    Search,
}

/// 输入/输出校验开关。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ValidationMode {
    pub input: bool,
    pub output: bool,
}

/// 单个存储过程的绑定描述。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `parameters` 为 `Some` 时，入参签名按此顺序重排；
///   - `shard_key` 列出参与分片键计算的参数位置，为空表示把全部参数交给策略；
///   - `sensitive` 中的参数名无论字段上是否标记，都不会出现在日志里。
#[derive(Clone)]
pub struct ProcedureBinding {
    name: String,
    parameters: Option<Vec<String>>,
    returns: ReturnShape,
    timeout: Duration,
    strategy: Arc<dyn ShardKeyStrategy>,
    shard_key: Vec<usize>,
    null_call: NullCallBehavior,
    validation: ValidationMode,
    scope: ShardScope,
    sensitive: Vec<String>,
}

impl ProcedureBinding {
    /// 以必需项构造绑定：未分片、默认超时、不校验。
    pub fn new(name: impl Into<String>, returns: ReturnShape, null_call: NullCallBehavior) -> Self {
        Self {
            name: name.into(),
            parameters: None,
            returns,
            timeout: DEFAULT_TIMEOUT,
            strategy: Arc::new(NoShardStrategy),
            shard_key: Vec::new(),
            null_call,
            validation: ValidationMode::default(),
            scope: ShardScope::Single,
            sensitive: Vec::new(),
        }
    }

    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = Some(parameters.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ShardKeyStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_shard_key(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.shard_key = positions.into_iter().collect();
        self
    }

    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_scope(mut self, scope: ShardScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_sensitive<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> Option<&[String]> {
        self.parameters.as_deref()
    }

    pub fn returns(&self) -> ReturnShape {
        self.returns
    }

    /// 声明的初始超时。
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn strategy(&self) -> &Arc<dyn ShardKeyStrategy> {
        &self.strategy
    }

    pub fn null_call(&self) -> NullCallBehavior {
        self.null_call
    }

    pub fn validation(&self) -> ValidationMode {
        self.validation
    }

    pub fn scope(&self) -> ShardScope {
        self.scope
    }

    pub fn sensitive(&self) -> &[String] {
        &self.sensitive
    }

    pub fn is_sensitive(&self, parameter: &str) -> bool {
        self.sensitive.iter().any(|name| name == parameter)
    }

    /// 入参签名的构建上下文。
    pub fn input_context(&self) -> ProcedureContext {
        let context = ProcedureContext::input(self.name.as_str());
        match &self.parameters {
            Some(parameters) => context.with_parameters(parameters.iter().cloned()),
            None => context,
        }
    }

    /// 出参签名的构建上下文。
    pub fn output_context(&self) -> ProcedureContext {
        ProcedureContext::output(self.name.as_str())
    }

    /// 选出参与分片键计算的参数；越界位置视为 `Null`。
    pub fn shard_key_arguments(&self, arguments: &[Value]) -> Vec<Value> {
        if self.shard_key.is_empty() {
            return arguments.to_vec();
        }
        self.shard_key
            .iter()
            .map(|&position| arguments.get(position).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

impl fmt::Debug for ProcedureBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureBinding")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .field("timeout", &self.timeout)
            .field("strategy", &self.strategy.name())
            .field("null_call", &self.null_call)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_key_positions_select_arguments() {
        let binding = ProcedureBinding::new("find_article", ReturnShape::Row, NullCallBehavior::Skip)
            .with_shard_key([1, 5]);
        let arguments = [Value::Int(1), Value::from("sku")];
        assert_eq!(
            binding.shard_key_arguments(&arguments),
            [Value::from("sku"), Value::Null]
        );

        let all = ProcedureBinding::new("find_article", ReturnShape::Row, NullCallBehavior::Skip);
        assert_eq!(all.shard_key_arguments(&arguments).len(), 2);
    }
}
