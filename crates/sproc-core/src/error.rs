//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为签名构建、封送、分片解析与调用执行提供集中定义的错误语义；
//! - 每个错误都带有稳定错误码（`<域>.<语义>`）与 [`ErrorCategory`]，便于日志聚合与告警分流。
//!
//! ## 设计要求（What）
//! - 所有错误类型均派生 `thiserror::Error`，可直接用 `?` 汇入 [`SprocError`]；
//! - [`SignatureError`] 可克隆：签名目录会把构建失败与成功结果一样缓存下来，后续调用方拿到同一份错误；
//! - 除日志格式化时跳过空值外，任何错误都同步返回给调用点，不做吞没。

use std::{borrow::Cow, fmt, time::Duration};

use thiserror::Error;

use crate::{connection::DriverError, validation::Violation};

/// 稳定错误码集合。
///
/// 错误码一旦发布不得改名；新增语义请追加常量。
pub mod codes {
    /// 字段既无内建映射也无转换器。
    pub const SIGNATURE_UNMAPPABLE: &str = "sproc.signature.unmappable";
    /// 同一类型内出现重复的列名或位置。
    pub const SIGNATURE_DUPLICATE: &str = "sproc.signature.duplicate";
    /// 过程声明的参数与签名槽位对不上。
    pub const SIGNATURE_PARAMETER: &str = "sproc.signature.parameter";
    /// 输入或输出对象违反约束。
    pub const VALIDATION_VIOLATED: &str = "sproc.validation.violated";
    /// 分片解析器未配置任何分片。
    pub const SHARD_NONE_CONFIGURED: &str = "sproc.shard.none_configured";
    /// 分片键参数的类型与策略要求不符。
    pub const SHARD_KEY_INVALID: &str = "sproc.shard.key_invalid";
    /// 调用超过超时阈值被中止。
    pub const CALL_TIMEOUT: &str = "sproc.call.timeout";
    /// 驱动层调用失败。
    pub const CALL_FAILED: &str = "sproc.call.failed";
    /// 必填字段缺失。
    pub const MARSHAL_MISSING: &str = "sproc.marshal.missing";
    /// 值与字段类型不匹配。
    pub const MARSHAL_MISMATCH: &str = "sproc.marshal.mismatch";
    /// 自定义转换器失败。
    pub const MARSHAL_TRANSFORM: &str = "sproc.marshal.transform";
    /// 文本字面量无法解析。
    pub const MARSHAL_LITERAL: &str = "sproc.marshal.literal";
    /// 配置文档非法。
    pub const CONFIG_INVALID: &str = "sproc.config.invalid";
    /// 配置引用了未注册的分片策略。
    pub const CONFIG_UNKNOWN_STRATEGY: &str = "sproc.config.unknown_strategy";
    /// 调用了未注册的存储过程。
    pub const PROCEDURE_UNKNOWN: &str = "sproc.procedure.unknown";
}

/// 错误分类，驱动调用方的处置策略。
///
/// - `Configuration`：部署或声明错误，修正配置前重试没有意义；
/// - `Validation`：调用方数据不合法；
/// - `Timeout`：调用被超时中止，是否重试由调用方决定（本层从不隐式重试）；
/// - `Execution`：数据库侧失败，原样上抛；
/// - `Data`：结果或参数与声明的类型不符。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Timeout,
    Execution,
    Data,
}

/// 签名构建阶段的错误，全部在首次解析时立即暴露。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// 字段没有内建映射，也没有注册转换器；或类型嵌套形成环。
    #[error("field `{field}` of `{type_name}` cannot be mapped: {reason}")]
    UnmappableType {
        type_name: &'static str,
        field: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    /// 同一类型声明了重复的列名。
    #[error("column `{column}` is declared twice on `{type_name}`")]
    DuplicateColumn {
        type_name: &'static str,
        column: String,
    },

    /// 同一类型声明了重复的显式位置。
    #[error("position {position} is declared twice on `{type_name}`")]
    DuplicatePosition {
        type_name: &'static str,
        position: usize,
    },

    /// 过程声明的参数在签名中找不到对应槽位。
    #[error("procedure `{procedure}` declares parameter `{parameter}` which `{type_name}` does not provide")]
    UnknownParameter {
        procedure: String,
        type_name: &'static str,
        parameter: String,
    },

    /// 签名槽位没有出现在过程声明的参数列表中。
    #[error("`{type_name}` provides `{slot}` which procedure `{procedure}` does not declare")]
    UndeclaredParameter {
        procedure: String,
        type_name: &'static str,
        slot: String,
    },
}

impl SignatureError {
    /// 构造 `UnmappableType`，减少调用点的 `Cow` 样板。
    pub fn unmappable(
        type_name: &'static str,
        field: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        SignatureError::UnmappableType {
            type_name,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SignatureError::UnmappableType { .. } => codes::SIGNATURE_UNMAPPABLE,
            SignatureError::DuplicateColumn { .. } | SignatureError::DuplicatePosition { .. } => {
                codes::SIGNATURE_DUPLICATE
            }
            SignatureError::UnknownParameter { .. } | SignatureError::UndeclaredParameter { .. } => {
                codes::SIGNATURE_PARAMETER
            }
        }
    }
}

/// 分片键参数的类型不被策略接受。
///
/// 空参数或 NULL 不属于此错误，策略对它们返回原始键 0。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("shard strategy `{strategy}` expects {expected}, found {found}")]
pub struct ShardKeyError {
    pub strategy: &'static str,
    pub expected: &'static str,
    pub found: &'static str,
}

/// 单个值与期望类型不符。
///
/// 由 [`crate::value::ScalarField::from_value`] 返回，封送器再补上字段名转为 [`MarshalError::TypeMismatch`]。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("expected {expected}, found {found}")]
pub struct ValueMismatch {
    pub expected: &'static str,
    pub found: &'static str,
}

/// 对象与参数/结果行之间转换时的错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MarshalError {
    /// 标记为必填的字段在结果行中缺失或为 NULL。
    #[error("required field `{field}` is missing from the result")]
    MissingRequired { field: String },

    /// 值类型与字段声明不符。
    #[error("field `{field}`: {mismatch}")]
    TypeMismatch {
        field: String,
        #[source]
        mismatch: ValueMismatch,
    },

    /// 枚举名称不在已知变体内。
    #[error("field `{field}`: `{value}` is not a variant of `{enum_name}`")]
    UnknownEnumVariant {
        field: String,
        enum_name: &'static str,
        value: String,
    },

    /// 自定义转换器拒绝了值。
    #[error("field `{field}`: transformer `{transformer}` failed: {message}")]
    Transform {
        field: String,
        transformer: &'static str,
        message: String,
    },

    /// 签名属于另一个领域类型。
    #[error("signature was built for `{expected}` but `{found}` was supplied")]
    SignatureMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// PostgreSQL 文本字面量无法解析。
    #[error("malformed literal: {reason}")]
    Literal { reason: String },
}

impl MarshalError {
    /// 为类型不匹配补充字段名。
    pub fn mismatch(field: impl Into<String>, mismatch: ValueMismatch) -> Self {
        MarshalError::TypeMismatch {
            field: field.into(),
            mismatch,
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            MarshalError::MissingRequired { .. } => codes::MARSHAL_MISSING,
            MarshalError::TypeMismatch { .. }
            | MarshalError::UnknownEnumVariant { .. }
            | MarshalError::SignatureMismatch { .. } => codes::MARSHAL_MISMATCH,
            MarshalError::Transform { .. } => codes::MARSHAL_TRANSFORM,
            MarshalError::Literal { .. } => codes::MARSHAL_LITERAL,
        }
    }
}

/// 配置装载错误，全部发生在进程启动阶段。
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// TOML 文档无法解析或字段缺失。
    #[error("invalid procedure configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// 引用了注册表中不存在的分片策略。
    #[error("procedure `{procedure}` references unknown shard strategy `{strategy}`")]
    UnknownStrategy { procedure: String, strategy: String },

    /// 同名策略重复注册。
    #[error("shard strategy `{0}` is already registered")]
    DuplicateStrategy(String),

    /// 同名过程重复声明。
    #[error("procedure `{0}` is declared more than once")]
    DuplicateProcedure(String),

    /// 超时为零。
    #[error("procedure `{0}` declares a zero timeout")]
    ZeroTimeout(String),
}

impl ConfigurationError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConfigurationError::UnknownStrategy { .. } => codes::CONFIG_UNKNOWN_STRATEGY,
            _ => codes::CONFIG_INVALID,
        }
    }
}

/// 输入校验还是输出校验。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationPhase {
    Input,
    Output,
}

impl fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationPhase::Input => f.write_str("input"),
            ValidationPhase::Output => f.write_str("output"),
        }
    }
}

/// 调用点可见的顶层错误。
///
/// # 教案式说明
/// - **意图 (Why)**：调用链 “签名 → 校验 → 封送 → 分片 → 执行 → 解封送” 上任何一步失败，都以同一枚举
///   交还给调用方；每个变体对应一类稳定错误码。
/// - **契约 (What)**：
///   - `ConstraintViolation` 列出全部违规项而非第一条；
///   - `CallTimeout` 只描述本次调用，不影响后续调用及其超时设置；
///   - `CallExecution` 原样携带驱动错误作为 `source()`。
/// - **设计权衡 (Trade-offs)**：内部子错误通过 `#[from]` 汇入，`?` 即可传播；代价是匹配时需要多一层解构。
#[derive(Debug, Error)]
pub enum SprocError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(
        "{phase} validation of `{procedure}` failed with {} violation(s): {}",
        .violations.len(),
        render_violations(.violations)
    )]
    ConstraintViolation {
        procedure: String,
        phase: ValidationPhase,
        violations: Vec<Violation>,
    },

    #[error("no shards configured")]
    NoShardsConfigured,

    #[error("shard key of `{procedure}` cannot be computed")]
    ShardKey {
        procedure: String,
        #[source]
        source: ShardKeyError,
    },

    #[error("call to `{procedure}` exceeded its timeout of {timeout:?}")]
    CallTimeout {
        procedure: String,
        timeout: Duration,
    },

    #[error("call to `{procedure}` failed")]
    CallExecution {
        procedure: String,
        #[source]
        source: DriverError,
    },

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("procedure `{0}` is not registered")]
    UnknownProcedure(String),
}

impl SprocError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SprocError::Signature(err) => err.code(),
            SprocError::ConstraintViolation { .. } => codes::VALIDATION_VIOLATED,
            SprocError::NoShardsConfigured => codes::SHARD_NONE_CONFIGURED,
            SprocError::ShardKey { .. } => codes::SHARD_KEY_INVALID,
            SprocError::CallTimeout { .. } => codes::CALL_TIMEOUT,
            SprocError::CallExecution { .. } => codes::CALL_FAILED,
            SprocError::Marshal(err) => err.code(),
            SprocError::Configuration(err) => err.code(),
            SprocError::UnknownProcedure(_) => codes::PROCEDURE_UNKNOWN,
        }
    }

    /// 错误分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            SprocError::Signature(_)
            | SprocError::NoShardsConfigured
            | SprocError::ShardKey { .. }
            | SprocError::Configuration(_)
            | SprocError::UnknownProcedure(_) => ErrorCategory::Configuration,
            SprocError::ConstraintViolation { .. } => ErrorCategory::Validation,
            SprocError::CallTimeout { .. } => ErrorCategory::Timeout,
            SprocError::CallExecution { .. } => ErrorCategory::Execution,
            SprocError::Marshal(_) => ErrorCategory::Data,
        }
    }

    /// 若为约束违规，返回全部违规项。
    pub fn violations(&self) -> Option<&[Violation]> {
        match self {
            SprocError::ConstraintViolation { violations, .. } => Some(violations),
            _ => None,
        }
    }
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_lists_every_entry() {
        let err = SprocError::ConstraintViolation {
            procedure: "create_item".to_owned(),
            phase: ValidationPhase::Input,
            violations: vec![
                Violation::new("name", "must not be null"),
                Violation::new("count", "must be between 2 and 10"),
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2 violation(s)"));
        assert!(rendered.contains("name: must not be null"));
        assert!(rendered.contains("count: must be between 2 and 10"));
        assert_eq!(err.code(), codes::VALIDATION_VIOLATED);
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn execution_error_keeps_driver_source() {
        use std::error::Error as _;

        let err = SprocError::CallExecution {
            procedure: "get_simple_int".to_owned(),
            source: DriverError::Statement {
                sqlstate: "42883".to_owned(),
                message: "function does not exist".to_owned(),
            },
        };
        let source = err.source().expect("驱动错误必须作为 source 暴露");
        assert!(source.to_string().contains("42883"));
        assert_eq!(err.category(), ErrorCategory::Execution);
    }
}
