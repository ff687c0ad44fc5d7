//! # connection 模块说明
//!
//! ## 角色定位（Why）
//! - 定义核心与外部连接池之间的最小契约：核心只挑选连接、绑定调用、解读结果，从不拥有连接；
//! - 驱动实现（同步 PostgreSQL 客户端、测试桩）通过 [`DataSource`] 与 [`ProcedureConnection`] 接入。
//!
//! ## 设计要求（What）
//! - [`DataSource::connection`] 返回的守卫在析构时把连接归还给池，任何退出路径都成立；
//! - 语句超时是连接级会话设置，调用前设置、调用后恢复，由执行器负责；
//! - [`DriverError::StatementTimeout`] 是驱动报告“超时取消”的唯一方式，执行器据此区分超时与一般失败。

use std::{fmt, time::Duration};

use thiserror::Error;

use crate::{
    error::MarshalError,
    literal,
    marshal::CallArgs,
    value::Value,
};

/// 驱动层错误，原样作为 `CallExecution` 的 `source()` 上抛。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    /// 语句因超过会话超时被数据库取消。
    #[error("statement cancelled after {0:?}")]
    StatementTimeout(Duration),

    /// 连接获取或通信失败。
    #[error("connection failure: {0}")]
    Connection(String),

    /// 数据库返回的语句错误。
    #[error("statement failed [{sqlstate}]: {message}")]
    Statement { sqlstate: String, message: String },
}

/// 单行结果。
#[derive(Clone, Debug, PartialEq)]
pub enum ResultRow {
    /// 带列名的行。
    Named(Vec<(String, Value)>),
    /// 按签名槽位顺序排列的行。
    Positional(Vec<Value>),
}

impl ResultRow {
    pub fn named<I, K>(columns: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        ResultRow::Named(
            columns
                .into_iter()
                .map(|(column, value)| (column.into(), value))
                .collect(),
        )
    }

    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        ResultRow::Positional(values.into_iter().collect())
    }

    /// 按列名取值；位置行没有列名，总是返回 `None`。
    pub fn get(&self, column: &str) -> Option<&Value> {
        match self {
            ResultRow::Named(columns) => columns
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value),
            ResultRow::Positional(_) => None,
        }
    }

    /// 第一列。
    pub fn first(&self) -> Option<&Value> {
        match self {
            ResultRow::Named(columns) => columns.first().map(|(_, value)| value),
            ResultRow::Positional(values) => values.first(),
        }
    }

    pub fn into_first(self) -> Value {
        match self {
            ResultRow::Named(columns) => columns.into_iter().next().map(|(_, value)| value),
            ResultRow::Positional(values) => values.into_iter().next(),
        }
        .unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        match self {
            ResultRow::Named(columns) => columns.len(),
            ResultRow::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 驱动返回的原始结果。
#[derive(Clone, Debug, PartialEq)]
pub enum RawResult {
    Void,
    Rows(Vec<ResultRow>),
}

/// 已映射到声明返回形态的结果。
#[derive(Clone, Debug, PartialEq)]
pub enum CallResult {
    Void,
    Scalar(Value),
    Row(Option<ResultRow>),
    Rows(Vec<ResultRow>),
}

impl CallResult {
    /// 是否为该形态的空值（用于分片搜索）。
    pub fn is_empty(&self) -> bool {
        match self {
            CallResult::Void => true,
            CallResult::Scalar(value) => value.is_null(),
            CallResult::Row(row) => row.is_none(),
            CallResult::Rows(rows) => rows.is_empty(),
        }
    }

    /// 合并两个分片的结果：多行按分片顺序拼接，其余形态保留第一个非空结果。
    pub fn merge(self, other: CallResult) -> CallResult {
        match (self, other) {
            (CallResult::Rows(mut rows), CallResult::Rows(more)) => {
                rows.extend(more);
                CallResult::Rows(rows)
            }
            (current, next) if current.is_empty() => next,
            (current, _) => current,
        }
    }
}

/// 一次已绑定的过程调用。
#[derive(Clone, Debug, PartialEq)]
pub struct BoundCall {
    procedure: String,
    args: CallArgs,
}

impl BoundCall {
    pub fn new(procedure: impl Into<String>, args: CallArgs) -> Self {
        Self {
            procedure: procedure.into(),
            args,
        }
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn args(&self) -> &CallArgs {
        &self.args
    }

    /// 参数化 SQL：`SELECT * FROM proc($1, $2)`。
    pub fn statement(&self) -> String {
        let placeholders = (1..=self.args.len())
            .map(|index| format!("${index}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT * FROM {}({placeholders})", self.procedure)
    }

    /// 文本协议参数；`None` 表示 SQL NULL。
    pub fn text_parameters(&self) -> Vec<Option<String>> {
        self.args.iter().map(|arg| literal::encode(arg.value())).collect()
    }
}

impl fmt::Display for BoundCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.statement())
    }
}

/// 一条可执行存储过程的连接。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `statement_timeout`/`set_statement_timeout` 读写会话级语句超时，`None` 表示不限时；
///   - `call` 同步执行，超时时必须返回 [`DriverError::StatementTimeout`]；
///   - 实现不得自行重试。
pub trait ProcedureConnection {
    fn statement_timeout(&self) -> Option<Duration>;

    fn set_statement_timeout(&mut self, timeout: Option<Duration>) -> Result<(), DriverError>;

    fn call(&mut self, call: &BoundCall) -> Result<RawResult, DriverError>;
}

/// 一个分片的数据源（连接池）。
pub trait DataSource: Send + Sync {
    /// 诊断名称。
    fn name(&self) -> &str;

    /// 借出一条连接；守卫析构即归还。
    fn connection(&self) -> Result<Box<dyn ProcedureConnection + '_>, DriverError>;
}

/// 把驱动返回的文本列按签名槽位类型解析为位置行。
pub fn decode_text_row(
    columns: &[Option<String>],
    kinds: &[crate::schema::FieldKind],
) -> Result<ResultRow, MarshalError> {
    columns
        .iter()
        .zip(kinds)
        .map(|(column, kind)| match column {
            Some(text) => literal::decode_text(text, kind),
            None => Ok(Value::Null),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(ResultRow::Positional)
}
