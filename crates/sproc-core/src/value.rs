//! 存储过程参数与结果列的统一值模型。
//!
//! # 教案式说明
//! - **意图 (Why)**：封送器、分片策略、字面量编解码与日志渲染都需要面对“一个参数值”，
//!   用同一枚举承载可避免在各层之间反复定义类型映射；
//! - **契约 (What)**：[`Value`] 覆盖 PostgreSQL 过程调用中出现的标量、日期、枚举、复合行与数组；
//!   [`ScalarField`] 描述 Rust 标量类型与 [`Value`] 之间的双向映射，是 `SchemaBuilder::field` 的约束；
//! - **风险 (Trade-offs)**：数值读取是宽松的（`Int` 可读入 `i64`），但不会做有损收窄，越界即视为类型不符。

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ValueMismatch;

/// 单个参数或结果列的值。
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Char(char),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// 按名称序列化的数据库枚举。
    Enum(String),
    /// 复合类型（一行），字段按类型声明顺序排列。
    Composite(Vec<Value>),
    /// 数组，元素顺序即列表顺序。
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// 值的种类名称，用于错误信息。
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::SmallInt(_) => "smallint",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Real(_) => "real",
            Value::Double(_) => "double",
            Value::Char(_) => "char",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::Enum(_) => "enum",
            Value::Composite(_) => "composite",
            Value::Array(_) => "array",
        }
    }

    /// 文本视图；枚举名称同样视为文本。
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) | Value::Enum(text) => Some(text),
            _ => None,
        }
    }

    /// 任意宽度整数的 `i64` 视图。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInt(value) => Some(i64::from(*value)),
            Value::Int(value) => Some(i64::from(*value)),
            Value::BigInt(value) => Some(*value),
            _ => None,
        }
    }

    fn mismatch(&self, expected: &'static str) -> ValueMismatch {
        ValueMismatch {
            expected,
            found: self.kind_name(),
        }
    }
}

/// 人类可读的渲染，仅用于日志与错误信息；线上传输请使用 [`crate::literal::encode`]。
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::SmallInt(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::BigInt(value) => write!(f, "{value}"),
            Value::Real(value) => write!(f, "{value}"),
            Value::Double(value) => write!(f, "{value}"),
            Value::Char(value) => write!(f, "{value}"),
            Value::Text(value) | Value::Enum(value) => f.write_str(value),
            Value::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            Value::Timestamp(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Composite(values) => {
                f.write_str("(")?;
                write_joined(f, values)?;
                f.write_str(")")
            }
            Value::Array(values) => {
                f.write_str("[")?;
                write_joined(f, values)?;
                f.write_str("]")
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            f.write_str(",")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from!(
    bool => Bool,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Real,
    f64 => Double,
    char => Char,
    String => Text,
    NaiveDate => Date,
    NaiveDateTime => Timestamp,
);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// 标量语义种类。
///
/// `Date` 与 `Timestamp` 的区分决定封送时是否丢弃时间部分。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Char,
    Text,
    Date,
    Timestamp,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::SmallInt => "smallint",
            ScalarKind::Int => "int",
            ScalarKind::BigInt => "bigint",
            ScalarKind::Real => "real",
            ScalarKind::Double => "double",
            ScalarKind::Char => "char",
            ScalarKind::Text => "text",
            ScalarKind::Date => "date",
            ScalarKind::Timestamp => "timestamp",
        }
    }
}

/// 可直接映射为单列的 Rust 标量类型。
///
/// # 教案式说明
/// - **契约 (What)**：`to_value` 为全函数；`from_value` 只接受语义兼容的值，`Null` 由调用方预先处理；
/// - **扩展 (How)**：业务自定义标量应优先通过 [`crate::schema::ValueTransformer`] 接入，
///   而非为外部类型实现本 trait。
pub trait ScalarField: Clone + Default + Send + Sync + 'static {
    const KIND: ScalarKind;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, ValueMismatch>;
}

impl ScalarField for bool {
    const KIND: ScalarKind = ScalarKind::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        match value {
            Value::Bool(flag) => Ok(flag),
            other => Err(other.mismatch("bool")),
        }
    }
}

macro_rules! integer_field {
    ($($ty:ty => $kind:ident / $variant:ident),* $(,)?) => {
        $(
            impl ScalarField for $ty {
                const KIND: ScalarKind = ScalarKind::$kind;

                fn to_value(&self) -> Value {
                    Value::$variant(*self)
                }

                fn from_value(value: Value) -> Result<Self, ValueMismatch> {
                    value
                        .as_i64()
                        .and_then(|wide| <$ty>::try_from(wide).ok())
                        .ok_or_else(|| value.mismatch(ScalarKind::$kind.name()))
                }
            }
        )*
    };
}

integer_field!(
    i16 => SmallInt / SmallInt,
    i32 => Int / Int,
    i64 => BigInt / BigInt,
);

impl ScalarField for f32 {
    const KIND: ScalarKind = ScalarKind::Real;

    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        match value {
            Value::Real(real) => Ok(real),
            other => Err(other.mismatch("real")),
        }
    }
}

impl ScalarField for f64 {
    const KIND: ScalarKind = ScalarKind::Double;

    fn to_value(&self) -> Value {
        Value::Double(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        match value {
            Value::Double(double) => Ok(double),
            Value::Real(real) => Ok(f64::from(real)),
            other => Err(other.mismatch("double")),
        }
    }
}

impl ScalarField for char {
    const KIND: ScalarKind = ScalarKind::Char;

    fn to_value(&self) -> Value {
        Value::Char(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        match value {
            Value::Char(ch) => Ok(ch),
            Value::Text(ref text) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Ok(ch),
                    _ => Err(value.mismatch("char")),
                }
            }
            other => Err(other.mismatch("char")),
        }
    }
}

impl ScalarField for String {
    const KIND: ScalarKind = ScalarKind::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        match value {
            Value::Text(text) | Value::Enum(text) => Ok(text),
            Value::Char(ch) => Ok(ch.to_string()),
            other => Err(other.mismatch("text")),
        }
    }
}

impl ScalarField for NaiveDate {
    const KIND: ScalarKind = ScalarKind::Date;

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        match value {
            Value::Date(date) => Ok(date),
            Value::Timestamp(timestamp) => Ok(timestamp.date()),
            other => Err(other.mismatch("date")),
        }
    }
}

impl ScalarField for NaiveDateTime {
    const KIND: ScalarKind = ScalarKind::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueMismatch> {
        match value {
            Value::Timestamp(timestamp) => Ok(timestamp),
            // 仅日期的列读回时落在当天零点。
            Value::Date(date) => Ok(date.and_time(chrono::NaiveTime::MIN)),
            other => Err(other.mismatch("timestamp")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_widen_but_never_truncate() {
        assert_eq!(i64::from_value(Value::Int(7)), Ok(7));
        assert_eq!(i32::from_value(Value::SmallInt(-3)), Ok(-3));
        let err = i16::from_value(Value::BigInt(i64::from(i16::MAX) + 1)).unwrap_err();
        assert_eq!(err.expected, "smallint");
        assert_eq!(err.found, "bigint");
    }

    #[test]
    fn date_only_value_reads_back_at_midnight() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let restored = NaiveDateTime::from_value(Value::Date(date)).unwrap();
        assert_eq!(restored, date.and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn display_renders_nested_structures() {
        let value = Value::Array(vec![Value::Composite(vec![
            Value::from("a"),
            Value::Null,
            Value::Int(3),
        ])]);
        assert_eq!(value.to_string(), "[(a,NULL,3)]");
    }
}
