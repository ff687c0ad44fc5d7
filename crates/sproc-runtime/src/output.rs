//! # output 模块说明
//!
//! ## 角色定位（Why）
//! - 调用方以 Rust 类型声明想要的返回值：`()`、`Option<T>`、`Vec<T>`、[`Scalar`] 或 [`Scalars`]；
//! - 执行器只按过程声明的返回形态给出 [`CallResult`]，本模块把它还原为调用方类型并执行输出校验。
//!
//! ## 设计要求（What）
//! - 跳过的调用（空对象 + `Skip`）直接得到 [`CallOutput::empty`]，不触达数据库；
//! - 对象结果使用过程的出参签名（与入参签名分开缓存）解封送；
//! - 结果形态与调用方类型不兼容时返回 [`MarshalError::TypeMismatch`]，不做猜测。

use sproc_core::{
    CallResult, FieldCatalog, Marshalable, MarshalError, ProcedureBinding, ResultRow, ScalarField,
    SprocError, ValidationGate, Value, error::ValueMismatch, unmarshal,
};

/// 调用方可请求的返回类型。
pub trait CallOutput: Sized {
    /// 跳过调用时的返回值。
    fn empty() -> Self;

    /// 由形态化结果构造。
    fn from_result(
        result: CallResult,
        catalog: &FieldCatalog,
        binding: &ProcedureBinding,
    ) -> Result<Self, SprocError>;

    /// 输出校验；默认不校验。
    fn validate(
        &self,
        _gate: &ValidationGate,
        _catalog: &FieldCatalog,
        _binding: &ProcedureBinding,
    ) -> Result<(), SprocError> {
        Ok(())
    }
}

/// 单个标量返回值，空结果为 `S::default()`。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scalar<S>(pub S);

/// 标量列表：每行第一列，或数组标量的全部元素。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scalars<S>(pub Vec<S>);

impl CallOutput for () {
    fn empty() -> Self {}

    fn from_result(
        _result: CallResult,
        _catalog: &FieldCatalog,
        _binding: &ProcedureBinding,
    ) -> Result<Self, SprocError> {
        Ok(())
    }
}

impl<O: Marshalable> CallOutput for Option<O> {
    fn empty() -> Self {
        None
    }

    fn from_result(
        result: CallResult,
        catalog: &FieldCatalog,
        binding: &ProcedureBinding,
    ) -> Result<Self, SprocError> {
        let row = match result {
            CallResult::Void | CallResult::Row(None) => None,
            CallResult::Row(Some(row)) => Some(row),
            CallResult::Rows(rows) => rows.into_iter().next(),
            CallResult::Scalar(Value::Null) => None,
            CallResult::Scalar(other) => return Err(shape_mismatch(binding, "row", &other)),
        };
        row.map(|row| decode_row(&row, catalog, binding)).transpose()
    }

    fn validate(
        &self,
        gate: &ValidationGate,
        catalog: &FieldCatalog,
        binding: &ProcedureBinding,
    ) -> Result<(), SprocError> {
        match self {
            Some(object) => validate_object(object, gate, catalog, binding),
            None => Ok(()),
        }
    }
}

impl<O: Marshalable> CallOutput for Vec<O> {
    fn empty() -> Self {
        Vec::new()
    }

    fn from_result(
        result: CallResult,
        catalog: &FieldCatalog,
        binding: &ProcedureBinding,
    ) -> Result<Self, SprocError> {
        let rows = match result {
            CallResult::Void | CallResult::Row(None) => Vec::new(),
            CallResult::Row(Some(row)) => vec![row],
            CallResult::Rows(rows) => rows,
            CallResult::Scalar(Value::Null) => Vec::new(),
            CallResult::Scalar(other) => return Err(shape_mismatch(binding, "rows", &other)),
        };
        rows.iter()
            .map(|row| decode_row(row, catalog, binding))
            .collect()
    }

    fn validate(
        &self,
        gate: &ValidationGate,
        catalog: &FieldCatalog,
        binding: &ProcedureBinding,
    ) -> Result<(), SprocError> {
        self.iter()
            .try_for_each(|object| validate_object(object, gate, catalog, binding))
    }
}

impl<S: ScalarField> CallOutput for Scalar<S> {
    fn empty() -> Self {
        Scalar(S::default())
    }

    fn from_result(
        result: CallResult,
        _catalog: &FieldCatalog,
        binding: &ProcedureBinding,
    ) -> Result<Self, SprocError> {
        let value = match result {
            CallResult::Void | CallResult::Row(None) => Value::Null,
            CallResult::Scalar(value) => value,
            CallResult::Row(Some(row)) => row.into_first(),
            CallResult::Rows(rows) => rows
                .into_iter()
                .next()
                .map_or(Value::Null, ResultRow::into_first),
        };
        scalar(binding, value).map(Scalar)
    }
}

impl<S: ScalarField> CallOutput for Scalars<S> {
    fn empty() -> Self {
        Scalars(Vec::new())
    }

    fn from_result(
        result: CallResult,
        _catalog: &FieldCatalog,
        binding: &ProcedureBinding,
    ) -> Result<Self, SprocError> {
        let values = match result {
            CallResult::Void | CallResult::Row(None) | CallResult::Scalar(Value::Null) => {
                Vec::new()
            }
            CallResult::Scalar(Value::Array(values)) => values,
            CallResult::Scalar(value) => vec![value],
            CallResult::Row(Some(row)) => vec![row.into_first()],
            CallResult::Rows(rows) => rows.into_iter().map(ResultRow::into_first).collect(),
        };
        values
            .into_iter()
            .map(|value| scalar(binding, value))
            .collect::<Result<Vec<_>, _>>()
            .map(Scalars)
    }
}

fn decode_row<O: Marshalable>(
    row: &ResultRow,
    catalog: &FieldCatalog,
    binding: &ProcedureBinding,
) -> Result<O, SprocError> {
    let signature = catalog.resolve::<O>(&binding.output_context())?;
    Ok(unmarshal(row, &signature)?)
}

fn validate_object<O: Marshalable>(
    object: &O,
    gate: &ValidationGate,
    catalog: &FieldCatalog,
    binding: &ProcedureBinding,
) -> Result<(), SprocError> {
    if !binding.validation().output {
        return Ok(());
    }
    let signature = catalog.resolve::<O>(&binding.output_context())?;
    gate.check_output(binding.name(), signature.schema(), object)
}

fn scalar<S: ScalarField>(binding: &ProcedureBinding, value: Value) -> Result<S, SprocError> {
    if value.is_null() {
        return Ok(S::default());
    }
    S::from_value(value).map_err(|mismatch| MarshalError::mismatch(binding.name(), mismatch).into())
}

fn shape_mismatch(binding: &ProcedureBinding, expected: &'static str, found: &Value) -> SprocError {
    MarshalError::mismatch(
        binding.name(),
        ValueMismatch {
            expected,
            found: found.kind_name(),
        },
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sproc_core::{NullCallBehavior, ReturnShape, SchemaBuilder};

    #[derive(Debug, Default, PartialEq)]
    struct Ticket {
        id: i32,
        subject: String,
    }

    impl Marshalable for Ticket {
        fn describe(schema: &mut SchemaBuilder<'_, '_, Self>) {
            schema.field("id", |o| &o.id, |o| &mut o.id);
            schema.field("subject", |o| &o.subject, |o| &mut o.subject);
        }
    }

    fn binding(returns: ReturnShape) -> ProcedureBinding {
        ProcedureBinding::new("find_tickets", returns, NullCallBehavior::Skip)
    }

    fn row(id: i32, subject: &str) -> ResultRow {
        ResultRow::named([("id", Value::Int(id)), ("subject", Value::from(subject))])
    }

    #[test]
    fn rows_decode_into_objects() {
        let catalog = FieldCatalog::new();
        let tickets = Vec::<Ticket>::from_result(
            CallResult::Rows(vec![row(1, "a"), row(2, "b")]),
            &catalog,
            &binding(ReturnShape::Rows),
        )
        .unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[1].subject, "b");
    }

    #[test]
    fn empty_row_is_none() {
        let catalog = FieldCatalog::new();
        let ticket = Option::<Ticket>::from_result(
            CallResult::Row(None),
            &catalog,
            &binding(ReturnShape::Row),
        )
        .unwrap();
        assert_eq!(ticket, None);
    }

    #[test]
    fn scalars_collect_first_columns_and_arrays() {
        let catalog = FieldCatalog::new();
        let from_rows = Scalars::<i32>::from_result(
            CallResult::Rows(vec![
                ResultRow::positional([Value::Int(1)]),
                ResultRow::positional([Value::Int(2)]),
            ]),
            &catalog,
            &binding(ReturnShape::Rows),
        )
        .unwrap();
        assert_eq!(from_rows, Scalars(vec![1, 2]));

        let from_array = Scalars::<i64>::from_result(
            CallResult::Scalar(Value::Array(vec![Value::Int(3), Value::Null])),
            &catalog,
            &binding(ReturnShape::Scalar),
        )
        .unwrap();
        assert_eq!(from_array, Scalars(vec![3, 0]));
    }

    #[test]
    fn scalar_type_mismatch_is_reported() {
        let catalog = FieldCatalog::new();
        let err = Scalar::<i32>::from_result(
            CallResult::Scalar(Value::from("seven")),
            &catalog,
            &binding(ReturnShape::Scalar),
        )
        .unwrap_err();
        assert_eq!(err.code(), "sproc.marshal.mismatch");
    }
}
