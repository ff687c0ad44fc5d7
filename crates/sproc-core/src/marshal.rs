//! # marshal 模块说明
//!
//! ## 角色定位（Why）
//! - 在领域对象与存储过程的扁平参数表 / 结果行之间做双向转换，规则全部来自 [`CallSignature`]；
//! - 调用期不做任何映射分派，只沿签名槽位的字段路径读写。
//!
//! ## 设计要求（What）
//! - 对象 → 参数：按槽位顺序取值，空值安全（`None` → `Null`），嵌套对象的叶子值拼接进父级参数表；
//! - 行 → 对象：缺失或未知的列保持字段默认值，标记为必填的字段缺失则报错；
//! - 顶层对象为空时的行为由过程显式声明（[`NullCallBehavior`]），从不推断。

use std::any::{Any, TypeId};

use crate::{
    connection::ResultRow,
    error::MarshalError,
    schema::{FieldKind, Marshalable, TypeSchema},
    signature::CallSignature,
    value::Value,
};

/// 顶层对象为空时的调用行为。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NullCallBehavior {
    /// 所有参数绑定为 SQL NULL，交由过程参数默认值处理。
    CallWithDefaults,
    /// 不执行调用，返回值取该返回形态的空值。
    Skip,
}

/// 单个已绑定参数。
#[derive(Clone, Debug, PartialEq)]
pub struct CallArg {
    name: String,
    value: Value,
    sensitive: bool,
}

impl CallArg {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }
}

/// 有序调用参数表。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallArgs {
    entries: Vec<CallArg>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按位置绑定的参数，依次命名为 `$1`、`$2`……
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let entries = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| CallArg {
                name: format!("${}", index + 1),
                value: value.into(),
                sensitive: false,
            })
            .collect();
        Self { entries }
    }

    /// 追加具名参数。
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value.into(), false);
        self
    }

    /// 追加敏感参数，其值不会出现在任何日志中。
    pub fn sensitive_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value.into(), true);
        self
    }

    fn push(&mut self, name: impl Into<String>, value: Value, sensitive: bool) {
        self.entries.push(CallArg {
            name: name.into(),
            value,
            sensitive,
        });
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CallArg> {
        self.entries.iter()
    }

    /// 参数值（按位置）。
    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|arg| arg.value.clone()).collect()
    }

    pub fn get(&self, index: usize) -> Option<&CallArg> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a CallArgs {
    type Item = &'a CallArg;
    type IntoIter = std::slice::Iter<'a, CallArg>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 封送结果。
#[derive(Clone, Debug, PartialEq)]
pub enum Marshaled {
    Call(CallArgs),
    Skip,
}

/// 对象 → 参数表。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `object` 为 `None` 时按 `null_call` 返回全 NULL 参数表或 [`Marshaled::Skip`]；
///   - 签名必须为 `T` 构建，否则返回 [`MarshalError::SignatureMismatch`]；
///   - 可空嵌套对象为 `None` 时，其展开出的全部槽位均为 `Null`。
pub fn marshal<T: Marshalable>(
    object: Option<&T>,
    signature: &CallSignature,
    null_call: NullCallBehavior,
) -> Result<Marshaled, MarshalError> {
    ensure_type::<T>(signature)?;
    let mut args = CallArgs::new();

    match object {
        None if null_call == NullCallBehavior::Skip => return Ok(Marshaled::Skip),
        None => {
            for slot in signature.slots() {
                args.push(slot.name(), Value::Null, slot.is_sensitive());
            }
        }
        Some(object) => {
            for slot in signature.slots() {
                let value = read_slot(signature.schema(), slot.path(), object)?;
                args.push(slot.name(), value, slot.is_sensitive());
            }
        }
    }
    Ok(Marshaled::Call(args))
}

/// 结果行 → 对象。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 位置行按签名槽位顺序读取；具名行按列名读取，嵌套对象既可以来自展开后的列，
///     也可以来自与嵌套字段同名的复合列；
///   - 可空嵌套对象的全部列都为空时保持 `None`；
///   - 必填字段缺失或为 NULL 时返回 [`MarshalError::MissingRequired`]。
pub fn unmarshal<T: Marshalable>(
    row: &ResultRow,
    signature: &CallSignature,
) -> Result<T, MarshalError> {
    ensure_type::<T>(signature)?;
    let mut object = T::default();
    let source = RowSource { row, signature };
    decode_level(
        signature.schema(),
        &mut object,
        &mut Vec::new(),
        "",
        &source,
    )?;
    Ok(object)
}

fn ensure_type<T: Marshalable>(signature: &CallSignature) -> Result<(), MarshalError> {
    if signature.type_id() == TypeId::of::<T>() {
        Ok(())
    } else {
        Err(MarshalError::SignatureMismatch {
            expected: signature.type_name(),
            found: T::type_name(),
        })
    }
}

fn read_slot(schema: &TypeSchema, path: &[usize], owner: &dyn Any) -> Result<Value, MarshalError> {
    let Some((&index, rest)) = path.split_first() else {
        return Ok(Value::Null);
    };
    let Some(field) = schema.fields().get(index) else {
        return Ok(Value::Null);
    };
    if rest.is_empty() {
        return field.encode(owner);
    }
    match (field.kind(), field.codec.nested(owner)) {
        (FieldKind::Nested(inner), Some(nested)) => read_slot(inner, rest, nested),
        _ => Ok(Value::Null),
    }
}

struct RowSource<'a> {
    row: &'a ResultRow,
    signature: &'a CallSignature,
}

impl RowSource<'_> {
    fn leaf(&self, path: &[usize], column: &str) -> Option<Value> {
        match self.row {
            ResultRow::Positional(values) => self
                .signature
                .slot_index(path)
                .and_then(|index| values.get(index))
                .cloned(),
            ResultRow::Named(_) => self.row.get(column).cloned(),
        }
    }

    fn composite(&self, column: &str) -> Option<Value> {
        match self.row.get(column) {
            Some(value @ Value::Composite(_)) => Some(value.clone()),
            _ => None,
        }
    }

    /// 以 `prefix` 为前缀的槽位中是否存在非空值。
    fn any_present(&self, prefix: &[usize]) -> bool {
        self.signature
            .slots()
            .iter()
            .filter(|slot| slot.path().starts_with(prefix))
            .any(|slot| {
                self.leaf(slot.path(), slot.column())
                    .is_some_and(|value| !value.is_null())
            })
    }
}

fn decode_level(
    schema: &TypeSchema,
    owner: &mut dyn Any,
    path: &mut Vec<usize>,
    prefix: &str,
    source: &RowSource<'_>,
) -> Result<(), MarshalError> {
    for field in schema.fields() {
        path.push(field.index());
        let name = if prefix.is_empty() {
            field.name().to_owned()
        } else {
            format!("{prefix}.{}", field.name())
        };

        match field.kind() {
            FieldKind::Nested(inner) => {
                if let Some(composite) = source.composite(field.column_name()) {
                    field.decode(owner, composite)?;
                } else if source.any_present(path) {
                    if let Some(nested) = field.codec.nested_mut(owner) {
                        decode_level(inner, nested, path, &name, source)?;
                    }
                } else if field.is_required() {
                    return Err(MarshalError::MissingRequired { field: name });
                }
            }
            _ => match source.leaf(path, field.column_name()) {
                Some(value) if !value.is_null() => field.decode(owner, value)?,
                _ if field.is_required() => {
                    return Err(MarshalError::MissingRequired { field: name });
                }
                _ => {}
            },
        }
        path.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::FieldCatalog,
        schema::SchemaBuilder,
        signature::ProcedureContext,
    };

    #[derive(Debug, Default, PartialEq)]
    struct Dimensions {
        width: i32,
        height: i32,
    }

    impl Marshalable for Dimensions {
        fn describe(schema: &mut SchemaBuilder<'_, '_, Self>) {
            schema.field("width", |o| &o.width, |o| &mut o.width);
            schema.field("height", |o| &o.height, |o| &mut o.height);
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Parcel {
        id: i64,
        label: Option<String>,
        size: Option<Dimensions>,
    }

    impl Marshalable for Parcel {
        fn describe(schema: &mut SchemaBuilder<'_, '_, Self>) {
            schema.field("id", |o| &o.id, |o| &mut o.id).required();
            schema.optional("label", |o| &o.label, |o| &mut o.label);
            schema.optional_nested("size", |o| &o.size, |o| &mut o.size);
        }
    }

    fn signature(catalog: &FieldCatalog) -> std::sync::Arc<CallSignature> {
        catalog
            .resolve::<Parcel>(&ProcedureContext::input("ship_parcel"))
            .unwrap()
    }

    #[test]
    fn absent_optional_nested_object_marshals_to_nulls() {
        let catalog = FieldCatalog::new();
        let parcel = Parcel {
            id: 7,
            label: None,
            size: None,
        };
        let Marshaled::Call(args) =
            marshal(Some(&parcel), &signature(&catalog), NullCallBehavior::Skip).unwrap()
        else {
            panic!("非空对象必须产生调用");
        };
        assert_eq!(
            args.values(),
            [Value::BigInt(7), Value::Null, Value::Null, Value::Null]
        );
        assert_eq!(args.get(2).unwrap().name(), "size.width");
    }

    #[test]
    fn null_top_level_object_follows_declared_behavior() {
        let catalog = FieldCatalog::new();
        let signature = signature(&catalog);
        assert_eq!(
            marshal::<Parcel>(None, &signature, NullCallBehavior::Skip).unwrap(),
            Marshaled::Skip
        );
        let Marshaled::Call(args) =
            marshal::<Parcel>(None, &signature, NullCallBehavior::CallWithDefaults).unwrap()
        else {
            panic!("CallWithDefaults 必须产生调用");
        };
        assert_eq!(args.len(), 4);
        assert!(args.iter().all(|arg| arg.value().is_null()));
    }

    #[test]
    fn named_rows_tolerate_unknown_and_missing_columns() {
        let catalog = FieldCatalog::new();
        let row = ResultRow::named([
            ("id", Value::Int(9)),
            ("unexpected", Value::from("ignored")),
            ("height", Value::Int(4)),
        ]);
        let parcel: Parcel = unmarshal(&row, &signature(&catalog)).unwrap();
        assert_eq!(
            parcel,
            Parcel {
                id: 9,
                label: None,
                size: Some(Dimensions {
                    width: 0,
                    height: 4
                }),
            }
        );
    }

    #[test]
    fn nested_object_can_arrive_as_composite_column() {
        let catalog = FieldCatalog::new();
        let row = ResultRow::named([
            ("id", Value::Int(1)),
            ("size", Value::Composite(vec![Value::Int(2), Value::Int(3)])),
        ]);
        let parcel: Parcel = unmarshal(&row, &signature(&catalog)).unwrap();
        assert_eq!(
            parcel.size,
            Some(Dimensions {
                width: 2,
                height: 3
            })
        );
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let catalog = FieldCatalog::new();
        let row = ResultRow::named([("label", Value::from("fragile"))]);
        let err = unmarshal::<Parcel>(&row, &signature(&catalog)).unwrap_err();
        assert_eq!(
            err,
            MarshalError::MissingRequired {
                field: "id".to_owned()
            }
        );
    }

    #[test]
    fn signature_for_another_type_is_rejected() {
        let catalog = FieldCatalog::new();
        let other = catalog
            .resolve::<Dimensions>(&ProcedureContext::input("ship_parcel"))
            .unwrap();
        let err = marshal(Some(&Parcel::default()), &other, NullCallBehavior::Skip).unwrap_err();
        assert!(matches!(err, MarshalError::SignatureMismatch { .. }));
    }
}
