//! 字段访问与值映射。
//!
//! 每个字段由 `Accessor`（一对字段访问函数）加一个 `Mapping`（Rust 值 ↔ [`Value`]）组成；
//! 组合 `OptionMapping`、`ListMapping` 即可覆盖可空字段、对象列表等形态，映射方式在构建期一次选定。

use std::{
    any::{Any, type_name},
    collections::BTreeMap,
    marker::PhantomData,
    sync::Arc,
};

use super::{DatabaseEnum, Marshalable, TypeSchema, ValueTransformer};
use crate::{
    error::{MarshalError, ValueMismatch},
    value::{ScalarField, Value},
};

/// 类型擦除后的字段编解码入口，由 [`super::FieldDescriptor`] 持有。
pub(crate) trait FieldCodec: Send + Sync {
    fn encode(&self, owner: &dyn Any) -> Result<Value, MarshalError>;

    fn decode(&self, owner: &mut dyn Any, value: Value) -> Result<(), MarshalError>;

    /// 嵌套对象字段的只读视图；可空且为空时返回 `None`。
    fn nested<'a>(&self, owner: &'a dyn Any) -> Option<&'a dyn Any>;

    /// 嵌套对象字段的可变视图；可空字段会先以默认值填充。
    fn nested_mut<'a>(&self, owner: &'a mut dyn Any) -> Option<&'a mut dyn Any>;

    /// 对象列表的元素视图。
    fn elements<'a>(&self, owner: &'a dyn Any) -> Vec<&'a dyn Any>;
}

/// Rust 值与 [`Value`] 之间的映射。`decode` 只会收到非 `Null` 的值。
pub(super) trait Mapping<F>: Send + Sync + 'static {
    fn encode(&self, field: &'static str, value: &F) -> Result<Value, MarshalError>;

    fn decode(&self, field: &'static str, value: Value) -> Result<F, MarshalError>;

    fn is_nested(&self) -> bool {
        false
    }

    fn as_nested<'a>(&self, _value: &'a F) -> Option<&'a dyn Any> {
        None
    }

    fn as_nested_mut<'a>(&self, _value: &'a mut F) -> Option<&'a mut dyn Any> {
        None
    }

    fn elements<'a>(&self, _value: &'a F) -> Vec<&'a dyn Any> {
        Vec::new()
    }
}

pub(super) struct Accessor<T, F, M> {
    pub(super) field: &'static str,
    pub(super) get: fn(&T) -> &F,
    pub(super) get_mut: fn(&mut T) -> &mut F,
    pub(super) mapping: M,
}

impl<T, F, M> Accessor<T, F, M>
where
    T: 'static,
{
    fn owner<'a>(&self, owner: &'a dyn Any) -> Result<&'a T, MarshalError> {
        owner
            .downcast_ref::<T>()
            .ok_or_else(foreign_owner::<T>)
    }

    fn owner_mut<'a>(&self, owner: &'a mut dyn Any) -> Result<&'a mut T, MarshalError> {
        owner
            .downcast_mut::<T>()
            .ok_or_else(foreign_owner::<T>)
    }
}

fn foreign_owner<T>() -> MarshalError {
    MarshalError::SignatureMismatch {
        expected: type_name::<T>(),
        found: "a different owner type",
    }
}

impl<T, F, M> FieldCodec for Accessor<T, F, M>
where
    T: 'static,
    F: Default + 'static,
    M: Mapping<F>,
{
    fn encode(&self, owner: &dyn Any) -> Result<Value, MarshalError> {
        let owner = self.owner(owner)?;
        self.mapping.encode(self.field, (self.get)(owner))
    }

    fn decode(&self, owner: &mut dyn Any, value: Value) -> Result<(), MarshalError> {
        let owner = self.owner_mut(owner)?;
        let decoded = if value.is_null() {
            F::default()
        } else {
            self.mapping.decode(self.field, value)?
        };
        *(self.get_mut)(owner) = decoded;
        Ok(())
    }

    fn nested<'a>(&self, owner: &'a dyn Any) -> Option<&'a dyn Any> {
        let owner = owner.downcast_ref::<T>()?;
        self.mapping.as_nested((self.get)(owner))
    }

    fn nested_mut<'a>(&self, owner: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let owner = owner.downcast_mut::<T>()?;
        self.mapping.as_nested_mut((self.get_mut)(owner))
    }

    fn elements<'a>(&self, owner: &'a dyn Any) -> Vec<&'a dyn Any> {
        match owner.downcast_ref::<T>() {
            Some(owner) => self.mapping.elements((self.get)(owner)),
            None => Vec::new(),
        }
    }
}

pub(super) struct ScalarMapping;

impl<S: ScalarField> Mapping<S> for ScalarMapping {
    fn encode(&self, _field: &'static str, value: &S) -> Result<Value, MarshalError> {
        Ok(value.to_value())
    }

    fn decode(&self, field: &'static str, value: Value) -> Result<S, MarshalError> {
        S::from_value(value).map_err(|mismatch| MarshalError::mismatch(field, mismatch))
    }
}

pub(super) struct EnumMapping;

impl<E: DatabaseEnum> Mapping<E> for EnumMapping {
    fn encode(&self, _field: &'static str, value: &E) -> Result<Value, MarshalError> {
        Ok(Value::Enum(value.name().to_owned()))
    }

    fn decode(&self, field: &'static str, value: Value) -> Result<E, MarshalError> {
        let Some(name) = value.as_text() else {
            return Err(MarshalError::mismatch(
                field,
                ValueMismatch {
                    expected: "enum",
                    found: value.kind_name(),
                },
            ));
        };
        E::from_name(name).ok_or_else(|| MarshalError::UnknownEnumVariant {
            field: field.to_owned(),
            enum_name: E::TYPE_NAME,
            value: name.to_owned(),
        })
    }
}

pub(super) struct NestedMapping<N> {
    pub(super) schema: Arc<TypeSchema>,
    pub(super) _marker: PhantomData<fn() -> N>,
}

impl<N: Marshalable> Mapping<N> for NestedMapping<N> {
    fn encode(&self, _field: &'static str, value: &N) -> Result<Value, MarshalError> {
        encode_object(&self.schema, value)
    }

    fn decode(&self, field: &'static str, value: Value) -> Result<N, MarshalError> {
        match value {
            Value::Composite(values) => {
                let mut object = N::default();
                decode_object(&self.schema, &mut object, values)?;
                Ok(object)
            }
            other => Err(MarshalError::mismatch(
                field,
                ValueMismatch {
                    expected: "composite",
                    found: other.kind_name(),
                },
            )),
        }
    }

    fn is_nested(&self) -> bool {
        true
    }

    fn as_nested<'a>(&self, value: &'a N) -> Option<&'a dyn Any> {
        Some(value)
    }

    fn as_nested_mut<'a>(&self, value: &'a mut N) -> Option<&'a mut dyn Any> {
        Some(value)
    }
}

pub(super) struct OptionMapping<M>(pub(super) M);

impl<X, M> Mapping<Option<X>> for OptionMapping<M>
where
    X: Default + 'static,
    M: Mapping<X>,
{
    fn encode(&self, field: &'static str, value: &Option<X>) -> Result<Value, MarshalError> {
        match value {
            Some(inner) => self.0.encode(field, inner),
            None => Ok(Value::Null),
        }
    }

    fn decode(&self, field: &'static str, value: Value) -> Result<Option<X>, MarshalError> {
        self.0.decode(field, value).map(Some)
    }

    fn is_nested(&self) -> bool {
        self.0.is_nested()
    }

    fn as_nested<'a>(&self, value: &'a Option<X>) -> Option<&'a dyn Any> {
        value.as_ref().and_then(|inner| self.0.as_nested(inner))
    }

    fn as_nested_mut<'a>(&self, value: &'a mut Option<X>) -> Option<&'a mut dyn Any> {
        if !self.0.is_nested() {
            return None;
        }
        self.0.as_nested_mut(value.get_or_insert_with(X::default))
    }
}

pub(super) struct ListMapping<M>(pub(super) M);

impl<X, M> Mapping<Vec<X>> for ListMapping<M>
where
    X: Default + 'static,
    M: Mapping<X>,
{
    fn encode(&self, field: &'static str, value: &Vec<X>) -> Result<Value, MarshalError> {
        value
            .iter()
            .map(|element| self.0.encode(field, element))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn decode(&self, field: &'static str, value: Value) -> Result<Vec<X>, MarshalError> {
        let elements = match value {
            Value::Array(elements) => elements,
            other => return Err(expected_array(field, &other)),
        };
        elements
            .into_iter()
            .map(|element| {
                if element.is_null() {
                    Ok(X::default())
                } else {
                    self.0.decode(field, element)
                }
            })
            .collect()
    }

    fn elements<'a>(&self, value: &'a Vec<X>) -> Vec<&'a dyn Any> {
        value
            .iter()
            .filter_map(|element| self.0.as_nested(element))
            .collect()
    }
}

fn expected_array(field: &'static str, found: &Value) -> MarshalError {
    MarshalError::mismatch(
        field,
        ValueMismatch {
            expected: "array",
            found: found.kind_name(),
        },
    )
}

pub(super) struct MapMapping;

impl<K, V> Mapping<BTreeMap<K, V>> for MapMapping
where
    K: ScalarField + Ord,
    V: ScalarField,
{
    fn encode(&self, _field: &'static str, value: &BTreeMap<K, V>) -> Result<Value, MarshalError> {
        Ok(Value::Array(
            value
                .iter()
                .map(|(key, value)| Value::Composite(vec![key.to_value(), value.to_value()]))
                .collect(),
        ))
    }

    fn decode(&self, field: &'static str, value: Value) -> Result<BTreeMap<K, V>, MarshalError> {
        let entries = match value {
            Value::Array(entries) => entries,
            other => return Err(expected_array(field, &other)),
        };
        let mut map = BTreeMap::new();
        for entry in entries {
            let pair = match entry {
                Value::Composite(pair) => pair,
                other => {
                    return Err(MarshalError::mismatch(
                        field,
                        ValueMismatch {
                            expected: "key/value composite",
                            found: other.kind_name(),
                        },
                    ));
                }
            };
            let mut pair = pair.into_iter();
            let key = pair.next().unwrap_or(Value::Null);
            let value = pair.next().unwrap_or(Value::Null);
            let key = if key.is_null() {
                K::default()
            } else {
                K::from_value(key).map_err(|mismatch| MarshalError::mismatch(field, mismatch))?
            };
            let value = if value.is_null() {
                V::default()
            } else {
                V::from_value(value).map_err(|mismatch| MarshalError::mismatch(field, mismatch))?
            };
            map.insert(key, value);
        }
        Ok(map)
    }
}

pub(super) struct TransformMapping<F>(pub(super) Arc<dyn ValueTransformer<F>>);

impl<F: 'static> Mapping<F> for TransformMapping<F> {
    fn encode(&self, field: &'static str, value: &F) -> Result<Value, MarshalError> {
        self.0
            .to_storage(value)
            .map_err(|message| self.failure(field, message))
    }

    fn decode(&self, field: &'static str, value: Value) -> Result<F, MarshalError> {
        self.0
            .from_storage(value)
            .map_err(|message| self.failure(field, message))
    }
}

impl<F: 'static> TransformMapping<F> {
    fn failure(&self, field: &'static str, message: String) -> MarshalError {
        MarshalError::Transform {
            field: field.to_owned(),
            transformer: self.0.name(),
            message,
        }
    }
}

/// 把对象编码为一行复合值，字段按模式顺序排列，嵌套对象成为内层复合值。
pub(crate) fn encode_object(schema: &TypeSchema, owner: &dyn Any) -> Result<Value, MarshalError> {
    schema
        .fields
        .iter()
        .map(|field| field.encode(owner))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Composite)
}

/// 从复合值回填对象；缺失或为空的列保持默认值，必填字段除外。
pub(crate) fn decode_object(
    schema: &TypeSchema,
    owner: &mut dyn Any,
    values: Vec<Value>,
) -> Result<(), MarshalError> {
    let mut values = values.into_iter();
    for field in &schema.fields {
        match values.next() {
            Some(value) if !value.is_null() => field.decode(owner, value)?,
            _ if field.required => {
                return Err(MarshalError::MissingRequired {
                    field: field.name.to_owned(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}
