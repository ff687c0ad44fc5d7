//! 声明式字段 Builder。

use std::{borrow::Cow, collections::BTreeMap, marker::PhantomData, sync::Arc};

use super::{
    DatabaseEnum, FieldDescriptor, FieldKind, Marshalable, TypeSchema, ValueTransformer,
    codec::{
        Accessor, EnumMapping, FieldCodec, ListMapping, MapMapping, NestedMapping, OptionMapping,
        ScalarMapping, TransformMapping,
    },
};
use crate::{
    catalog::Resolution,
    error::SignatureError,
    validation::Constraint,
    value::{ScalarField, ScalarKind},
};

/// 领域类型在 [`Marshalable::describe`] 中使用的字段声明器。
///
/// # 教案式说明
/// - **意图 (Why)**：每个声明方法对应一种字段形态，映射方式在此刻选定并固化进 [`FieldDescriptor`]；
/// - **契约 (What)**：
///   - 每个方法返回 [`FieldOptions`]，可继续追加列名覆盖、位置、必填、敏感等标记；
///   - 嵌套类型与全局转换器的解析失败不会 panic，而是记录首个错误，由目录在 `describe` 结束后统一返回；
/// - **执行 (How)**：字段访问以一对函数指针表达（`|o| &o.x`、`|o| &mut o.x`），不捕获环境。
pub struct SchemaBuilder<'r, 'c, T> {
    resolution: &'r mut Resolution<'c>,
    fields: Vec<FieldDescriptor>,
    constraints: Vec<Constraint>,
    error: Option<SignatureError>,
    _owner: PhantomData<fn() -> T>,
}

impl<'r, 'c, T: Marshalable> SchemaBuilder<'r, 'c, T> {
    pub(crate) fn new(resolution: &'r mut Resolution<'c>) -> Self {
        Self {
            resolution,
            fields: Vec::new(),
            constraints: Vec::new(),
            error: None,
            _owner: PhantomData,
        }
    }

    /// 标量字段。
    pub fn field<S: ScalarField>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &S,
        get_mut: fn(&mut T) -> &mut S,
    ) -> FieldOptions<'_> {
        self.push(
            name,
            FieldKind::Scalar(S::KIND),
            None,
            accessor(name, get, get_mut, ScalarMapping),
        )
    }

    /// 可空标量字段，`None` 编码为 SQL NULL。
    pub fn optional<S: ScalarField>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &Option<S>,
        get_mut: fn(&mut T) -> &mut Option<S>,
    ) -> FieldOptions<'_> {
        self.push(
            name,
            FieldKind::Scalar(S::KIND),
            None,
            accessor(name, get, get_mut, OptionMapping(ScalarMapping)),
        )
    }

    /// 按名称序列化的枚举字段。
    pub fn enumeration<E: DatabaseEnum>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &E,
        get_mut: fn(&mut T) -> &mut E,
    ) -> FieldOptions<'_> {
        self.push(
            name,
            FieldKind::Enum {
                type_name: E::TYPE_NAME,
            },
            None,
            accessor(name, get, get_mut, EnumMapping),
        )
    }

    pub fn optional_enumeration<E: DatabaseEnum>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &Option<E>,
        get_mut: fn(&mut T) -> &mut Option<E>,
    ) -> FieldOptions<'_> {
        self.push(
            name,
            FieldKind::Enum {
                type_name: E::TYPE_NAME,
            },
            None,
            accessor(name, get, get_mut, OptionMapping(EnumMapping)),
        )
    }

    /// 嵌套对象字段，调用签名中展开为内层字段。
    pub fn nested<N: Marshalable>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &N,
        get_mut: fn(&mut T) -> &mut N,
    ) -> FieldOptions<'_> {
        match self.resolve_nested::<N>(name) {
            Some(schema) => {
                let mapping = nested_mapping::<N>(&schema);
                self.push(
                    name,
                    FieldKind::Nested(schema),
                    None,
                    accessor(name, get, get_mut, mapping),
                )
            }
            None => FieldOptions::detached(),
        }
    }

    /// 可空嵌套对象；展开后的参数全部为 NULL 时读回 `None`。
    pub fn optional_nested<N: Marshalable>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &Option<N>,
        get_mut: fn(&mut T) -> &mut Option<N>,
    ) -> FieldOptions<'_> {
        match self.resolve_nested::<N>(name) {
            Some(schema) => {
                let mapping = OptionMapping(nested_mapping::<N>(&schema));
                self.push(
                    name,
                    FieldKind::Nested(schema),
                    None,
                    accessor(name, get, get_mut, mapping),
                )
            }
            None => FieldOptions::detached(),
        }
    }

    /// 标量列表。
    pub fn list<S: ScalarField>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &Vec<S>,
        get_mut: fn(&mut T) -> &mut Vec<S>,
    ) -> FieldOptions<'_> {
        self.push(
            name,
            FieldKind::List(Box::new(FieldKind::Scalar(S::KIND))),
            None,
            accessor(name, get, get_mut, ListMapping(ScalarMapping)),
        )
    }

    /// 对象列表，整体作为一个复合数组参数。
    pub fn object_list<N: Marshalable>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &Vec<N>,
        get_mut: fn(&mut T) -> &mut Vec<N>,
    ) -> FieldOptions<'_> {
        match self.resolve_nested::<N>(name) {
            Some(schema) => {
                let mapping = ListMapping(nested_mapping::<N>(&schema));
                self.push(
                    name,
                    FieldKind::List(Box::new(FieldKind::Nested(schema))),
                    None,
                    accessor(name, get, get_mut, mapping),
                )
            }
            None => FieldOptions::detached(),
        }
    }

    /// 键值映射。
    pub fn map<K, V>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &BTreeMap<K, V>,
        get_mut: fn(&mut T) -> &mut BTreeMap<K, V>,
    ) -> FieldOptions<'_>
    where
        K: ScalarField + Ord,
        V: ScalarField,
    {
        self.push(
            name,
            FieldKind::Map {
                key: K::KIND,
                value: V::KIND,
            },
            None,
            accessor(name, get, get_mut, MapMapping),
        )
    }

    /// 使用字段级转换器的字段。
    pub fn transformed<F>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
        transformer: impl ValueTransformer<F>,
    ) -> FieldOptions<'_>
    where
        F: Default + Send + Sync + 'static,
    {
        self.push_transformed(name, get, get_mut, Arc::new(transformer))
    }

    /// 使用目录中按 Rust 类型注册的全局转换器；未注册时签名构建失败。
    pub fn custom<F>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> FieldOptions<'_>
    where
        F: Default + Send + Sync + 'static,
    {
        match self.resolution.transformer::<F>() {
            Some(transformer) => self.push_transformed(name, get, get_mut, transformer),
            None => {
                self.record(SignatureError::unmappable(
                    T::type_name(),
                    name,
                    format!(
                        "no mapping or registered transformer for `{}`",
                        std::any::type_name::<F>()
                    ),
                ));
                FieldOptions::detached()
            }
        }
    }

    /// 声明对象级约束。`path` 为违规报告中使用的字段路径。
    pub fn constraint(
        &mut self,
        path: &'static str,
        message: impl Into<Cow<'static, str>>,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.constraints.push(Constraint::new::<T>(path, message, check));
        self
    }

    /// 结束声明：应用位置排序并检查重复。
    pub(crate) fn finish(self) -> Result<TypeSchema, SignatureError> {
        let type_name = T::type_name();
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.fields.is_empty() {
            return Err(SignatureError::unmappable(
                type_name,
                "*",
                "type declares no marshalable fields",
            ));
        }

        let (mut positioned, unpositioned): (Vec<_>, Vec<_>) = self
            .fields
            .into_iter()
            .partition(|field| field.position.is_some());
        positioned.sort_by_key(|field| field.position);
        for pair in positioned.windows(2) {
            if pair[0].position == pair[1].position {
                return Err(SignatureError::DuplicatePosition {
                    type_name,
                    position: pair[0].position.unwrap_or_default(),
                });
            }
        }

        let mut fields = positioned;
        fields.extend(unpositioned);
        for (index, field) in fields.iter_mut().enumerate() {
            field.index = index;
        }
        for (index, field) in fields.iter().enumerate() {
            let column = field.column_name();
            if fields[..index]
                .iter()
                .any(|earlier| earlier.column_name() == column)
            {
                return Err(SignatureError::DuplicateColumn {
                    type_name,
                    column: column.to_owned(),
                });
            }
        }

        Ok(TypeSchema {
            type_id: std::any::TypeId::of::<T>(),
            type_name,
            fields,
            constraints: self.constraints,
        })
    }

    fn resolve_nested<N: Marshalable>(&mut self, field: &'static str) -> Option<Arc<TypeSchema>> {
        match self.resolution.schema::<N>(T::type_name(), field) {
            Ok(schema) => Some(schema),
            Err(error) => {
                self.record(error);
                None
            }
        }
    }

    fn push_transformed<F>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
        transformer: Arc<dyn ValueTransformer<F>>,
    ) -> FieldOptions<'_>
    where
        F: Default + Send + Sync + 'static,
    {
        let kind = FieldKind::Scalar(transformer.storage_kind());
        let transformer_name = transformer.name();
        self.push(
            name,
            kind,
            Some(transformer_name),
            accessor(name, get, get_mut, TransformMapping(transformer)),
        )
    }

    fn push(
        &mut self,
        name: &'static str,
        kind: FieldKind,
        transformer: Option<&'static str>,
        codec: Arc<dyn FieldCodec>,
    ) -> FieldOptions<'_> {
        self.fields.push(FieldDescriptor {
            name,
            column: None,
            index: 0,
            position: None,
            kind,
            transformer,
            required: false,
            sensitive: false,
            codec,
        });
        FieldOptions {
            field: self.fields.last_mut(),
        }
    }

    fn record(&mut self, error: SignatureError) {
        self.error.get_or_insert(error);
    }
}

fn accessor<T, F, M>(
    field: &'static str,
    get: fn(&T) -> &F,
    get_mut: fn(&mut T) -> &mut F,
    mapping: M,
) -> Arc<dyn FieldCodec>
where
    T: Send + Sync + 'static,
    F: Default + Send + Sync + 'static,
    M: super::codec::Mapping<F>,
{
    Arc::new(Accessor {
        field,
        get,
        get_mut,
        mapping,
    })
}

fn nested_mapping<N: Marshalable>(schema: &Arc<TypeSchema>) -> NestedMapping<N> {
    NestedMapping {
        schema: Arc::clone(schema),
        _marker: PhantomData,
    }
}

/// 字段声明后的附加标记。
///
/// 对构建失败的字段返回的是“脱离”的选项，所有标记静默忽略，错误仍会在 `describe` 结束后报告。
pub struct FieldOptions<'b> {
    field: Option<&'b mut FieldDescriptor>,
}

impl<'b> FieldOptions<'b> {
    fn detached() -> Self {
        Self { field: None }
    }

    fn update(mut self, apply: impl FnOnce(&mut FieldDescriptor)) -> Self {
        if let Some(field) = self.field.as_deref_mut() {
            apply(field);
        }
        self
    }

    /// 覆盖结果列名。
    pub fn column(self, column: &'static str) -> Self {
        self.update(|field| field.column = Some(column))
    }

    /// 显式参数位置（从 0 开始）。
    pub fn position(self, position: usize) -> Self {
        self.update(|field| field.position = Some(position))
    }

    /// 结果中缺失或为 NULL 时报错，而不是落为默认值。
    pub fn required(self) -> Self {
        self.update(|field| field.required = true)
    }

    /// 敏感字段：从不写入任何日志记录。
    pub fn sensitive(self) -> Self {
        self.update(|field| field.sensitive = true)
    }

    /// 日期时间字段只保留日期部分。
    pub fn date_only(self) -> Self {
        self.update(|field| {
            if let FieldKind::Scalar(ScalarKind::Timestamp) = field.kind {
                field.kind = FieldKind::Scalar(ScalarKind::Date);
            }
        })
    }
}
