//! # schema 模块说明
//!
//! ## 角色定位（Why）
//! - 以声明式 Builder 取代运行时反射：领域类型通过 [`Marshalable::describe`] 显式列出参与封送的字段、
//!   顺序标记、列名覆盖与约束；
//! - 生成的 [`TypeSchema`] 由 [`crate::catalog::FieldCatalog`] 缓存，整个进程生命周期内只读。
//!
//! ## 设计要求（What）
//! - 字段顺序是“声明出来的”：带 `position` 标记的字段按位置排序，其余字段按 Builder 调用顺序追加；
//! - 每个字段在构建期确定其映射方式（内建标量、枚举、嵌套对象、列表、映射或转换器），调用期不再分派；
//! - 找不到映射的字段在构建期即报 [`SignatureError::UnmappableType`](crate::error::SignatureError::UnmappableType)。

mod builder;
mod codec;

use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

pub use builder::{FieldOptions, SchemaBuilder};
pub(crate) use codec::FieldCodec;

use crate::{
    error::MarshalError,
    validation::Constraint,
    value::{ScalarKind, Value},
};

/// 可被封送为存储过程参数的领域类型。
///
/// # 教案式说明
/// - **意图 (Why)**：把“哪些字段、以何顺序、映射成什么”集中写在一处，编译期即可审阅；
/// - **契约 (What)**：`describe` 必须是纯函数，每次调用声明相同的字段集合；目录只会调用一次并缓存结果；
/// - **风险 (Trade-offs)**：`Default` 约束用于反向构造（缺失列保持默认值），没有合理默认值的类型需包一层。
///
/// ```
/// use sproc_core::schema::{Marshalable, SchemaBuilder};
///
/// #[derive(Default)]
/// struct Login {
///     user: String,
///     password: String,
/// }
///
/// impl Marshalable for Login {
///     fn describe(schema: &mut SchemaBuilder<'_, '_, Self>) {
///         schema.field("user", |o| &o.user, |o| &mut o.user);
///         schema.field("password", |o| &o.password, |o| &mut o.password).sensitive();
///     }
/// }
/// ```
pub trait Marshalable: Default + Send + Sync + 'static {
    /// 诊断用类型名。
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// 声明字段。
    fn describe(schema: &mut SchemaBuilder<'_, '_, Self>);
}

/// 按名称序列化的数据库枚举。
pub trait DatabaseEnum: Copy + Default + Send + Sync + 'static {
    /// 数据库中的枚举类型名。
    const TYPE_NAME: &'static str;

    fn name(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;
}

/// 字段级（或按 Rust 类型全局注册的）值转换器。
///
/// # 教案式说明
/// - **意图 (Why)**：覆盖默认映射，例如把业务类型存为文本；
/// - **契约 (What)**：`to_storage` 的结果必须与 `storage_kind` 一致；`from_storage` 不会收到 `Null`，
///   空值直接落为字段的 `Default`；失败以字符串描述，由封送器包装为
///   [`MarshalError::Transform`]；
/// - **执行 (How)**：使用哪个转换器在签名构建时确定，调用期不再查找。
pub trait ValueTransformer<F>: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn storage_kind(&self) -> ScalarKind;

    fn to_storage(&self, value: &F) -> Result<Value, String>;

    fn from_storage(&self, value: Value) -> Result<F, String>;
}

/// 字段的语义种类。
#[derive(Clone)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Enum { type_name: &'static str },
    /// 非集合嵌套对象；在调用签名中被展开到父级。
    Nested(Arc<TypeSchema>),
    /// 列表；元素为 `Nested` 时作为一个复合参数整体传递。
    List(Box<FieldKind>),
    /// 键值映射，编码为 `(key, value)` 复合行组成的数组。
    Map { key: ScalarKind, value: ScalarKind },
}

impl FieldKind {
    /// 是否为需要展开的嵌套对象。
    pub fn is_nested(&self) -> bool {
        matches!(self, FieldKind::Nested(_))
    }

    /// 若为对象列表，返回元素类型的模式。
    pub fn object_element(&self) -> Option<&Arc<TypeSchema>> {
        match self {
            FieldKind::List(inner) => match inner.as_ref() {
                FieldKind::Nested(schema) => Some(schema),
                _ => None,
            },
            _ => None,
        }
    }

    /// 按声明种类修正编码结果：仅日期字段丢弃时间部分。
    pub(crate) fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (FieldKind::Scalar(ScalarKind::Date), Value::Timestamp(timestamp)) => {
                Value::Date(timestamp.date())
            }
            (_, value) => value,
        }
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar(kind) => write!(f, "{}", kind.name()),
            FieldKind::Enum { type_name } => write!(f, "enum {type_name}"),
            FieldKind::Nested(schema) => write!(f, "nested {}", schema.type_name()),
            FieldKind::List(inner) => write!(f, "list<{inner:?}>"),
            FieldKind::Map { key, value } => write!(f, "map<{}, {}>", key.name(), value.name()),
        }
    }
}

/// 单个字段的描述。
#[derive(Clone)]
pub struct FieldDescriptor {
    pub(crate) name: &'static str,
    pub(crate) column: Option<&'static str>,
    pub(crate) index: usize,
    pub(crate) position: Option<usize>,
    pub(crate) kind: FieldKind,
    pub(crate) transformer: Option<&'static str>,
    pub(crate) required: bool,
    pub(crate) sensitive: bool,
    pub(crate) codec: Arc<dyn FieldCodec>,
}

impl FieldDescriptor {
    /// Rust 字段名。
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 结果列名：显式覆盖优先，否则为字段名。
    pub fn column_name(&self) -> &'static str {
        self.column.unwrap_or(self.name)
    }

    /// 在最终排序后的字段序列中的下标。
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// 生效的转换器名称（若有）。
    pub fn transformer(&self) -> Option<&'static str> {
        self.transformer
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub(crate) fn encode(&self, owner: &dyn Any) -> Result<Value, MarshalError> {
        Ok(self.kind.coerce(self.codec.encode(owner)?))
    }

    pub(crate) fn decode(&self, owner: &mut dyn Any, value: Value) -> Result<(), MarshalError> {
        self.codec.decode(owner, value)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("transformer", &self.transformer)
            .field("required", &self.required)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

/// 一个领域类型的完整字段模式，构建后只读。
pub struct TypeSchema {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) constraints: Vec<Constraint>,
}

impl TypeSchema {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 按声明顺序排列的字段。
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// 本类型或其嵌套类型是否声明了约束。
    pub fn has_constraints(&self) -> bool {
        !self.constraints.is_empty()
            || self.fields.iter().any(|field| match &field.kind {
                FieldKind::Nested(schema) => schema.has_constraints(),
                kind => kind
                    .object_element()
                    .is_some_and(|schema| schema.has_constraints()),
            })
    }
}

impl fmt::Debug for TypeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeSchema")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .field("constraints", &self.constraints.len())
            .finish()
    }
}
