//! 调用签名：`(领域类型, 存储过程)` 对应的有序参数槽位。

use std::{any::TypeId, sync::Arc};

use crate::{
    error::SignatureError,
    schema::{FieldKind, TypeSchema},
};

/// 签名用于绑定参数还是解读结果。
///
/// 同一类型既作入参又作出参时，两份签名分别缓存：入参签名受过程声明的参数顺序约束，出参签名不受。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureRole {
    Input,
    Output,
}

/// 构建签名所需的过程上下文。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcedureContext {
    procedure: String,
    parameters: Option<Vec<String>>,
    role: SignatureRole,
}

impl ProcedureContext {
    /// 入参上下文，槽位保持类型声明顺序。
    pub fn input(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            parameters: None,
            role: SignatureRole::Input,
        }
    }

    /// 出参上下文。
    pub fn output(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            parameters: None,
            role: SignatureRole::Output,
        }
    }

    /// 附加过程声明的参数顺序（按槽位名或唯一列名匹配），仅对入参生效。
    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = Some(parameters.into_iter().map(Into::into).collect());
        self
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn parameters(&self) -> Option<&[String]> {
        self.parameters.as_deref()
    }

    pub fn role(&self) -> SignatureRole {
        self.role
    }
}

/// 签名中的单个参数槽位（嵌套对象已展开）。
#[derive(Clone, Debug)]
pub struct ParameterSlot {
    name: String,
    column: String,
    kind: FieldKind,
    path: Vec<usize>,
    required: bool,
    sensitive: bool,
}

impl ParameterSlot {
    /// 点分路径名，如 `inner.a`。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 结果行中的列名。
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// 从根类型出发逐级的字段下标。
    pub fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// 自身或任一祖先字段被标记为敏感。
    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }
}

/// 有序参数签名，构建后不可变且可跨线程共享。
///
/// # 教案式说明
/// - **契约 (What)**：槽位顺序 = 类型声明顺序（嵌套对象原地展开），若过程声明了参数顺序则按其重排；
///   对象列表保留为单个复合参数；
/// - **风险 (Trade-offs)**：展开后同名列可能出现在不同嵌套层级，按列名读取结果时以第一个匹配为准。
#[derive(Debug)]
pub struct CallSignature {
    procedure: String,
    schema: Arc<TypeSchema>,
    slots: Vec<ParameterSlot>,
}

impl CallSignature {
    pub(crate) fn build(
        schema: Arc<TypeSchema>,
        context: &ProcedureContext,
    ) -> Result<Self, SignatureError> {
        let mut slots = Vec::new();
        flatten(&schema, "", &mut Vec::new(), false, &mut slots);

        if let (SignatureRole::Input, Some(declared)) = (context.role, context.parameters()) {
            slots = reorder(slots, declared, context.procedure(), schema.type_name())?;
        }

        Ok(Self {
            procedure: context.procedure().to_owned(),
            schema,
            slots,
        })
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn type_id(&self) -> TypeId {
        self.schema.type_id()
    }

    pub fn type_name(&self) -> &'static str {
        self.schema.type_name()
    }

    pub fn schema(&self) -> &Arc<TypeSchema> {
        &self.schema
    }

    pub fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&ParameterSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub(crate) fn slot_index(&self, path: &[usize]) -> Option<usize> {
        self.slots.iter().position(|slot| slot.path == path)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn flatten(
    schema: &TypeSchema,
    prefix: &str,
    path: &mut Vec<usize>,
    sensitive: bool,
    out: &mut Vec<ParameterSlot>,
) {
    for field in schema.fields() {
        path.push(field.index());
        let name = if prefix.is_empty() {
            field.name().to_owned()
        } else {
            format!("{prefix}.{}", field.name())
        };
        let sensitive = sensitive || field.is_sensitive();
        match field.kind() {
            FieldKind::Nested(inner) => flatten(inner, &name, path, sensitive, out),
            kind => out.push(ParameterSlot {
                name,
                column: field.column_name().to_owned(),
                kind: kind.clone(),
                path: path.clone(),
                required: field.is_required(),
                sensitive,
            }),
        }
        path.pop();
    }
}

fn reorder(
    slots: Vec<ParameterSlot>,
    declared: &[String],
    procedure: &str,
    type_name: &'static str,
) -> Result<Vec<ParameterSlot>, SignatureError> {
    let mut remaining: Vec<Option<ParameterSlot>> = slots.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    for parameter in declared {
        let by_name = remaining
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|slot| &slot.name == parameter));
        let index = by_name.or_else(|| {
            let mut by_column = remaining.iter().enumerate().filter(|(_, slot)| {
                slot.as_ref()
                    .is_some_and(|slot| &slot.column == parameter)
            });
            match (by_column.next(), by_column.next()) {
                (Some((index, _)), None) => Some(index),
                _ => None,
            }
        });
        match index.and_then(|index| remaining[index].take()) {
            Some(slot) => ordered.push(slot),
            None => {
                return Err(SignatureError::UnknownParameter {
                    procedure: procedure.to_owned(),
                    type_name,
                    parameter: parameter.clone(),
                });
            }
        }
    }

    if let Some(slot) = remaining.into_iter().flatten().next() {
        return Err(SignatureError::UndeclaredParameter {
            procedure: procedure.to_owned(),
            type_name,
            slot: slot.name,
        });
    }
    Ok(ordered)
}
