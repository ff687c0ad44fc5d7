//! # validation 模块说明
//!
//! ## 角色定位（Why）
//! - 在封送之前拦截非法输入，在结果解封送之后（按需）复核输出；
//! - 约束随类型模式一起声明（[`crate::schema::SchemaBuilder::constraint`]），外部校验器通过
//!   [`ConstraintProvider`] 接入。
//!
//! ## 设计要求（What）
//! - 一次评估收集全部违规项，不在第一条违规处短路；
//! - 嵌套对象与对象列表的约束级联评估，路径形如 `inner.a`、`items[1].sku`；
//! - 输入校验失败时调用不会执行。

use std::{any::Any, borrow::Cow, fmt, sync::Arc};

use crate::{
    error::{SprocError, ValidationPhase},
    schema::{FieldKind, Marshalable, TypeSchema},
};

/// 单条违规。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

type Check = Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>;

/// 声明在类型模式上的一条约束。
#[derive(Clone)]
pub struct Constraint {
    path: &'static str,
    message: Cow<'static, str>,
    check: Check,
}

impl Constraint {
    pub(crate) fn new<T: 'static>(
        path: &'static str,
        message: impl Into<Cow<'static, str>>,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            path,
            message: message.into(),
            check: Arc::new(move |object: &dyn Any| {
                object.downcast_ref::<T>().is_none_or(|object| check(object))
            }),
        }
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn holds(&self, object: &dyn Any) -> bool {
        (self.check)(object)
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("path", &self.path)
            .field("message", &self.message)
            .finish()
    }
}

/// 外部校验器：对任意对象返回零或多条违规。
pub trait ConstraintProvider: Send + Sync {
    fn validate(&self, schema: &TypeSchema, object: &dyn Any) -> Vec<Violation>;
}

/// 校验闸门。
///
/// # 教案式注释
/// - **意图 (Why)**：输入与输出是两次独立检查，分别由过程声明开启；
/// - **契约 (What)**：`check_*` 返回 `Err(ConstraintViolation)` 时携带全部违规；
/// - **执行 (How)**：先评估模式声明的约束（含级联），再依次追加外部校验器的结果。
#[derive(Clone, Default)]
pub struct ValidationGate {
    providers: Vec<Arc<dyn ConstraintProvider>>,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加外部校验器。
    pub fn with_provider(mut self, provider: Arc<dyn ConstraintProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// 收集对象的全部违规。
    pub fn violations<T: Marshalable>(&self, schema: &TypeSchema, object: &T) -> Vec<Violation> {
        self.violations_erased(schema, object)
    }

    pub(crate) fn violations_erased(&self, schema: &TypeSchema, object: &dyn Any) -> Vec<Violation> {
        let mut violations = Vec::new();
        collect(schema, object, "", &mut violations);
        for provider in &self.providers {
            violations.extend(provider.validate(schema, object));
        }
        violations
    }

    /// 输入校验。
    pub fn check_input<T: Marshalable>(
        &self,
        procedure: &str,
        schema: &TypeSchema,
        object: &T,
    ) -> Result<(), SprocError> {
        self.check(procedure, ValidationPhase::Input, schema, object)
    }

    /// 输出校验。
    pub fn check_output<T: Marshalable>(
        &self,
        procedure: &str,
        schema: &TypeSchema,
        object: &T,
    ) -> Result<(), SprocError> {
        self.check(procedure, ValidationPhase::Output, schema, object)
    }

    fn check(
        &self,
        procedure: &str,
        phase: ValidationPhase,
        schema: &TypeSchema,
        object: &dyn Any,
    ) -> Result<(), SprocError> {
        if !schema.has_constraints() && self.providers.is_empty() {
            return Ok(());
        }
        let violations = self.violations_erased(schema, object);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SprocError::ConstraintViolation {
                procedure: procedure.to_owned(),
                phase,
                violations,
            })
        }
    }
}

impl fmt::Debug for ValidationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationGate")
            .field("providers", &self.providers.len())
            .finish()
    }
}

fn collect(schema: &TypeSchema, object: &dyn Any, prefix: &str, out: &mut Vec<Violation>) {
    for constraint in schema.constraints() {
        if !constraint.holds(object) {
            out.push(Violation::new(
                join(prefix, constraint.path()),
                constraint.message(),
            ));
        }
    }
    for field in schema.fields() {
        match field.kind() {
            FieldKind::Nested(inner) => {
                if let Some(nested) = field.codec.nested(object) {
                    collect(inner, nested, &join(prefix, field.name()), out);
                }
            }
            kind => {
                if let Some(element) = kind.object_element() {
                    for (index, item) in field.codec.elements(object).into_iter().enumerate() {
                        let path = format!("{}[{index}]", join(prefix, field.name()));
                        collect(element, item, &path, out);
                    }
                }
            }
        }
    }
}

fn join(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_owned(),
        (false, true) => prefix.to_owned(),
        (false, false) => format!("{prefix}.{path}"),
    }
}
