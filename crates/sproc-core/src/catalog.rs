//! # FieldCatalog：调用签名目录
//!
//! ## 核心意图（Why）
//! - 进程内唯一的可变共享状态：按需构建 `(领域类型, 存储过程)` 的 [`CallSignature`] 并永久缓存；
//! - 以显式对象注入调用点，而非环境全局变量，测试可各自持有独立目录。
//!
//! ## 行为契约（What）
//! - `resolve`：同一键只构建一次，并发的首次调用者要么等待唯一一次构建，要么直接共享缓存结果；
//!   构建失败同样被缓存，后续调用得到同一错误；
//! - `schema`：不绑定过程的类型模式，嵌套类型之间共享；
//! - `register_transformer`：按 Rust 类型注册全局转换器，须在首次解析使用该类型的签名之前完成。
//!
//! ## 风险提示（Trade-offs）
//! - 条目永不淘汰，键空间由代码中出现的类型与过程数量决定，是有界的；
//! - 类型模式采用“构建后插入，已存在则复用”，并发首次构建同一类型可能各自构建一次，但只有一份进入缓存；
//!   签名则严格每键一次（`OnceLock`）。

use std::{
    any::{Any, TypeId},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use tracing::trace;

use crate::{
    error::SignatureError,
    schema::{Marshalable, SchemaBuilder, TypeSchema, ValueTransformer},
    signature::{CallSignature, ProcedureContext, SignatureRole},
};

type SignatureCell = Arc<OnceLock<Result<Arc<CallSignature>, SignatureError>>>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SignatureKey {
    type_id: TypeId,
    procedure: String,
    role: SignatureRole,
}

/// 字段目录。
///
/// # 教案式注释
/// - **意图 (Why)**：把签名构建的全部成本集中在首次调用；之后的每次调用只做一次哈希查找；
/// - **契约 (What)**：`FieldCatalog` 是 `Send + Sync` 的，通常包在 `Arc` 中由多个调用点共享；
/// - **执行 (How)**：`DashMap` 为每个键分配一个 `Arc<OnceLock<..>>` 单元，取出单元后立即释放分片锁，
///   构建在 `OnceLock::get_or_init` 中进行，不在任何 map 锁内执行用户代码。
#[derive(Default)]
pub struct FieldCatalog {
    types: DashMap<TypeId, Arc<TypeSchema>>,
    signatures: DashMap<SignatureKey, SignatureCell>,
    transformers: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    builds: AtomicUsize,
}

impl FieldCatalog {
    /// 创建空目录。
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析 `(T, procedure)` 的调用签名。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：
    ///   - 任何字段无法映射时返回 [`SignatureError::UnmappableType`]，这发生在首次解析时而非调用时；
    ///   - 过程声明了参数顺序时按声明重排槽位，名称对不上即失败；
    ///   - **后置条件**：同一键的所有调用返回指向同一签名的 `Arc`。
    pub fn resolve<T: Marshalable>(
        &self,
        context: &ProcedureContext,
    ) -> Result<Arc<CallSignature>, SignatureError> {
        let key = SignatureKey {
            type_id: TypeId::of::<T>(),
            procedure: context.procedure().to_owned(),
            role: context.role(),
        };
        let cell = self.signatures.entry(key).or_default().value().clone();

        cell.get_or_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            let schema = self.schema::<T>()?;
            let signature = CallSignature::build(schema, context)?;
            trace!(
                procedure = context.procedure(),
                type_name = T::type_name(),
                slots = signature.len(),
                "call signature built"
            );
            Ok(Arc::new(signature))
        })
        .clone()
    }

    /// 不绑定过程的类型模式。
    pub fn schema<T: Marshalable>(&self) -> Result<Arc<TypeSchema>, SignatureError> {
        Resolution::new(self).schema::<T>(T::type_name(), "*")
    }

    /// 注册 `F` 类型的全局转换器。
    ///
    /// 重复注册会替换旧值，但已缓存的签名继续使用构建时选定的转换器。
    pub fn register_transformer<F, X>(&self, transformer: X)
    where
        F: 'static,
        X: ValueTransformer<F>,
    {
        let erased: Arc<dyn ValueTransformer<F>> = Arc::new(transformer);
        self.transformers.insert(TypeId::of::<F>(), Box::new(erased));
    }

    /// 已执行的签名构建次数（含失败）。
    pub fn signature_builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// 已缓存的签名数量。
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl std::fmt::Debug for FieldCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCatalog")
            .field("types", &self.types.len())
            .field("signatures", &self.signatures.len())
            .field("transformers", &self.transformers.len())
            .field("builds", &self.signature_builds())
            .finish()
    }
}

/// 一次模式解析过程中的上下文，追踪正在构建的类型以发现递归嵌套。
pub struct Resolution<'c> {
    catalog: &'c FieldCatalog,
    in_progress: Vec<TypeId>,
}

impl<'c> Resolution<'c> {
    fn new(catalog: &'c FieldCatalog) -> Self {
        Self {
            catalog,
            in_progress: Vec::new(),
        }
    }

    /// 取得（必要时构建）`N` 的模式；`owner`/`field` 仅用于递归嵌套时的错误信息。
    pub(crate) fn schema<N: Marshalable>(
        &mut self,
        owner: &'static str,
        field: &'static str,
    ) -> Result<Arc<TypeSchema>, SignatureError> {
        let type_id = TypeId::of::<N>();
        if let Some(schema) = self.catalog.types.get(&type_id) {
            return Ok(Arc::clone(schema.value()));
        }
        if self.in_progress.contains(&type_id) {
            return Err(SignatureError::unmappable(
                owner,
                field,
                format!("`{}` nests itself and cannot be flattened", N::type_name()),
            ));
        }

        self.in_progress.push(type_id);
        let built = {
            let mut builder = SchemaBuilder::<N>::new(self);
            N::describe(&mut builder);
            builder.finish()
        };
        self.in_progress.pop();

        let schema = Arc::new(built?);
        Ok(Arc::clone(
            self.catalog.types.entry(type_id).or_insert(schema).value(),
        ))
    }

    pub(crate) fn transformer<F: 'static>(&self) -> Option<Arc<dyn ValueTransformer<F>>> {
        self.catalog
            .transformers
            .get(&TypeId::of::<F>())
            .and_then(|entry| {
                entry
                    .value()
                    .downcast_ref::<Arc<dyn ValueTransformer<F>>>()
                    .cloned()
            })
    }
}
