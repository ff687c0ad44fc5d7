//! # invoker 模块说明
//!
//! ## 角色定位（Why）
//! - 对外只暴露“按过程名调用”的入口，把签名查找、校验、封送、分片、执行与结果还原串成固定流水线；
//! - 调用方不接触连接、分片下标或超时，换分片拓扑或调超时都不需要改调用点。
//!
//! ## 流水线（How）
//! 1. 注册表查绑定（未知过程立即失败）；
//! 2. 目录解析入参签名，按声明做输入校验，任何违规都在访问数据库之前返回；
//! 3. 封送；空对象按声明跳过或以全 NULL 调用；
//! 4. 选取分片键参数 → 策略算原始键（类型不符即失败）→ 解析器取模选分片；
//! 5. 按分片范围执行（单分片 / 全部分片 / 逐个搜索），记录来源日志；
//! 6. 还原返回值并做输出校验。

use std::{fmt, sync::Arc};

use sproc_core::{
    CallArgs, CallResult, DataSource, FieldCatalog, Marshalable, Marshaled, ProcedureBinding,
    ShardScope, ShardSource, SprocError, ValidationGate, Value, compute_shard_id, marshal,
};
use tracing::debug;

use crate::{
    executor::CallExecutor, output::CallOutput, provenance::render_arguments,
    registry::ProcedureRegistry, resolver::ShardResolver,
};

/// 存储过程调用入口。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 同一 `(类型, 过程)` 的签名只构建一次，由共享的 [`FieldCatalog`] 缓存；
///   - 所有错误以 [`SprocError`] 同步返回，本层不重试；
///   - `Send + Sync`，可包在 `Arc` 中供多线程并发调用。
/// - **风险 (Trade-offs)**：`ShardScope::All`/`Search` 依次访问各分片，耗时随分片数线性增长。
pub struct SprocInvoker {
    catalog: Arc<FieldCatalog>,
    registry: Arc<ProcedureRegistry>,
    resolver: ShardResolver,
    executor: CallExecutor,
    gate: ValidationGate,
}

impl SprocInvoker {
    /// 以注册表自带的超时表构造执行器。
    pub fn new(registry: Arc<ProcedureRegistry>, resolver: ShardResolver) -> Self {
        let executor = CallExecutor::new(Arc::clone(registry.timeouts()));
        Self {
            catalog: Arc::new(FieldCatalog::new()),
            registry,
            resolver,
            executor,
            gate: ValidationGate::new(),
        }
    }

    /// 共享已有的签名目录（多个调用入口共用同一份缓存）。
    pub fn with_catalog(mut self, catalog: Arc<FieldCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_gate(mut self, gate: ValidationGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn catalog(&self) -> &Arc<FieldCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<ProcedureRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &ShardResolver {
        &self.resolver
    }

    /// 以领域对象作为参数调用过程。
    ///
    /// `input` 为 `None` 时按过程声明的空对象行为处理。
    pub fn call<I, R>(&self, procedure: &str, input: Option<&I>) -> Result<R, SprocError>
    where
        I: Marshalable,
        R: CallOutput,
    {
        let binding = self.registry.binding(procedure)?;
        let Some(args) = self.prepare(&binding, input)? else {
            return Ok(R::empty());
        };
        let raw = shard_key(&binding, &binding.shard_key_arguments(&args.values()))?;
        self.dispatch(&binding, &args, raw)
    }

    /// 以对象自身提供的分片键输入调用过程，而不是从参数表中选取。
    pub fn call_sharded<I, R>(&self, procedure: &str, input: &I) -> Result<R, SprocError>
    where
        I: Marshalable + ShardSource,
        R: CallOutput,
    {
        let binding = self.registry.binding(procedure)?;
        let Some(args) = self.prepare(&binding, Some(input))? else {
            return Ok(R::empty());
        };
        let raw = shard_key(&binding, &[input.shard_key_input()])?;
        self.dispatch(&binding, &args, raw)
    }

    /// 以预先构造的参数表调用过程，跳过签名与输入校验。
    pub fn call_args<R: CallOutput>(&self, procedure: &str, args: CallArgs) -> Result<R, SprocError> {
        let binding = self.registry.binding(procedure)?;
        let raw = shard_key(&binding, &binding.shard_key_arguments(&args.values()))?;
        self.dispatch(&binding, &args, raw)
    }

    /// 签名 → 输入校验 → 封送；返回 `None` 表示调用被跳过。
    fn prepare<I: Marshalable>(
        &self,
        binding: &ProcedureBinding,
        input: Option<&I>,
    ) -> Result<Option<CallArgs>, SprocError> {
        let signature = self.catalog.resolve::<I>(&binding.input_context())?;
        if binding.validation().input
            && let Some(object) = input
        {
            self.gate
                .check_input(binding.name(), signature.schema(), object)?;
        }
        match marshal(input, &signature, binding.null_call())? {
            Marshaled::Call(args) => Ok(Some(args)),
            Marshaled::Skip => {
                debug!(procedure = binding.name(), "null input, call skipped");
                Ok(None)
            }
        }
    }

    fn dispatch<R: CallOutput>(
        &self,
        binding: &ProcedureBinding,
        args: &CallArgs,
        raw: u64,
    ) -> Result<R, SprocError> {
        let result = match binding.scope() {
            ShardScope::Single => {
                let (shard, source) = self.resolver.resolve(raw)?;
                self.execute_on(binding, args, shard, source)?
            }
            ShardScope::All => {
                let mut merged: Option<CallResult> = None;
                for (shard, source) in self.shards()? {
                    let result = self.execute_on(binding, args, shard, source)?;
                    merged = Some(match merged {
                        Some(current) => current.merge(result),
                        None => result,
                    });
                }
                merged.unwrap_or(CallResult::Void)
            }
            ShardScope::Search => {
                let mut found = CallResult::Void;
                for (shard, source) in self.shards()? {
                    found = self.execute_on(binding, args, shard, source)?;
                    if !found.is_empty() {
                        break;
                    }
                }
                found
            }
        };

        let output = R::from_result(result, &self.catalog, binding)?;
        output.validate(&self.gate, &self.catalog, binding)?;
        Ok(output)
    }

    fn shards(
        &self,
    ) -> Result<impl Iterator<Item = (usize, &Arc<dyn DataSource>)> + '_, SprocError> {
        if self.resolver.is_empty() {
            return Err(SprocError::NoShardsConfigured);
        }
        Ok(self.resolver.shards().iter().enumerate())
    }

    fn execute_on(
        &self,
        binding: &ProcedureBinding,
        args: &CallArgs,
        shard: usize,
        source: &Arc<dyn DataSource>,
    ) -> Result<CallResult, SprocError> {
        debug!(
            procedure = binding.name(),
            shard,
            source = source.name(),
            timeout_ms = self.executor.timeouts().timeout_for(binding.name()).as_millis() as u64,
            arguments = %render_arguments(args, binding),
            "calling procedure"
        );
        self.executor.execute_on(binding, args, source.as_ref())
    }
}

/// 按过程绑定的策略计算原始分片键。
fn shard_key(binding: &ProcedureBinding, arguments: &[Value]) -> Result<u64, SprocError> {
    compute_shard_id(binding.strategy().as_ref(), arguments).map_err(|source| {
        SprocError::ShardKey {
            procedure: binding.name().to_owned(),
            source,
        }
    })
}

impl fmt::Debug for SprocInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SprocInvoker")
            .field("catalog", &self.catalog)
            .field("registry", &self.registry)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
