//! # executor 模块说明
//!
//! ## 角色定位（Why）
//! - 在一条已借出的连接上执行一次过程调用，并保证调用前后连接的会话状态一致；
//! - 把驱动错误翻译成调用方可分辨的 [`SprocError::CallTimeout`] 与 [`SprocError::CallExecution`]。
//!
//! ## 设计要求（What）
//! - 超时在调用开始时从 [`TimeoutTable`] 读取一次，之后的表更新不影响本次调用；
//! - 语句超时以会话设置下发：调用前记录旧值并设置新值，调用后无论成败都恢复旧值；
//! - 从不重试，从不吞掉驱动错误。

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use sproc_core::{
    BoundCall, CallArgs, CallResult, DataSource, DriverError, ProcedureBinding,
    ProcedureConnection, RawResult, ReturnShape, SprocError, Value,
};
use tracing::{debug, warn};

use crate::timeouts::TimeoutTable;

/// 受超时控制的调用执行器。
#[derive(Clone, Debug)]
pub struct CallExecutor {
    timeouts: Arc<TimeoutTable>,
}

impl CallExecutor {
    pub fn new(timeouts: Arc<TimeoutTable>) -> Self {
        Self { timeouts }
    }

    pub fn timeouts(&self) -> &Arc<TimeoutTable> {
        &self.timeouts
    }

    /// 从数据源借出连接并执行；连接在返回前归还。
    pub fn execute_on(
        &self,
        binding: &ProcedureBinding,
        args: &CallArgs,
        source: &dyn DataSource,
    ) -> Result<CallResult, SprocError> {
        let mut connection = source
            .connection()
            .map_err(|error| execution_error(binding.name(), error))?;
        self.execute(binding, args, &mut *connection)
    }

    /// 在给定连接上执行调用。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：
    ///   - 驱动报告 [`DriverError::StatementTimeout`] 时返回 [`SprocError::CallTimeout`]，携带本次生效的超时；
    ///   - 其余驱动错误包装为 [`SprocError::CallExecution`]；
    ///   - 调用成功但恢复会话超时失败时返回 `CallExecution`：连接状态已不可信；
    ///   - 调用失败且恢复也失败时，记录恢复失败并返回原始错误。
    /// - **后置条件**：正常返回或提前返回时，连接的语句超时都已尝试恢复为调用前的值。
    pub fn execute<C>(
        &self,
        binding: &ProcedureBinding,
        args: &CallArgs,
        connection: &mut C,
    ) -> Result<CallResult, SprocError>
    where
        C: ProcedureConnection + ?Sized,
    {
        let procedure = binding.name();
        let timeout = self.timeouts.timeout_for(procedure);
        let call = BoundCall::new(procedure, args.clone());
        let started = Instant::now();

        let mut guard = StatementTimeoutGuard::apply(connection, timeout)
            .map_err(|source| execution_error(procedure, source))?;
        let outcome = guard.call(&call);
        let restored = guard.restore();

        match (outcome, restored) {
            (Ok(raw), Ok(())) => {
                debug!(
                    procedure,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "procedure call completed"
                );
                Ok(shape(binding.returns(), raw))
            }
            (Ok(_), Err(source)) => Err(execution_error(procedure, source)),
            (Err(error), restored) => {
                if let Err(restore) = restored {
                    warn!(procedure, error = %restore, "statement timeout could not be restored");
                }
                Err(translate(procedure, timeout, error))
            }
        }
    }
}

fn execution_error(procedure: &str, source: DriverError) -> SprocError {
    SprocError::CallExecution {
        procedure: procedure.to_owned(),
        source,
    }
}

fn translate(procedure: &str, timeout: Duration, error: DriverError) -> SprocError {
    match error {
        DriverError::StatementTimeout(_) => {
            warn!(
                procedure,
                timeout_ms = timeout.as_millis() as u64,
                "procedure call timed out"
            );
            SprocError::CallTimeout {
                procedure: procedure.to_owned(),
                timeout,
            }
        }
        other => execution_error(procedure, other),
    }
}

/// 按声明的返回形态解读驱动结果。
fn shape(returns: ReturnShape, raw: RawResult) -> CallResult {
    let rows = match raw {
        RawResult::Void => Vec::new(),
        RawResult::Rows(rows) => rows,
    };
    match returns {
        ReturnShape::Void => CallResult::Void,
        ReturnShape::Scalar => CallResult::Scalar(
            rows.into_iter()
                .next()
                .map_or(Value::Null, |row| row.into_first()),
        ),
        ReturnShape::Row => CallResult::Row(rows.into_iter().next()),
        ReturnShape::Rows => CallResult::Rows(rows),
    }
}

/// 会话语句超时的作用域守卫。
///
/// 正常路径通过 [`Self::restore`] 显式恢复以便拿到错误；若提前析构（panic 展开），
/// `Drop` 兜底恢复并只记录告警。
struct StatementTimeoutGuard<'c, C: ProcedureConnection + ?Sized> {
    connection: &'c mut C,
    previous: Option<Duration>,
    restored: bool,
}

impl<'c, C: ProcedureConnection + ?Sized> StatementTimeoutGuard<'c, C> {
    fn apply(connection: &'c mut C, timeout: Duration) -> Result<Self, DriverError> {
        let previous = connection.statement_timeout();
        connection.set_statement_timeout(Some(timeout))?;
        Ok(Self {
            connection,
            previous,
            restored: false,
        })
    }

    fn call(&mut self, call: &BoundCall) -> Result<RawResult, DriverError> {
        self.connection.call(call)
    }

    fn restore(mut self) -> Result<(), DriverError> {
        self.restored = true;
        self.connection.set_statement_timeout(self.previous)
    }
}

impl<C: ProcedureConnection + ?Sized> Drop for StatementTimeoutGuard<'_, C> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(error) = self.connection.set_statement_timeout(self.previous) {
            warn!(error = %error, "statement timeout could not be restored during unwind");
        }
    }
}
