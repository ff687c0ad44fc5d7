//! 集成测试共享的内存分片桩。
//!
//! - 每个 [`MockShard`] 模拟一个连接池：会话级语句超时在连接归还时写回池中，借出数量可观测；
//! - 过程“耗时”是虚拟的：登记的耗时超过连接上生效的语句超时即返回 `StatementTimeout`，测试无需真正等待；
//! - 所有调用连同文本参数与生效超时一起记录，供断言“是否触达数据库”。

#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use sproc_core::{
    BoundCall, DataSource, DriverError, ProcedureConnection, RawResult, ResultRow,
};

type Handler = Arc<dyn Fn(&BoundCall) -> Result<RawResult, DriverError> + Send + Sync>;

/// 一次被执行的调用。
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub procedure: String,
    pub parameters: Vec<Option<String>>,
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct ShardState {
    session_timeout: Option<Duration>,
    checked_out: usize,
    calls: Vec<RecordedCall>,
    costs: HashMap<String, Duration>,
    handlers: HashMap<String, Handler>,
}

pub struct MockShard {
    name: String,
    state: Mutex<ShardState>,
}

impl MockShard {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Mutex::new(ShardState::default()),
        }
    }

    /// 池中连接的初始会话超时。
    pub fn with_session_timeout(self, timeout: Option<Duration>) -> Self {
        self.state.lock().session_timeout = timeout;
        self
    }

    /// 登记过程处理函数；未登记的过程返回空结果。
    pub fn on<F>(self, procedure: &str, handler: F) -> Self
    where
        F: Fn(&BoundCall) -> Result<RawResult, DriverError> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .handlers
            .insert(procedure.to_owned(), Arc::new(handler));
        self
    }

    /// 过程返回固定行。
    pub fn returning(self, procedure: &str, rows: Vec<ResultRow>) -> Self {
        self.on(procedure, move |_| Ok(RawResult::Rows(rows.clone())))
    }

    /// 登记过程的虚拟耗时。
    pub fn with_cost(self, procedure: &str, cost: Duration) -> Self {
        self.state
            .lock()
            .costs
            .insert(procedure.to_owned(), cost);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, procedure: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.procedure == procedure)
            .count()
    }

    pub fn checked_out(&self) -> usize {
        self.state.lock().checked_out
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.state.lock().session_timeout
    }
}

impl DataSource for MockShard {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection(&self) -> Result<Box<dyn ProcedureConnection + '_>, DriverError> {
        let mut state = self.state.lock();
        state.checked_out += 1;
        Ok(Box::new(MockConnection {
            shard: self,
            timeout: state.session_timeout,
        }))
    }
}

struct MockConnection<'a> {
    shard: &'a MockShard,
    timeout: Option<Duration>,
}

impl ProcedureConnection for MockConnection<'_> {
    fn statement_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn set_statement_timeout(&mut self, timeout: Option<Duration>) -> Result<(), DriverError> {
        self.timeout = timeout;
        Ok(())
    }

    fn call(&mut self, call: &BoundCall) -> Result<RawResult, DriverError> {
        let (cost, handler) = {
            let mut state = self.shard.state.lock();
            state.calls.push(RecordedCall {
                procedure: call.procedure().to_owned(),
                parameters: call.text_parameters(),
                timeout: self.timeout,
            });
            (
                state.costs.get(call.procedure()).copied(),
                state.handlers.get(call.procedure()).cloned(),
            )
        };

        if let (Some(cost), Some(timeout)) = (cost, self.timeout)
            && cost > timeout
        {
            return Err(DriverError::StatementTimeout(timeout));
        }
        match handler {
            Some(handler) => handler(call),
            None => Ok(RawResult::Void),
        }
    }
}

impl Drop for MockConnection<'_> {
    fn drop(&mut self) {
        let mut state = self.shard.state.lock();
        state.checked_out -= 1;
        state.session_timeout = self.timeout;
    }
}

/// 把调用参数原样作为一行返回。
pub fn echo(call: &BoundCall) -> Result<RawResult, DriverError> {
    Ok(RawResult::Rows(vec![ResultRow::positional(call.args().values())]))
}
