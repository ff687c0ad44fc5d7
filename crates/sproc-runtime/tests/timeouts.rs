//! 调用超时测试
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：超时是连接级会话设置，最容易出的问题是“设置了却没恢复”，
//!   让下一个借到这条连接的调用方继承错误的超时。这里锁定：
//!   1. 超过阈值的调用以 `CallTimeout` 失败，连接的会话超时保持调用前的值；
//!   2. 运行期调高超时后，同一过程的下一次调用成功；
//!   3. 调用进行中修改超时，只影响之后的调用；
//!   4. 任何路径下连接都已归还。
//! - **测试环境 (How)**：分片桩用虚拟耗时判断是否超时，不依赖真实时钟。

mod support;

use std::{sync::Arc, time::Duration};

use sproc_core::{
    CallArgs, DataSource, RawResult, ResultRow, SprocError, StrategyRegistry, Value,
    error::{ErrorCategory, codes},
};
use sproc_runtime::{ProcedureRegistry, Scalar, ShardResolver, SprocInvoker};
use support::MockShard;
use tracing_test::traced_test;

const DOCUMENT: &str = r#"
    [[procedure]]
    name = "get_simple_int"
    returns = "scalar"
    null_call = "defaults"
    timeout_ms = 10
"#;

const SESSION_DEFAULT: Duration = Duration::from_secs(60);

fn registry() -> Arc<ProcedureRegistry> {
    Arc::new(
        ProcedureRegistry::from_toml_str(DOCUMENT, &StrategyRegistry::with_defaults())
            .expect("测试配置合法"),
    )
}

fn slow_shard() -> Arc<MockShard> {
    Arc::new(
        MockShard::new("s0")
            .with_session_timeout(Some(SESSION_DEFAULT))
            .with_cost("get_simple_int", Duration::from_millis(50))
            .returning(
                "get_simple_int",
                vec![ResultRow::positional([Value::Int(42)])],
            ),
    )
}

fn invoker(registry: &Arc<ProcedureRegistry>, shard: &Arc<MockShard>) -> SprocInvoker {
    let source = Arc::clone(shard) as Arc<dyn DataSource>;
    SprocInvoker::new(Arc::clone(registry), ShardResolver::single(source))
}

fn get_simple_int(invoker: &SprocInvoker) -> Result<Scalar<i32>, SprocError> {
    invoker.call_args("get_simple_int", CallArgs::new())
}

#[test]
#[traced_test]
fn slow_call_times_out_and_session_is_restored() {
    let registry = registry();
    let shard = slow_shard();
    let invoker = invoker(&registry, &shard);

    let err = get_simple_int(&invoker).unwrap_err();
    assert!(matches!(
        err,
        SprocError::CallTimeout { ref procedure, timeout }
            if procedure == "get_simple_int" && timeout == Duration::from_millis(10)
    ));
    assert_eq!(err.code(), codes::CALL_TIMEOUT);
    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert!(logs_contain("procedure call timed out"));

    assert_eq!(shard.calls()[0].timeout, Some(Duration::from_millis(10)));
    assert_eq!(shard.session_timeout(), Some(SESSION_DEFAULT));
    assert_eq!(shard.checked_out(), 0);
}

#[test]
fn raising_the_timeout_lets_the_next_call_succeed() {
    let registry = registry();
    let shard = slow_shard();
    let invoker = invoker(&registry, &shard);

    assert!(get_simple_int(&invoker).is_err());

    registry
        .timeouts()
        .set("get_simple_int", Duration::from_millis(100));
    assert_eq!(get_simple_int(&invoker).unwrap(), Scalar(42));

    let calls = shard.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].timeout, Some(Duration::from_millis(100)));
    assert_eq!(shard.session_timeout(), Some(SESSION_DEFAULT));
    assert_eq!(shard.checked_out(), 0);
}

#[test]
fn reloaded_document_replaces_timeouts() {
    let registry = registry();
    let shard = slow_shard();
    let invoker = invoker(&registry, &shard);

    let revision = registry
        .reload_timeouts(&DOCUMENT.replace("timeout_ms = 10", "timeout_ms = 200"))
        .unwrap();
    assert_eq!(revision, 1);
    assert_eq!(get_simple_int(&invoker).unwrap(), Scalar(42));

    registry.reload_timeouts(DOCUMENT).unwrap();
    assert!(matches!(
        get_simple_int(&invoker),
        Err(SprocError::CallTimeout { .. })
    ));
}

#[test]
fn timeout_change_during_a_call_applies_to_later_calls_only() {
    let registry = registry();
    let timeouts = Arc::clone(registry.timeouts());
    let shard = Arc::new(
        MockShard::new("s0")
            .with_session_timeout(Some(SESSION_DEFAULT))
            .on("get_simple_int", move |_| {
                timeouts.set("get_simple_int", Duration::from_millis(1));
                Ok(RawResult::Rows(vec![ResultRow::positional([Value::Int(7)])]))
            }),
    );
    let invoker = invoker(&registry, &shard);

    assert_eq!(get_simple_int(&invoker).unwrap(), Scalar(7));
    assert_eq!(get_simple_int(&invoker).unwrap(), Scalar(7));

    let calls = shard.calls();
    assert_eq!(calls[0].timeout, Some(Duration::from_millis(10)));
    assert_eq!(calls[1].timeout, Some(Duration::from_millis(1)));
    assert_eq!(shard.session_timeout(), Some(SESSION_DEFAULT));
}
