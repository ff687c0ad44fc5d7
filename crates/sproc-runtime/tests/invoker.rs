//! 调用入口端到端测试
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：从调用方视角验证整条流水线，用内存分片桩替代数据库：
//!   1. 分片键把同一 SKU 稳定地送到同一分片；
//!   2. 输入校验失败时数据库完全未被触达；
//!   3. 空对象行为严格按过程声明执行；
//!   4. 全分片 / 搜索范围的结果合并顺序；
//!   5. 敏感参数不出现在任何日志中。
//! - **测试环境 (How)**：过程绑定来自与生产相同格式的 TOML 文档；两个分片 `s0`、`s1`。

mod support;

use std::sync::Arc;

use sproc_core::{
    CallArgs, DataSource, DriverError, Marshalable, ResultRow, SchemaBuilder, ShardSource,
    SprocError, StrategyRegistry, Value, error::ErrorCategory,
};
use sproc_runtime::{ProcedureRegistry, Scalar, Scalars, ShardResolver, SprocInvoker};
use support::{MockShard, echo};
use tracing_test::traced_test;

const DOCUMENT: &str = r#"
    [defaults]
    timeout_ms = 5000

    [[procedure]]
    name = "create_article"
    returns = "scalar"
    null_call = "skip"
    shard_strategy = "md5-string"
    shard_key = [0]
    validate_input = true

    [[procedure]]
    name = "find_article"
    returns = "row"
    null_call = "defaults"
    shard_strategy = "md5-string"
    validate_output = true

    [[procedure]]
    name = "list_articles"
    returns = "rows"
    null_call = "defaults"
    scope = "all"

    [[procedure]]
    name = "locate_article"
    returns = "row"
    null_call = "defaults"
    scope = "search"

    [[procedure]]
    name = "get_ints"
    returns = "rows"
    null_call = "defaults"

    [[procedure]]
    name = "login"
    returns = "scalar"
    null_call = "defaults"
    sensitive = ["token"]

    [[procedure]]
    name = "rotate_token"
    returns = "scalar"
    null_call = "defaults"
    parameters = ["user", "token"]
    sensitive = ["token"]
"#;

#[derive(Clone, Debug, Default, PartialEq)]
struct Article {
    sku: String,
    title: Option<String>,
    stock: i32,
}

impl Marshalable for Article {
    fn describe(schema: &mut SchemaBuilder<'_, '_, Self>) {
        schema.field("sku", |o| &o.sku, |o| &mut o.sku);
        schema.optional("title", |o| &o.title, |o| &mut o.title);
        schema.field("stock", |o| &o.stock, |o| &mut o.stock);
        schema.constraint("sku", "must not be empty", |o| !o.sku.is_empty());
        schema.constraint("stock", "must not be negative", |o| o.stock >= 0);
    }
}

impl ShardSource for Article {
    fn shard_key_input(&self) -> Value {
        Value::from(self.sku.as_str())
    }
}

#[derive(Debug, Default)]
struct ArticleLookup {
    sku: String,
}

impl Marshalable for ArticleLookup {
    fn describe(schema: &mut SchemaBuilder<'_, '_, Self>) {
        schema.field("sku", |o| &o.sku, |o| &mut o.sku);
    }
}

#[derive(Debug, Default)]
struct Login {
    user: String,
    password: String,
}

impl Marshalable for Login {
    fn describe(schema: &mut SchemaBuilder<'_, '_, Self>) {
        schema.field("user", |o| &o.user, |o| &mut o.user);
        schema
            .field("password", |o| &o.password, |o| &mut o.password)
            .sensitive();
    }
}

fn article(sku: &str, stock: i32) -> Article {
    Article {
        sku: sku.to_owned(),
        title: Some(format!("title of {sku}")),
        stock,
    }
}

fn article_row(sku: &str, stock: i32) -> ResultRow {
    ResultRow::named([
        ("sku", Value::from(sku)),
        ("title", Value::Null),
        ("stock", Value::Int(stock)),
    ])
}

fn invoker(shards: &[Arc<MockShard>]) -> SprocInvoker {
    let registry = ProcedureRegistry::from_toml_str(DOCUMENT, &StrategyRegistry::with_defaults())
        .expect("测试配置合法");
    let sources = shards
        .iter()
        .map(|shard| Arc::clone(shard) as Arc<dyn DataSource>)
        .collect();
    SprocInvoker::new(Arc::new(registry), ShardResolver::new(sources))
}

fn counting_shard(name: &str, id: i32) -> Arc<MockShard> {
    Arc::new(MockShard::new(name).returning(
        "create_article",
        vec![ResultRow::positional([Value::Int(id)])],
    ))
}

#[test]
fn articles_are_routed_by_sku_hash() {
    let shards = [counting_shard("s0", 100), counting_shard("s1", 200)];
    let invoker = invoker(&shards);

    // md5-string: ABC123 -> 0x236656 (偶数), ABC456 -> 0x59ac51 (奇数)
    let first: Scalar<i32> = invoker
        .call("create_article", Some(&article("ABC123", 1)))
        .unwrap();
    let second: Scalar<i32> = invoker
        .call("create_article", Some(&article("ABC456", 1)))
        .unwrap();

    assert_eq!(first, Scalar(100));
    assert_eq!(second, Scalar(200));
    assert_eq!(shards[0].calls_to("create_article"), 1);
    assert_eq!(shards[1].calls_to("create_article"), 1);
    assert_eq!(
        shards[0].calls()[0].parameters,
        [
            Some("ABC123".to_owned()),
            Some("title of ABC123".to_owned()),
            Some("1".to_owned()),
        ]
    );
}

#[test]
fn mistyped_shard_key_fails_before_any_shard_is_called() {
    let shards = [counting_shard("s0", 100), counting_shard("s1", 200)];
    let invoker = invoker(&shards);

    let err = invoker
        .call_args::<Scalar<i32>>("create_article", CallArgs::positional([5]))
        .unwrap_err();
    assert!(matches!(
        err,
        SprocError::ShardKey { ref procedure, ref source }
            if procedure == "create_article" && source.expected == "text"
    ));
    assert_eq!(err.code(), "sproc.shard.key_invalid");
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(shards.iter().all(|shard| shard.calls().is_empty()));
}

#[test]
fn shard_source_supplies_the_key_directly() {
    let shards = [counting_shard("s0", 100), counting_shard("s1", 200)];
    let invoker = invoker(&shards);
    let routed: Scalar<i32> = invoker
        .call_sharded("create_article", &article("ABC456", 3))
        .unwrap();
    assert_eq!(routed, Scalar(200));
    assert_eq!(shards[0].calls_to("create_article"), 0);
}

#[test]
fn invalid_input_never_reaches_the_database() {
    let shards = [counting_shard("s0", 100), counting_shard("s1", 200)];
    let invoker = invoker(&shards);

    let err = invoker
        .call::<_, Scalar<i32>>("create_article", Some(&article("", -1)))
        .unwrap_err();

    let violations = err.violations().expect("应为约束违规");
    assert_eq!(violations.len(), 2);
    assert!(violations.iter().any(|v| v.path == "sku"));
    assert!(violations.iter().any(|v| v.path == "stock"));
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(shards.iter().all(|shard| shard.calls().is_empty()));
}

#[test]
fn null_input_follows_declared_behavior() {
    let shards = [counting_shard("s0", 100), counting_shard("s1", 200)];
    let invoker = invoker(&shards);

    // create_article 声明 skip：不执行，返回空值。
    let skipped: Scalar<i32> = invoker.call::<Article, _>("create_article", None).unwrap();
    assert_eq!(skipped, Scalar(0));
    assert!(shards.iter().all(|shard| shard.calls().is_empty()));

    // find_article 声明 defaults：以全 NULL 参数调用；NULL 分片键落在分片 0。
    let found: Option<Article> = invoker.call::<ArticleLookup, _>("find_article", None).unwrap();
    assert_eq!(found, None);
    let calls = shards[0].calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].parameters, [None]);
}

#[test]
fn output_validation_rejects_inconsistent_rows() {
    let shards = [
        Arc::new(MockShard::new("s0").returning("find_article", vec![article_row("ABC123", -5)])),
        Arc::new(MockShard::new("s1")),
    ];
    let invoker = invoker(&shards);
    let lookup = ArticleLookup {
        sku: "ABC123".to_owned(),
    };

    let err = invoker
        .call::<_, Option<Article>>("find_article", Some(&lookup))
        .unwrap_err();
    assert!(matches!(
        err,
        SprocError::ConstraintViolation { ref violations, .. } if violations.len() == 1
    ));
    assert!(err.to_string().starts_with("output validation"), "{err}");
}

#[test]
fn all_scope_concatenates_rows_in_shard_order() {
    let shards = [
        Arc::new(MockShard::new("s0").returning("list_articles", vec![article_row("A-1", 1)])),
        Arc::new(MockShard::new("s1").returning(
            "list_articles",
            vec![article_row("B-1", 2), article_row("B-2", 3)],
        )),
    ];
    let invoker = invoker(&shards);

    let articles: Vec<Article> = invoker
        .call::<ArticleLookup, _>("list_articles", Some(&ArticleLookup::default()))
        .unwrap();
    let skus: Vec<_> = articles.iter().map(|article| article.sku.as_str()).collect();
    assert_eq!(skus, ["A-1", "B-1", "B-2"]);
}

#[test]
fn search_scope_stops_at_first_non_empty_shard() {
    let shards = [
        Arc::new(MockShard::new("s0")),
        Arc::new(MockShard::new("s1").returning("locate_article", vec![article_row("B-9", 9)])),
        Arc::new(MockShard::new("s2").returning("locate_article", vec![article_row("C-9", 9)])),
    ];
    let invoker = invoker(&shards);

    let found: Option<Article> = invoker
        .call("locate_article", Some(&ArticleLookup::default()))
        .unwrap();
    assert_eq!(found.map(|article| article.sku), Some("B-9".to_owned()));
    assert_eq!(shards[0].calls_to("locate_article"), 1);
    assert_eq!(shards[1].calls_to("locate_article"), 1);
    assert_eq!(shards[2].calls_to("locate_article"), 0);
}

#[test]
fn scalar_rows_collect_into_a_list() {
    let shards = [Arc::new(MockShard::new("s0").on("get_ints", |call| {
        let count = call.args().get(0).and_then(|arg| arg.value().as_i64()).unwrap_or(0);
        let rows = (0..count)
            .map(|value| ResultRow::positional([Value::BigInt(value)]))
            .collect();
        Ok(sproc_core::RawResult::Rows(rows))
    }))];
    let invoker = invoker(&shards);

    let ints: Scalars<i64> = invoker
        .call_args("get_ints", CallArgs::positional([Value::Int(3)]))
        .unwrap();
    assert_eq!(ints, Scalars(vec![0, 1, 2]));
}

#[test]
#[traced_test]
fn sensitive_arguments_never_reach_the_log() {
    let shards = [Arc::new(
        MockShard::new("s0")
            .on("login", echo)
            .on("rotate_token", echo),
    )];
    let invoker = invoker(&shards);

    let login = Login {
        user: "alice".to_owned(),
        password: "hunter2".to_owned(),
    };
    let _: Scalar<String> = invoker.call("login", Some(&login)).unwrap();
    let _: Scalar<String> = invoker
        .call_args(
            "login",
            CallArgs::new().arg("user", "bob").arg("token", "s3cr3t-token"),
        )
        .unwrap();
    let _: Scalar<String> = invoker
        .call_args(
            "rotate_token",
            CallArgs::positional(["carol", "mySecR3tPassW0rd"]),
        )
        .unwrap();
    let _: Scalar<String> = invoker
        .call_args("login", CallArgs::positional(["dave", "p0sitional-secret"]))
        .unwrap();

    assert!(logs_contain("calling procedure"));
    assert!(logs_contain("user=alice"));
    assert!(logs_contain("user=bob"));
    assert!(logs_contain("user=carol"));
    assert!(!logs_contain("hunter2"));
    assert!(!logs_contain("s3cr3t-token"));
    assert!(!logs_contain("mySecR3t"));
    assert!(!logs_contain("p0sitional-secret"));
}

#[test]
fn driver_errors_surface_with_their_source() {
    let shards = [Arc::new(MockShard::new("s0").on("get_ints", |_| {
        Err(DriverError::Statement {
            sqlstate: "42883".to_owned(),
            message: "function get_ints(integer) does not exist".to_owned(),
        })
    }))];
    let invoker = invoker(&shards);

    let err = invoker
        .call_args::<Scalars<i32>>("get_ints", CallArgs::positional([Value::Int(1)]))
        .unwrap_err();
    assert!(matches!(
        err,
        SprocError::CallExecution {
            source: DriverError::Statement { .. },
            ..
        }
    ));
    assert_eq!(err.category(), ErrorCategory::Execution);
    assert_eq!(shards[0].checked_out(), 0);
}

#[test]
fn unknown_procedure_and_missing_shards_are_configuration_errors() {
    let shards = [counting_shard("s0", 1)];
    let err = invoker(&shards)
        .call_args::<()>("drop_everything", CallArgs::new())
        .unwrap_err();
    assert!(matches!(err, SprocError::UnknownProcedure(ref name) if name == "drop_everything"));

    let empty = invoker(&[]);
    let err = empty
        .call::<_, Scalar<i32>>("create_article", Some(&article("ABC123", 1)))
        .unwrap_err();
    assert!(matches!(err, SprocError::NoShardsConfigured));
    let err = empty
        .call::<_, Vec<Article>>("list_articles", Some(&ArticleLookup::default()))
        .unwrap_err();
    assert_eq!(err.code(), "sproc.shard.none_configured");
    assert_eq!(err.category(), ErrorCategory::Configuration);
}
