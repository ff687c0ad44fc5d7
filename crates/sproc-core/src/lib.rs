//! # sproc-core
//!
//! ## 核心意图（Why）
//! - 承载存储过程调用的“纯逻辑”部分：领域对象与参数表之间的封送、调用签名目录、分片键策略、
//!   约束校验、过程绑定配置与连接契约；
//! - 不持有连接、不启动线程，所有有状态的编排（分片选择、超时表、调用执行）位于 `sproc-runtime`。
//!
//! ## 模块地图（What）
//! - [`schema`] / [`catalog`] / [`signature`]：声明式字段模式 → 缓存的有序调用签名；
//! - [`marshal`] / [`literal`]：对象 ↔ 参数表 / 结果行，以及 PostgreSQL 文本字面量；
//! - [`shard`]：分片键策略与注册表；
//! - [`validation`]：输入/输出校验闸门；
//! - [`configuration`]：过程绑定与 TOML 配置文档；
//! - [`connection`]：数据源、连接与结果形态契约；
//! - [`error`]：错误分类与稳定错误码。
//!
//! ## 数据流（How）
//! 对象 → 目录查找签名 → 输入校验 → 封送为参数 → 分片键 → 分片连接 → 执行 → 结果行 → 解封送 → 输出校验。

pub mod catalog;
pub mod configuration;
pub mod connection;
pub mod error;
pub mod literal;
pub mod marshal;
pub mod schema;
pub mod shard;
pub mod signature;
pub mod validation;
pub mod value;

pub use catalog::FieldCatalog;
pub use configuration::{ProcedureBinding, ProcedureConfig, ReturnShape, ShardScope, ValidationMode};
pub use connection::{BoundCall, CallResult, DataSource, DriverError, ProcedureConnection, RawResult, ResultRow};
pub use error::{ErrorCategory, MarshalError, ShardKeyError, SignatureError, SprocError};
pub use marshal::{CallArgs, Marshaled, NullCallBehavior, marshal, unmarshal};
pub use schema::{DatabaseEnum, Marshalable, SchemaBuilder, ValueTransformer};
pub use shard::{ShardKeyStrategy, ShardSource, StrategyRegistry, compute_shard_id};
pub use signature::{CallSignature, ProcedureContext};
pub use validation::{ValidationGate, Violation};
pub use value::{ScalarField, Value};
