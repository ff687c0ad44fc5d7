//! # sproc-runtime
//!
//! ## 核心意图（Why）
//! - 承载存储过程调用链上“有状态”的部分：分片数据源列表、可热替换的超时表、过程注册表与调用执行器；
//! - `sproc-core` 负责把对象变成参数、把行变回对象；本 crate 负责把参数送到正确的分片、在正确的超时内执行。
//!
//! ## 模块地图（What）
//! - [`resolver`]：原始分片键 → 分片下标 → 数据源；
//! - [`timeouts`]：按过程名索引的超时表，读路径无锁、写路径整表替换；
//! - [`registry`]：过程绑定注册表，从 TOML 配置装载；
//! - [`executor`]：在单条连接上以受控超时执行调用并恢复会话设置；
//! - [`output`]：按声明的返回形态把结果还原为调用方类型；
//! - [`invoker`]：把以上部件串成一次完整调用。
//!
//! ## 线程模型（How）
//! 所有公开类型均为 `Send + Sync`，可放入 `Arc` 在线程间共享；调用是同步的，
//! 阻塞发生在 [`sproc_core::ProcedureConnection::call`] 内部。

pub mod executor;
pub mod invoker;
pub mod output;
pub mod provenance;
pub mod registry;
pub mod resolver;
pub mod timeouts;

pub use executor::CallExecutor;
pub use invoker::SprocInvoker;
pub use output::{CallOutput, Scalar, Scalars};
pub use registry::ProcedureRegistry;
pub use resolver::ShardResolver;
pub use timeouts::TimeoutTable;
