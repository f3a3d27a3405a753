//! 基础设施层实现。
//!
//! 提供用户目录、任务仓储的内存与 PostgreSQL 适配器，以及任务变更通知源，
//! 实现应用/领域层定义的接口。

pub mod memory;
pub mod migrations;
pub mod mutation_feed;
pub mod repository;

pub use memory::{InMemoryTaskRepository, InMemoryUserDirectory};
pub use migrations::MIGRATOR;
pub use mutation_feed::{MutationKind, MutationNotice, PgMutationFeed, MUTATION_CHANNEL};
pub use repository::{create_pg_pool, PgTaskRepository, PgUserDirectory};
