//! 领域实体定义
//!
//! 包含实时协作层读取的核心实体：任务与用户账户。

pub mod task;
pub mod user;

pub use task::{AccessList, Collaborator, Comment, Permission, Task, TaskPriority, TaskStatus};
pub use user::UserAccount;
