//! Repository接口定义
//!
//! 定义数据访问层的抽象接口，内层定义接口，外层实现接口。

pub mod task_repository;
pub mod user_directory;

pub use task_repository::TaskRepository;
pub use user_directory::UserDirectory;

#[cfg(feature = "testing")]
pub use user_directory::MockUserDirectory;
