//! 任务协作实时层核心领域模型
//!
//! 包含任务、用户账户、实时事件以及外部存储的抽象接口。

pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use repositories::*;
pub use value_objects::*;
