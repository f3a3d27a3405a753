//! 任务Repository接口定义
//!
//! 持久化存储是唯一的事实来源；实时层只通过这个接口读取任务的当前状态。

use async_trait::async_trait;

use crate::entities::{AccessList, Task};
use crate::errors::DomainResult;
use crate::value_objects::{TaskId, UserId};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 根据ID查找任务
    async fn find_by_id(&self, id: TaskId) -> DomainResult<Option<Task>>;

    /// 用户拥有或被共享的全部任务（重连后的全量刷新使用）
    async fn list_for_user(&self, user_id: UserId) -> DomainResult<Vec<Task>>;

    /// 任务当前的授权列表
    async fn access_list(&self, id: TaskId) -> DomainResult<Option<AccessList>> {
        Ok(self.find_by_id(id).await?.map(|task| task.access_list()))
    }
}
