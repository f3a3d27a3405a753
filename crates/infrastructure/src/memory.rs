//! 内存实现
//!
//! 没有配置数据库时使用，同时也是测试里的持久化存储替身：
//! 每次写入都会递增任务版本号，模拟按提交顺序分配的版本。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    DomainError, DomainResult, Permission, Task, TaskId, TaskRepository, UserAccount, UserDirectory,
    UserId,
};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserAccount>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: UserAccount) {
        self.users.write().await.insert(account.id, account);
    }

    /// 停用用户；返回用户是否存在
    pub async fn deactivate(&self, user_id: UserId) -> bool {
        match self.users.write().await.get_mut(&user_id) {
            Some(account) => {
                account.is_active = false;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: UserId) -> DomainResult<Option<UserAccount>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存新任务，版本号从 1 开始
    pub async fn insert(&self, mut task: Task) -> Task {
        task.version = 1;
        self.tasks.write().await.insert(task.id, task.clone());
        task
    }

    /// 在写锁内修改任务并递增版本，返回提交后的任务
    pub async fn update<F>(&self, id: TaskId, change: F) -> DomainResult<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| DomainError::resource_not_found("task", id.to_string()))?;
        change(task);
        task.version += 1;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    pub async fn share(&self, id: TaskId, user_id: UserId, permission: Permission) -> DomainResult<Task> {
        self.update(id, |task| task.share_with(user_id, permission, Utc::now()))
            .await
    }

    pub async fn unshare(&self, id: TaskId, user_id: UserId) -> DomainResult<Task> {
        self.update(id, |task| {
            task.remove_shared_user(user_id);
        })
        .await
    }

    /// 删除任务，返回删除前的最后状态
    pub async fn delete(&self, id: TaskId) -> DomainResult<Task> {
        self.tasks
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| DomainError::resource_not_found("task", id.to_string()))
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn find_by_id(&self, id: TaskId) -> DomainResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> DomainResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut visible: Vec<Task> = tasks
            .values()
            .filter(|task| task.user_has_permission(user_id, Permission::Read))
            .cloned()
            .collect();
        visible.sort_by_key(|task| task.created_at);
        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_bump_version_in_commit_order() {
        let repo = InMemoryTaskRepository::new();
        let owner = UserId::random();
        let now = Utc::now();
        let task = repo.insert(Task::new(owner, "a", now, now)).await;
        assert_eq!(task.version, 1);

        let task = repo.update(task.id, |t| t.title = "b".into()).await.unwrap();
        assert_eq!(task.version, 2);
        let task = repo.share(task.id, UserId::random(), Permission::Write).await.unwrap();
        assert_eq!(task.version, 3);
    }

    #[tokio::test]
    async fn list_for_user_includes_shared_tasks() {
        let repo = InMemoryTaskRepository::new();
        let (owner, bob) = (UserId::random(), UserId::random());
        let now = Utc::now();
        let task = repo.insert(Task::new(owner, "a", now, now)).await;
        assert!(repo.list_for_user(bob).await.unwrap().is_empty());

        repo.share(task.id, bob, Permission::Read).await.unwrap();
        assert_eq!(repo.list_for_user(bob).await.unwrap().len(), 1);

        repo.unshare(task.id, bob).await.unwrap();
        assert!(repo.list_for_user(bob).await.unwrap().is_empty());
        assert_eq!(repo.access_list(task.id).await.unwrap().unwrap().members().len(), 1);
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let repo = InMemoryTaskRepository::new();
        let result = repo.delete(TaskId::random()).await;
        assert!(matches!(result, Err(DomainError::ResourceNotFound { .. })));
    }

    #[tokio::test]
    async fn deactivated_user_stays_visible_as_inactive() {
        let directory = InMemoryUserDirectory::new();
        let account = UserAccount::active(UserId::random(), "alice");
        directory.insert(account.clone()).await;
        assert!(directory.deactivate(account.id).await);

        let found = directory.find_by_id(account.id).await.unwrap().unwrap();
        assert!(!found.is_active);
    }
}
