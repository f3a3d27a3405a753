use async_trait::async_trait;
use domain::{
    DomainError, DomainResult, Task, TaskId, TaskRepository, UserAccount, UserDirectory, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> DomainError {
    DomainError::storage_error(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> DomainError {
    DomainError::storage_error(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    name: String,
    is_active: bool,
}

impl From<UserRecord> for UserAccount {
    fn from(value: UserRecord) -> Self {
        UserAccount {
            id: UserId::from(value.id),
            name: value.name,
            is_active: value.is_active,
        }
    }
}

/// 任务文档整体存放在 jsonb 列里，版本号单独一列由写入方在提交时递增
#[derive(Debug, FromRow)]
struct TaskRecord {
    id: Uuid,
    owner_id: Uuid,
    version: i64,
    doc: serde_json::Value,
}

impl TryFrom<TaskRecord> for Task {
    type Error = DomainError;

    fn try_from(value: TaskRecord) -> Result<Self, Self::Error> {
        let mut task: Task = serde_json::from_value(value.doc)
            .map_err(|err| invalid_data(format!("task {} has malformed document: {}", value.id, err)))?;
        // 列上的值是权威的
        task.id = TaskId::from(value.id);
        task.owner = UserId::from(value.owner_id);
        task.version = u64::try_from(value.version)
            .map_err(|_| invalid_data(format!("task {} has negative version", value.id)))?;
        Ok(task)
    }
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: UserId) -> DomainResult<Option<UserAccount>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, name, is_active FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(UserAccount::from))
    }
}

#[derive(Clone)]
pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn find_by_id(&self, id: TaskId) -> DomainResult<Option<Task>> {
        let record = sqlx::query_as::<_, TaskRecord>(
            r#"SELECT id, owner_id, version, doc FROM tasks WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Task::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> DomainResult<Vec<Task>> {
        let records = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT id, owner_id, version, doc
            FROM tasks
            WHERE owner_id = $1
               OR doc -> 'sharedWith' @> jsonb_build_array(jsonb_build_object('user', $1::text))
            ORDER BY (doc ->> 'createdAt') ASC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Task::try_from).collect()
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
