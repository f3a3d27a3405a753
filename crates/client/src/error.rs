use domain::TaskId;
use thiserror::Error;

/// 对账状态机的调用错误（调用顺序不对，而不是数据冲突）
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("task {0} is not tracked")]
    NotTracked(TaskId),

    #[error("task {0} already has a pending local change")]
    AlreadyPending(TaskId),

    #[error("task {0} has no pending local change")]
    NotPending(TaskId),

    #[error("confirmation for {expected} carried task {actual}")]
    Mismatch { expected: TaskId, actual: TaskId },
}

/// 客户端连接错误
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("handshake rejected: unauthorized")]
    Unauthorized,

    #[error("client connection is closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        match &err {
            tokio_tungstenite::tungstenite::Error::Http(response) if response.status() == 401 => {
                ClientError::Unauthorized
            }
            _ => ClientError::Connect(Box::new(err)),
        }
    }
}
