use domain::{ConnectionId, DomainError, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("connection {0} is not registered")]
    ConnectionNotFound(ConnectionId),
    #[error("user {0} has no registered connection")]
    UserNotConnected(UserId),
    #[error("connection {0} is already registered")]
    ConnectionAlreadyRegistered(ConnectionId),
    #[error("membership registry has been shut down")]
    RegistryClosed,
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}
