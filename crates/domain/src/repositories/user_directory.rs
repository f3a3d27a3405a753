//! 用户目录接口定义

use async_trait::async_trait;

use crate::entities::UserAccount;
use crate::errors::DomainResult;
use crate::value_objects::UserId;

/// 用户目录：握手时确认用户存在且处于激活状态
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 根据ID查找用户
    async fn find_by_id(&self, id: UserId) -> DomainResult<Option<UserAccount>>;
}
