//! 用户账户定义
//!
//! 实时层只关心用户是否存在以及是否处于激活状态。

use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 用户账户（由外部认证层维护）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: UserId,
    pub name: String,
    pub is_active: bool,
}

impl UserAccount {
    pub fn active(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_active: true,
        }
    }

    pub fn deactivated(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_active: false,
        }
    }
}
