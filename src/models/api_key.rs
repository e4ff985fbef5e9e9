use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// What an application API key may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiKeyPermission {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "client:create")]
    ClientCreate,
    #[serde(rename = "client:modify")]
    ClientModify,
}

impl ApiKeyPermission {
    pub const ALL: [ApiKeyPermission; 3] = [
        ApiKeyPermission::Read,
        ApiKeyPermission::ClientCreate,
        ApiKeyPermission::ClientModify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyPermission::Read => "read",
            ApiKeyPermission::ClientCreate => "client:create",
            ApiKeyPermission::ClientModify => "client:modify",
        }
    }
}

impl fmt::Display for ApiKeyPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKeyPermission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AppError::Format(format!("unknown api key permission: {}", s)))
    }
}

/// Keeps known permission names, each once, in first-seen order.
pub fn filter_permissions<S: AsRef<str>>(names: &[S]) -> Vec<ApiKeyPermission> {
    let mut result = Vec::with_capacity(ApiKeyPermission::ALL.len());

    for name in names {
        if let Ok(permission) = name.as_ref().parse::<ApiKeyPermission>() {
            if !result.contains(&permission) {
                result.push(permission);
            }
        }

        if result.len() == ApiKeyPermission::ALL.len() {
            break;
        }
    }

    result
}

/// An application API key. The secret itself is only stored encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: Uuid,
    pub application_id: Uuid,
    pub permissions: Vec<ApiKeyPermission>,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub account_id: Uuid,
}

impl ApiKey {
    /// Whether `now` lies within `[not_before, expires_at]`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_before && now <= self.expires_at
    }
}
