use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannedUser {
    pub user_email: String,
    #[serde(default)]
    pub details: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl BannedUser {
    #[must_use]
    pub fn new(user_email: impl Into<String>, banned_by: impl Into<String>) -> Self {
        let now = Utc::now();
        let by = banned_by.into();
        Self {
            user_email: user_email.into(),
            details: String::new(),
            created_at: now,
            created_by: by.clone(),
            updated_at: now,
            updated_by: by,
        }
    }
}
