//! Rows returned by the repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

/// Administrative account as stored in `admin_accounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_superuser: bool,
    pub created_at: String,
}

/// Result of ensuring the configured administrative account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOutcome {
    Created,
    AlreadyPresent,
}

impl AdminOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminOutcome::Created => "created",
            AdminOutcome::AlreadyPresent => "already_present",
        }
    }
}
