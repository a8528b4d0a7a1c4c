//! Data models
//!
//! Rust structs representing database entities.
//! Users and quizzes use integer ids (they appear in request URLs);
//! access keys and sessions use ULID ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// User
// =============================================================================

/// A platform user account
///
/// Auto-login is only ever performed for active, non-admin users.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    /// Site administrators are categorically denied auto-login
    pub site_admin: bool,
    pub suspended: bool,
    pub deleted: bool,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// An account is active when it is confirmed and neither suspended nor deleted.
    pub fn is_active(&self) -> bool {
        self.confirmed && !self.suspended && !self.deleted
    }
}

/// Fields for creating a new user (id assigned by the database)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub display_name: Option<String>,
    pub site_admin: bool,
    pub suspended: bool,
    pub deleted: bool,
    pub confirmed: bool,
}

// =============================================================================
// Quiz
// =============================================================================

/// A quiz (exam) instance
///
/// `autologin_enabled` is the per-quiz rule flag deciding whether the
/// auto-login launch link is offered on the quiz view page.
/// `client_config_url` is the exam-client config download link that the
/// rewritten launch link replaces and that redemption forwards to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Quiz {
    pub id: i64,
    pub name: String,
    pub autologin_enabled: bool,
    pub client_config_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a new quiz (id assigned by the database)
#[derive(Debug, Clone)]
pub struct NewQuiz {
    pub name: String,
    pub autologin_enabled: bool,
    pub client_config_url: String,
}

// =============================================================================
// Access Key
// =============================================================================

/// Single-use auto-login key
///
/// Bound to (user, quiz, issuing IP) with an absolute expiry.
/// At most one unconsumed key exists per (user, quiz) scope; issuing a new
/// one replaces any prior key for that scope. `consumed` is set exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessKey {
    pub id: String,
    /// Opaque random token (32 alphanumeric chars)
    pub token: String,
    pub user_id: i64,
    pub quiz_id: i64,
    /// Exact IP or CIDR the redeeming request must come from
    pub ip_restriction: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}

impl AccessKey {
    /// Check if the key has passed its expiry timestamp
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// =============================================================================
// Session
// =============================================================================

/// Server-side session record
///
/// The signed cookie carries the session payload; this row makes the
/// session revocable and backs the concurrent-login limit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}
