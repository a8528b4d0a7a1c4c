//! SQLite database operations
//!
//! All database access goes through this module. The access-key queries
//! implement the store's single-use contract: key replacement on issue and
//! an atomic validate-and-consume on redemption.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::net::IpAddr;
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Check a source IP against a key's restriction (exact IP or CIDR).
///
/// An unparsable restriction never matches. Address-family mismatches
/// (v4 source against a v6 restriction, or vice versa) never match.
fn ip_matches_restriction(ip: IpAddr, restriction: &str) -> bool {
    let restriction = restriction.trim();
    if restriction.is_empty() {
        return true;
    }

    match restriction.split_once('/') {
        Some((network, prefix)) => {
            let (Ok(network), Ok(prefix)) = (network.parse::<IpAddr>(), prefix.parse::<u32>())
            else {
                return false;
            };

            match (ip, network) {
                (IpAddr::V4(ip), IpAddr::V4(network)) => {
                    if prefix > 32 {
                        return false;
                    }
                    let mask = if prefix == 0 {
                        0
                    } else {
                        u32::MAX << (32 - prefix)
                    };
                    u32::from(ip) & mask == u32::from(network) & mask
                }
                (IpAddr::V6(ip), IpAddr::V6(network)) => {
                    if prefix > 128 {
                        return false;
                    }
                    let mask = if prefix == 0 {
                        0
                    } else {
                        u128::MAX << (128 - prefix)
                    };
                    u128::from(ip) & mask == u128::from(network) & mask
                }
                _ => false,
            }
        }
        None => restriction
            .parse::<IpAddr>()
            .map(|allowed| allowed == ip)
            .unwrap_or(false),
    }
}

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user, returning the assigned id
    pub async fn insert_user(&self, user: &NewUser) -> Result<i64, AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (
                username, display_name, site_admin, suspended, deleted, confirmed,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(user.site_admin)
        .bind(user.suspended)
        .bind(user.deleted)
        .bind(user.confirmed)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a user by id
    pub async fn get_user(&self, id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    // =========================================================================
    // Quizzes
    // =========================================================================

    /// Insert a quiz, returning the assigned id
    pub async fn insert_quiz(&self, quiz: &NewQuiz) -> Result<i64, AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO quizzes (name, autologin_enabled, client_config_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&quiz.name)
        .bind(quiz.autologin_enabled)
        .bind(&quiz.client_config_url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a quiz by id
    pub async fn get_quiz(&self, id: i64) -> Result<Option<Quiz>, AppError> {
        let quiz = sqlx::query_as::<_, Quiz>("SELECT * FROM quizzes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(quiz)
    }

    /// Set the per-quiz auto-login rule flag
    pub async fn set_quiz_autologin(&self, id: i64, enabled: bool) -> Result<(), AppError> {
        sqlx::query("UPDATE quizzes SET autologin_enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Enrolments
    // =========================================================================

    /// Enrol a user into a quiz (grants view capability)
    pub async fn add_enrolment(&self, user_id: i64, quiz_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO enrolments (user_id, quiz_id, created_at) VALUES (?, ?, ?)
            ON CONFLICT (user_id, quiz_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(quiz_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Check whether a user may view a quiz
    pub async fn is_enrolled(&self, user_id: i64, quiz_id: i64) -> Result<bool, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM enrolments WHERE user_id = ? AND quiz_id = ?",
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    // =========================================================================
    // Access Keys
    // =========================================================================

    /// Store a freshly minted access key, replacing any prior key in scope
    ///
    /// Deletes existing unconsumed keys for (user, quiz) and inserts the new
    /// one in a single transaction, so the one-unconsumed-key-per-scope
    /// invariant holds even under concurrent issuance.
    pub async fn replace_access_key(&self, key: &AccessKey) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM access_keys WHERE user_id = ? AND quiz_id = ? AND consumed = 0")
            .bind(key.user_id)
            .bind(key.quiz_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO access_keys (
                id, token, user_id, quiz_id, ip_restriction, expires_at, consumed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.id)
        .bind(&key.token)
        .bind(key.user_id)
        .bind(key.quiz_id)
        .bind(&key.ip_restriction)
        .bind(key.expires_at)
        .bind(key.consumed)
        .bind(key.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Delete all access keys for a (user, quiz) scope
    pub async fn delete_access_keys(&self, user_id: i64, quiz_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM access_keys WHERE user_id = ? AND quiz_id = ?")
            .bind(user_id)
            .bind(quiz_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Validate and atomically consume an access key
    ///
    /// Returns the key iff it exists for the quiz, is unconsumed, unexpired,
    /// and the source IP satisfies its restriction. The consume step is a
    /// conditional UPDATE guarded on affected rows, so of two concurrent
    /// redeemers presenting the same key exactly one gets it.
    ///
    /// A key that fails the expiry or IP check is never consumed; expired
    /// rows are purged on the way out. All failure causes collapse into
    /// `None` so callers cannot distinguish them.
    pub async fn validate_and_consume_access_key(
        &self,
        token: &str,
        quiz_id: i64,
        source_ip: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessKey>, AppError> {
        let Some(key) = sqlx::query_as::<_, AccessKey>(
            "SELECT * FROM access_keys WHERE token = ? AND quiz_id = ?",
        )
        .bind(token)
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        if key.is_expired(now) {
            // Purge on redemption attempt to avoid unbounded table growth.
            sqlx::query("DELETE FROM access_keys WHERE id = ?")
                .bind(&key.id)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        if key.consumed {
            return Ok(None);
        }

        if let Some(restriction) = &key.ip_restriction {
            if !ip_matches_restriction(source_ip, restriction) {
                return Ok(None);
            }
        }

        let result = sqlx::query("UPDATE access_keys SET consumed = 1 WHERE id = ? AND consumed = 0")
            .bind(&key.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            // Lost the race against a concurrent redeemer.
            return Ok(None);
        }

        Ok(Some(key))
    }

    /// Delete expired keys (lazy garbage collection, called on issuance)
    pub async fn purge_expired_access_keys(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM access_keys WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Insert a session record
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<(), AppError> {
        sqlx::query("INSERT INTO sessions (id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&session.id)
            .bind(session.user_id)
            .bind(session.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get a session record by id
    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, AppError> {
        let session = sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    /// Delete a session record (logout / revocation)
    pub async fn delete_session(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Enforce the concurrent-login limit for a user
    ///
    /// Keeps the `limit` most recent sessions and deletes the rest.
    /// Call after inserting the new session so the current login survives.
    /// A limit of 0 means unlimited.
    pub async fn apply_concurrent_login_limit(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<u64, AppError> {
        if limit == 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM sessions WHERE user_id = ? AND id NOT IN (
                SELECT id FROM sessions WHERE user_id = ?
                ORDER BY created_at DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
