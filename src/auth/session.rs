//! Session management
//!
//! Uses HMAC-signed tokens stored in cookies, backed by a server-side
//! session row so sessions can be revoked by the concurrent-login limit.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::data::{EntityId, SessionRecord, User};
use crate::error::AppError;

/// Length of the per-session CSRF key
const SESSKEY_LEN: usize = 16;

/// User session data
///
/// Stored in a signed cookie. The `sesskey` is the per-session CSRF key
/// that state-changing GET endpoints (the auto-login issuer) require.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Server-side session row id
    pub session_id: String,
    pub user_id: i64,
    pub username: String,
    /// Carried so the admin-denial policy needs no extra lookup
    pub site_admin: bool,
    /// Per-session CSRF key
    pub sesskey: String,
    /// When session was created
    pub created_at: DateTime<Utc>,
    /// When session expires
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Generate a random per-session CSRF key
pub fn generate_sesskey() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSKEY_LEN)
        .map(char::from)
        .collect()
}

/// Establish a full authenticated session for a user
///
/// Equivalent to a normal login minus the credential check: inserts the
/// server-side session row, enforces the concurrent-login limit (the fresh
/// session survives), and returns the session with its signed cookie token.
pub async fn establish_session(
    state: &AppState,
    user: &User,
) -> Result<(Session, String), AppError> {
    let now = Utc::now();
    let record = SessionRecord {
        id: EntityId::new().0,
        user_id: user.id,
        created_at: now,
    };
    state.db.insert_session(&record).await?;

    let dropped = state
        .db
        .apply_concurrent_login_limit(user.id, state.config.auth.concurrent_login_limit)
        .await?;
    if dropped > 0 {
        tracing::info!(
            user_id = user.id,
            dropped,
            "Concurrent-login limit evicted older sessions"
        );
    }

    let session = Session {
        session_id: record.id,
        user_id: user.id,
        username: user.username.clone(),
        site_admin: user.site_admin,
        sesskey: generate_sesskey(),
        created_at: now,
        expires_at: now + Duration::seconds(state.config.auth.session_max_age),
    };
    let token = create_session_token(&session, &state.config.auth.session_secret)?;

    Ok((session, token))
}

/// Create a signed session token
///
/// Token format: base64(payload).base64(hmac_sha256(payload))
///
/// # Arguments
/// * `session` - Session data to encode
/// * `secret` - HMAC secret key
///
/// # Returns
/// Signed token string
pub fn create_session_token(session: &Session, secret: &str) -> Result<String, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    // 1. Serialize session to JSON
    let payload = serde_json::to_string(session).map_err(|e| AppError::Internal(e.into()))?;

    // 2. Base64 encode the payload
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes());

    // 3. Create HMAC-SHA256 signature
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(e.to_string()))?;
    mac.update(payload_b64.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    // 4. Return "{payload}.{signature}"
    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify and decode a session token
///
/// # Arguments
/// * `token` - Token string to verify
/// * `secret` - HMAC secret key
///
/// # Returns
/// Decoded session if valid
///
/// # Errors
/// Returns error if signature is invalid or token is malformed or expired
pub fn verify_session_token(token: &str, secret: &str) -> Result<Session, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    // 1. Split token into payload and signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 2 {
        return Err(AppError::Unauthenticated);
    }

    let payload_b64 = parts[0];
    let signature_b64 = parts[1];

    // 2. Verify HMAC signature
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(e.to_string()))?;
    mac.update(payload_b64.as_bytes());

    let expected_signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthenticated)?;

    mac.verify_slice(&expected_signature)
        .map_err(|_| AppError::Unauthenticated)?;

    // 3. Decode and deserialize payload
    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::Unauthenticated)?;

    let payload_str =
        String::from_utf8(payload_bytes).map_err(|_| AppError::Unauthenticated)?;

    let session: Session =
        serde_json::from_str(&payload_str).map_err(|_| AppError::Unauthenticated)?;

    // 4. Check if session is expired
    if session.is_expired() {
        return Err(AppError::Unauthenticated);
    }

    Ok(session)
}
