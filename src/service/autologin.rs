//! Auto-login token lifecycle
//!
//! Issuance mints a single-use key bound to (user, quiz, source IP) and
//! builds the exam-client redeem URL; redemption runs the ordered
//! validation chain and establishes the session. Handlers stay thin.

use std::net::IpAddr;

use chrono::{Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::AppState;
use crate::auth::{ClientMeta, Session, establish_session, policy};
use crate::config::AppConfig;
use crate::data::{AccessKey, EntityId};
use crate::error::AppError;
use crate::metrics::{AUTOLOGIN_KEYS_ISSUED, AUTOLOGIN_REDEMPTIONS, SESSIONS_ESTABLISHED};

/// Access token length (alphanumeric chars)
const TOKEN_LEN: usize = 32;

/// Which path minted a key
///
/// The two call sites carry different TTLs: the redirect endpoint issues
/// short-lived keys, the view-page launch link longer-lived ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Issue,
    Launch,
}

impl CallSite {
    fn ttl_secs(self, config: &AppConfig) -> i64 {
        match self {
            Self::Issue => config.autologin.issue_ttl_secs,
            Self::Launch => config.autologin.launch_ttl_secs,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Launch => "launch",
        }
    }
}

/// Generate a random access token
fn generate_access_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Mint and persist a fresh access key for (user, quiz)
///
/// Replaces any prior unconsumed key for the scope and binds the new key
/// to the caller's source IP. Expired keys are garbage-collected here,
/// piggybacking on the write path.
pub async fn issue_key(
    state: &AppState,
    user_id: i64,
    quiz_id: i64,
    source_ip: IpAddr,
    site: CallSite,
) -> Result<AccessKey, AppError> {
    let now = Utc::now();

    let purged = state.db.purge_expired_access_keys(now).await?;
    if purged > 0 {
        tracing::debug!(purged, "Purged expired auto-login keys");
    }

    let key = AccessKey {
        id: EntityId::new().0,
        token: generate_access_token(),
        user_id,
        quiz_id,
        ip_restriction: Some(source_ip.to_string()),
        expires_at: now + Duration::seconds(site.ttl_secs(&state.config)),
        consumed: false,
        created_at: now,
    };
    state.db.replace_access_key(&key).await?;

    AUTOLOGIN_KEYS_ISSUED.with_label_values(&[site.label()]).inc();
    tracing::info!(
        user_id,
        quiz_id,
        call_site = site.label(),
        expires_at = %key.expires_at,
        "Issued auto-login key"
    );

    Ok(key)
}

/// Build the redeem URL handed to the exam client
///
/// Assembled under the exam-client scheme selected by transport security;
/// the query carries quiz id, user id, token and the URL-encoded
/// forward target.
pub fn build_redeem_url(
    config: &AppConfig,
    quiz_id: i64,
    user_id: i64,
    token: &str,
    urltogo: &str,
    secure: bool,
) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("quiz_id", &quiz_id.to_string())
        .append_pair("user_id", &user_id.to_string())
        .append_pair("token", token)
        .append_pair("urltogo", urltogo)
        .finish();

    format!(
        "{}://{}/autologin/redeem?{}",
        config.launch.scheme_for(secure),
        config.server.domain,
        query
    )
}

/// Redemption parameters as supplied by the exam client
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub quiz_id: i64,
    pub user_id: i64,
    pub token: String,
    pub urltogo: Option<String>,
}

/// What the redeem handler should respond with
#[derive(Debug)]
pub enum RedeemOutcome {
    /// Already logged in as the claimed user; key deleted, no re-login
    AlreadyLoggedIn { redirect_to: String },
    /// Session established for the key's owner
    LoggedIn {
        session: Session,
        cookie_token: String,
        redirect_to: String,
    },
}

/// Validate and consume an access key, establishing a session for its owner
///
/// Steps run in order and short-circuit on failure:
/// existing-session handling, site-wide web-service login toggle, secure
/// transport (checked before any token lookup), admin denial of the claimed
/// user, atomic validate-and-consume, owner match, user load, active-account
/// check, login with concurrent-limit enforcement.
///
/// The consumed key is left to expire on its own: headless clients invoke
/// this endpoint twice in some workflows, and the second call lands in the
/// idempotent already-logged-in branch.
pub async fn redeem(
    state: &AppState,
    request: RedeemRequest,
    meta: ClientMeta,
    existing: Option<Session>,
) -> Result<RedeemOutcome, AppError> {
    let redirect_to = request
        .urltogo
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| state.config.server.base_url());

    // 1. An existing session either makes this a no-op replay (same user)
    //    or a hard conflict (different user). Either way the scoped key is
    //    no longer needed.
    if let Some(session) = existing {
        state
            .db
            .delete_access_keys(request.user_id, request.quiz_id)
            .await?;
        if session.user_id == request.user_id {
            AUTOLOGIN_REDEMPTIONS.with_label_values(&["replayed"]).inc();
            tracing::info!(
                user_id = request.user_id,
                quiz_id = request.quiz_id,
                "Auto-login replay while logged in; redirecting without re-authentication"
            );
            return Ok(RedeemOutcome::AlreadyLoggedIn { redirect_to });
        }
        return Err(AppError::Conflict(session.username));
    }

    // 2. Remote login must be enabled site-wide.
    if !state.config.auth.webservice_login_enabled {
        return Err(AppError::FeatureDisabled);
    }

    // 3. Tokens never travel over plaintext; reject before touching the store.
    if !meta.secure {
        return Err(AppError::InsecureTransport);
    }

    // 4. Admin denial precedes token lookup so an admin-bound key is never
    //    consumed. A missing user is dealt with after validation.
    let claimed_user = state.db.get_user(request.user_id).await?;
    if let Some(user) = &claimed_user {
        policy::deny_admin_autologin(user.site_admin)?;
    }

    // 5. Atomic validate-and-consume; all failure causes look the same.
    let Some(key) = state
        .db
        .validate_and_consume_access_key(
            &request.token,
            request.quiz_id,
            meta.source_ip,
            Utc::now(),
        )
        .await?
    else {
        AUTOLOGIN_REDEMPTIONS
            .with_label_values(&["invalid_token"])
            .inc();
        return Err(AppError::InvalidToken);
    };

    // 6. The key must belong to the claimed user.
    if key.user_id != request.user_id {
        AUTOLOGIN_REDEMPTIONS
            .with_label_values(&["owner_mismatch"])
            .inc();
        return Err(AppError::TokenOwnerMismatch);
    }

    // 7.-8. The owner must still exist and be active.
    let user = claimed_user.ok_or(AppError::UserNotFound)?;
    if !user.is_active() {
        return Err(AppError::InactiveAccount);
    }

    // 9. Full login, minus the credential check.
    let (session, cookie_token) = establish_session(state, &user).await?;

    SESSIONS_ESTABLISHED.inc();
    AUTOLOGIN_REDEMPTIONS.with_label_values(&["success"]).inc();
    tracing::info!(
        user_id = user.id,
        quiz_id = request.quiz_id,
        session_id = %session.session_id,
        "Auto-login session established"
    );

    // 10. The handler turns this into a 303 redirect.
    Ok(RedeemOutcome::LoggedIn {
        session,
        cookie_token,
        redirect_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthConfig, AutologinConfig, DatabaseConfig, LaunchConfig, LoggingConfig, ServerConfig,
    };

    fn test_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "exam.example.com".to_string(),
                protocol: "https".to_string(),
            },
            database: DatabaseConfig {
                path: "/tmp/examgate-test.db".into(),
            },
            auth: AuthConfig {
                session_secret: "x".repeat(32),
                session_max_age: 604_800,
                concurrent_login_limit: 0,
                webservice_login_enabled: true,
            },
            autologin: AutologinConfig {
                issue_ttl_secs: 300,
                launch_ttl_secs: 900,
            },
            launch: LaunchConfig {
                secure_scheme: "sebs".to_string(),
                insecure_scheme: "seb".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn access_tokens_are_random_alphanumeric() {
        let a = generate_access_token();
        let b = generate_access_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn redeem_url_uses_exam_scheme_and_encodes_target() {
        let config = test_config();

        let url = build_redeem_url(
            &config,
            42,
            7,
            "abc123",
            "https://lms.example.com/seb/config?cmid=42",
            true,
        );
        assert!(url.starts_with("sebs://exam.example.com/autologin/redeem?"));
        assert!(url.contains("quiz_id=42"));
        assert!(url.contains("user_id=7"));
        assert!(url.contains("token=abc123"));
        // The forward target survives only URL-encoded.
        assert!(url.contains("urltogo=https%3A%2F%2Flms.example.com%2Fseb%2Fconfig%3Fcmid%3D42"));
    }

    #[test]
    fn redeem_url_scheme_follows_transport_security() {
        let config = test_config();
        let url = build_redeem_url(&config, 1, 1, "t", "https://x.example", false);
        assert!(url.starts_with("seb://"));
    }

    #[test]
    fn call_sites_have_independent_ttls() {
        let config = test_config();
        assert_eq!(CallSite::Issue.ttl_secs(&config), 300);
        assert_eq!(CallSite::Launch.ttl_secs(&config), 900);
    }
}
