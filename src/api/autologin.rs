//! Auto-login endpoints
//!
//! The issuer and launch endpoints require an authenticated session; the
//! redeem endpoint is deliberately reachable without one (that is its
//! purpose). All redirects are 303 See Other: 302 behaves ambiguously on
//! POST redirection across exam-client implementations, 303 forces a GET.

use axum::{
    Router,
    extract::{Query, State},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;

use crate::AppState;
use crate::auth::{ClientMeta, CurrentUser, MaybeUser, policy};
use crate::error::AppError;
use crate::service::autologin::{self, CallSite, RedeemOutcome, RedeemRequest};
use crate::service::rule::{AutologinRule, LaunchLink};

/// Create auto-login router
///
/// Routes:
/// - GET /issue - mint a key and redirect into the exam client
/// - GET /redeem - consume a key and establish a session
/// - GET /launch - launch link for the quiz view page
pub fn autologin_router() -> Router<AppState> {
    Router::new()
        .route("/issue", get(issue))
        .route("/redeem", get(redeem))
        .route("/launch", get(launch))
}

/// Tokens are plain alphanumeric; anything else is rejected without a
/// store lookup, with the same error as any other invalid token.
fn is_token_shaped(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric())
}

fn build_session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build(("session", token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Query parameters for the issue endpoint
#[derive(Debug, Deserialize)]
pub struct IssueParams {
    pub quiz_id: i64,
    /// Per-session CSRF key; issuing mutates token state
    pub sesskey: String,
}

/// GET /autologin/issue
///
/// Mints a single-use key for the current user and quiz, bound to the
/// caller's IP, and answers 303 with the exam-scheme redeem URL so the
/// exam client takes over.
///
/// # Errors
/// Unauthenticated without a session; NotFound for an unknown quiz;
/// PermissionDenied without view capability or with a bad sesskey;
/// Forbidden for administrators.
async fn issue(
    State(state): State<AppState>,
    meta: ClientMeta,
    CurrentUser(session): CurrentUser,
    Query(params): Query<IssueParams>,
) -> Result<Response, AppError> {
    let quiz = state
        .db
        .get_quiz(params.quiz_id)
        .await?
        .ok_or(AppError::NotFound)?;
    policy::require_quiz_view(&state, session.user_id, quiz.id).await?;
    policy::confirm_sesskey(&session.sesskey, &params.sesskey)?;
    policy::deny_admin_autologin(session.site_admin)?;

    let key = autologin::issue_key(
        &state,
        session.user_id,
        quiz.id,
        meta.source_ip,
        CallSite::Issue,
    )
    .await?;

    let location = autologin::build_redeem_url(
        &state.config,
        quiz.id,
        session.user_id,
        &key.token,
        &quiz.client_config_url,
        meta.secure,
    );

    Ok(Redirect::to(&location).into_response())
}

/// Query parameters for the redeem endpoint
#[derive(Debug, Deserialize)]
pub struct RedeemParams {
    pub quiz_id: i64,
    pub user_id: i64,
    pub token: String,
    /// Forward target after login; defaults to the site root
    pub urltogo: Option<String>,
}

/// GET /autologin/redeem
///
/// Unauthenticated endpoint: validates and atomically consumes the key,
/// establishes a session for its owner and answers 303 to `urltogo` with
/// the session cookie set. A caller already logged in as the claimed user
/// is redirected without re-authentication.
async fn redeem(
    State(state): State<AppState>,
    meta: ClientMeta,
    MaybeUser(existing): MaybeUser,
    Query(params): Query<RedeemParams>,
) -> Result<Response, AppError> {
    if !is_token_shaped(&params.token) {
        return Err(AppError::InvalidToken);
    }

    let outcome = autologin::redeem(
        &state,
        RedeemRequest {
            quiz_id: params.quiz_id,
            user_id: params.user_id,
            token: params.token,
            urltogo: params.urltogo,
        },
        meta,
        existing,
    )
    .await?;

    match outcome {
        RedeemOutcome::AlreadyLoggedIn { redirect_to } => {
            Ok(Redirect::to(&redirect_to).into_response())
        }
        RedeemOutcome::LoggedIn {
            cookie_token,
            redirect_to,
            ..
        } => {
            let jar = CookieJar::new().add(build_session_cookie(
                cookie_token,
                state.config.should_use_secure_cookies(),
            ));
            Ok((jar, Redirect::to(&redirect_to)).into_response())
        }
    }
}

/// Query parameters for the launch endpoint
#[derive(Debug, Deserialize)]
pub struct LaunchParams {
    pub quiz_id: i64,
}

/// GET /autologin/launch
///
/// Returns the launch link the quiz view page embeds in place of the
/// direct client-config link, with a pre-issued key at the launch TTL.
/// 404 when the quiz doesn't exist or auto-login is not enabled for it.
async fn launch(
    State(state): State<AppState>,
    meta: ClientMeta,
    CurrentUser(session): CurrentUser,
    Query(params): Query<LaunchParams>,
) -> Result<Json<LaunchLink>, AppError> {
    let quiz = state
        .db
        .get_quiz(params.quiz_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let rule = AutologinRule::make(&quiz).ok_or(AppError::NotFound)?;

    let link = rule.launch_link(&state, &session, meta).await?;
    Ok(Json(link))
}
