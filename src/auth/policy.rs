//! Access policies shared by the issuer and redeemer
//!
//! Both endpoints enforce the same admin denial; keeping it in one place
//! means one rule with one message.

use crate::AppState;
use crate::error::AppError;

/// Deny auto-login for administrative identities
///
/// Administrators are categorically excluded from the token exchange so a
/// relayed token can never establish an elevated session. Applied to the
/// issuing user, the claimed redeeming user, and the launch-link surface.
pub fn deny_admin_autologin(site_admin: bool) -> Result<(), AppError> {
    if site_admin {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Require that a user may view a quiz
///
/// View capability is granted by enrolment.
pub async fn require_quiz_view(
    state: &AppState,
    user_id: i64,
    quiz_id: i64,
) -> Result<(), AppError> {
    if !state.db.is_enrolled(user_id, quiz_id).await? {
        return Err(AppError::PermissionDenied);
    }
    Ok(())
}

/// Check a request's CSRF key against the session's
///
/// The issuer mutates token state on a GET, so it demands the session
/// `sesskey` like any state-changing request.
pub fn confirm_sesskey(session_sesskey: &str, provided: &str) -> Result<(), AppError> {
    if session_sesskey != provided {
        return Err(AppError::PermissionDenied);
    }
    Ok(())
}
