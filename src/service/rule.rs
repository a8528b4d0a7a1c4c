//! Auto-login access rule
//!
//! Decides whether a quiz offers the auto-login launch link, and produces
//! the link itself. The host view page substitutes `launch_url` for the
//! direct client-config link (`replaces_url`) and disables it after the
//! first click; both of those are presentation concerns outside this core.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::autologin::{self, CallSite};
use crate::AppState;
use crate::auth::{ClientMeta, Session, policy};
use crate::data::Quiz;
use crate::error::AppError;

/// The auto-login rule for one quiz
///
/// Exists only for quizzes with the flag enabled; eligibility is a pure
/// function of quiz configuration.
#[derive(Debug)]
pub struct AutologinRule<'a> {
    quiz: &'a Quiz,
}

impl<'a> AutologinRule<'a> {
    /// Return the rule if it applies to the given quiz, otherwise None
    pub fn make(quiz: &'a Quiz) -> Option<Self> {
        if !quiz.autologin_enabled {
            return None;
        }
        Some(Self { quiz })
    }

    /// Produce the launch link for the current viewer
    ///
    /// Pre-issues a key at the launch-site TTL. Admins never get a launch
    /// link; the shared denial policy applies here just as on the
    /// endpoints.
    pub async fn launch_link(
        &self,
        state: &AppState,
        session: &Session,
        meta: ClientMeta,
    ) -> Result<LaunchLink, AppError> {
        policy::deny_admin_autologin(session.site_admin)?;
        policy::require_quiz_view(state, session.user_id, self.quiz.id).await?;

        let key = autologin::issue_key(
            state,
            session.user_id,
            self.quiz.id,
            meta.source_ip,
            CallSite::Launch,
        )
        .await?;

        let launch_url = autologin::build_redeem_url(
            &state.config,
            self.quiz.id,
            session.user_id,
            &key.token,
            &self.quiz.client_config_url,
            meta.secure,
        );

        Ok(LaunchLink {
            launch_url,
            replaces_url: self.quiz.client_config_url.clone(),
            expires_at: key.expires_at,
        })
    }
}

/// Launch link surfaced on the quiz view page
#[derive(Debug, Serialize)]
pub struct LaunchLink {
    /// Exam-scheme redeem URL carrying a pre-issued key
    pub launch_url: String,
    /// The direct client-config link this one replaces
    pub replaces_url: String,
    pub expires_at: DateTime<Utc>,
}
