//! Common test utilities for E2E tests

use std::net::SocketAddr;

use chrono::{Duration, Utc};
use examgate::auth::Session;
use examgate::data::{AccessKey, EntityId, NewQuiz, NewUser, Quiz, User};
use examgate::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    /// Client with redirects disabled, so 303 responses can be asserted on
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with a tweaked configuration
    pub async fn with_config(tweak: impl FnOnce(&mut config::AppConfig)) -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let mut config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "test.example.com".to_string(),
                protocol: "https".to_string(),
            },
            database: config::DatabaseConfig {
                path: db_path.clone(),
            },
            auth: config::AuthConfig {
                session_secret: "test-secret-key-32-bytes-long!!!".to_string(),
                session_max_age: 604800,
                concurrent_login_limit: 0,
                webservice_login_enabled: true,
            },
            autologin: config::AutologinConfig {
                issue_ttl_secs: 300,
                launch_ttl_secs: 900,
            },
            launch: config::LaunchConfig {
                secure_scheme: "sebs".to_string(),
                insecure_scheme: "seb".to_string(),
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        tweak(&mut config);

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client that surfaces redirects instead of following them
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = examgate::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Create a test user in the database
    pub async fn create_user(&self, username: &str, site_admin: bool) -> User {
        let id = self
            .state
            .db
            .insert_user(&NewUser {
                username: username.to_string(),
                display_name: Some("Test User".to_string()),
                site_admin,
                suspended: false,
                deleted: false,
                confirmed: true,
            })
            .await
            .unwrap();
        self.state.db.get_user(id).await.unwrap().unwrap()
    }

    /// Create a suspended (inactive) test user
    pub async fn create_suspended_user(&self, username: &str) -> User {
        let id = self
            .state
            .db
            .insert_user(&NewUser {
                username: username.to_string(),
                display_name: None,
                site_admin: false,
                suspended: true,
                deleted: false,
                confirmed: true,
            })
            .await
            .unwrap();
        self.state.db.get_user(id).await.unwrap().unwrap()
    }

    /// Create a test quiz
    pub async fn create_quiz(&self, autologin_enabled: bool) -> Quiz {
        let id = self
            .state
            .db
            .insert_quiz(&NewQuiz {
                name: "Final Exam".to_string(),
                autologin_enabled,
                client_config_url: "https://test.example.com/seb/config?cmid=42".to_string(),
            })
            .await
            .unwrap();
        self.state.db.get_quiz(id).await.unwrap().unwrap()
    }

    /// Grant a user view capability on a quiz
    pub async fn enrol(&self, user: &User, quiz: &Quiz) {
        self.state.db.add_enrolment(user.id, quiz.id).await.unwrap();
    }

    /// Establish a session for a user, returning it with its signed token
    pub async fn create_session(&self, user: &User) -> (Session, String) {
        examgate::auth::establish_session(&self.state, user)
            .await
            .unwrap()
    }

    /// Seed an access key directly into the store
    ///
    /// No IP restriction, so it is redeemable from any test client.
    pub async fn seed_key(
        &self,
        user_id: i64,
        quiz_id: i64,
        token: &str,
        expires_in_secs: i64,
    ) -> AccessKey {
        let key = AccessKey {
            id: EntityId::new().0,
            token: token.to_string(),
            user_id,
            quiz_id,
            ip_restriction: None,
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            consumed: false,
            created_at: Utc::now(),
        };
        self.state.db.replace_access_key(&key).await.unwrap();
        key
    }
}

/// Extract the session cookie value from a response's Set-Cookie headers
pub fn extract_session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .find_map(|value| {
            let raw = value.to_str().ok()?;
            let cookie_pair = raw.split(';').next()?;
            let (name, value) = cookie_pair.split_once('=')?;
            (name == "session").then(|| value.to_string())
        })
}

/// Parse a query parameter out of a redirect Location URL
pub fn location_param(location: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(location).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.to_string())
}
