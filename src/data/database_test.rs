//! Database tests

use super::*;
use chrono::{Duration, Utc};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn test_user(username: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        display_name: Some("Test User".to_string()),
        site_admin: false,
        suspended: false,
        deleted: false,
        confirmed: true,
    }
}

fn test_key(user_id: i64, quiz_id: i64, token: &str) -> AccessKey {
    AccessKey {
        id: EntityId::new().0,
        token: token.to_string(),
        user_id,
        quiz_id,
        ip_restriction: Some("10.0.0.5".to_string()),
        expires_at: Utc::now() + Duration::seconds(300),
        consumed: false,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_user_insert_and_get() {
    let (db, _temp_dir) = create_test_db().await;

    let id = db.insert_user(&test_user("alice")).await.unwrap();
    let user = db.get_user(id).await.unwrap().unwrap();

    assert_eq!(user.username, "alice");
    assert!(user.is_active());
    assert!(!user.site_admin);
    assert!(db.get_user(id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_quiz_insert_and_autologin_flag() {
    let (db, _temp_dir) = create_test_db().await;

    let id = db
        .insert_quiz(&NewQuiz {
            name: "Final Exam".to_string(),
            autologin_enabled: false,
            client_config_url: "https://lms.example.com/seb/config/1".to_string(),
        })
        .await
        .unwrap();

    let quiz = db.get_quiz(id).await.unwrap().unwrap();
    assert!(!quiz.autologin_enabled);

    db.set_quiz_autologin(id, true).await.unwrap();
    let quiz = db.get_quiz(id).await.unwrap().unwrap();
    assert!(quiz.autologin_enabled);
}

#[tokio::test]
async fn test_enrolment_grants_view() {
    let (db, _temp_dir) = create_test_db().await;

    let user_id = db.insert_user(&test_user("alice")).await.unwrap();
    assert!(!db.is_enrolled(user_id, 1).await.unwrap());

    db.add_enrolment(user_id, 1).await.unwrap();
    // Re-enrolment is a no-op.
    db.add_enrolment(user_id, 1).await.unwrap();
    assert!(db.is_enrolled(user_id, 1).await.unwrap());
}

#[tokio::test]
async fn test_replace_access_key_invalidates_prior_key() {
    let (db, _temp_dir) = create_test_db().await;
    let source_ip = "10.0.0.5".parse().unwrap();

    let first = test_key(7, 42, "firsttoken00000000000000000000aa");
    db.replace_access_key(&first).await.unwrap();

    let second = test_key(7, 42, "secondtoken0000000000000000000bb");
    db.replace_access_key(&second).await.unwrap();

    // The first key is gone; only the second is redeemable.
    let gone = db
        .validate_and_consume_access_key(&first.token, 42, source_ip, Utc::now())
        .await
        .unwrap();
    assert!(gone.is_none());

    let consumed = db
        .validate_and_consume_access_key(&second.token, 42, source_ip, Utc::now())
        .await
        .unwrap();
    assert_eq!(consumed.unwrap().id, second.id);
}

#[tokio::test]
async fn test_validate_and_consume_is_single_use() {
    let (db, _temp_dir) = create_test_db().await;
    let source_ip = "10.0.0.5".parse().unwrap();

    let key = test_key(7, 42, "abcdefghijklmnopqrstuvwxyz012345");
    db.replace_access_key(&key).await.unwrap();

    let first = db
        .validate_and_consume_access_key(&key.token, 42, source_ip, Utc::now())
        .await
        .unwrap();
    assert!(first.is_some());

    let second = db
        .validate_and_consume_access_key(&key.token, 42, source_ip, Utc::now())
        .await
        .unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn test_validate_and_consume_rejects_expired_key_and_purges_it() {
    let (db, _temp_dir) = create_test_db().await;
    let source_ip = "10.0.0.5".parse().unwrap();

    let mut key = test_key(7, 42, "expiredtoken00000000000000000000");
    key.expires_at = Utc::now() - Duration::seconds(1);
    db.replace_access_key(&key).await.unwrap();

    let result = db
        .validate_and_consume_access_key(&key.token, 42, source_ip, Utc::now())
        .await
        .unwrap();
    assert!(result.is_none());

    // The expired row was purged, so nothing is left to garbage-collect.
    assert_eq!(db.purge_expired_access_keys(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_validate_and_consume_rejects_wrong_quiz_and_wrong_ip() {
    let (db, _temp_dir) = create_test_db().await;

    let key = test_key(7, 42, "scopedtoken000000000000000000000");
    db.replace_access_key(&key).await.unwrap();

    let wrong_quiz = db
        .validate_and_consume_access_key(&key.token, 43, "10.0.0.5".parse().unwrap(), Utc::now())
        .await
        .unwrap();
    assert!(wrong_quiz.is_none());

    let wrong_ip = db
        .validate_and_consume_access_key(&key.token, 42, "10.0.0.9".parse().unwrap(), Utc::now())
        .await
        .unwrap();
    assert!(wrong_ip.is_none());

    // Neither failed attempt consumed the key.
    let good = db
        .validate_and_consume_access_key(&key.token, 42, "10.0.0.5".parse().unwrap(), Utc::now())
        .await
        .unwrap();
    assert!(good.is_some());
}

#[tokio::test]
async fn test_concurrent_login_limit_keeps_newest_sessions() {
    let (db, _temp_dir) = create_test_db().await;
    let user_id = db.insert_user(&test_user("alice")).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..3 {
        let session = SessionRecord {
            id: EntityId::new().0,
            user_id,
            created_at: Utc::now() + Duration::milliseconds(i),
        };
        db.insert_session(&session).await.unwrap();
        ids.push(session.id);
    }

    let dropped = db.apply_concurrent_login_limit(user_id, 1).await.unwrap();
    assert_eq!(dropped, 2);

    assert!(db.get_session(&ids[0]).await.unwrap().is_none());
    assert!(db.get_session(&ids[1]).await.unwrap().is_none());
    assert!(db.get_session(&ids[2]).await.unwrap().is_some());

    // Limit 0 means unlimited.
    assert_eq!(db.apply_concurrent_login_limit(user_id, 0).await.unwrap(), 0);
}
