// Registration, login and API key issuance against Postgres

mod common;

use serial_test::serial;
use weather_harvest_service::db::UserRepository;
use weather_harvest_service::services::{AuthError, AuthService, Registration};

fn registration(name: &str, email: &str, password: &str) -> Registration {
    Registration {
        name: name.to_string(),
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
#[serial]
async fn test_register_stores_hashed_password() {
    let pool = common::test_pool().await;
    common::delete_user(pool, "auth_test_ana").await;
    let service = AuthService::new(UserRepository::new(pool.clone()));

    let user = service
        .register(registration("auth_test_ana", "ana@example.com", "s3nha-forte"))
        .await
        .expect("registration should succeed");

    assert_eq!(user.name, "auth_test_ana");
    assert_ne!(user.password_hash, "s3nha-forte");
    assert!(bcrypt::verify("s3nha-forte", &user.password_hash).unwrap());
    assert!(user.api_key.is_none());

    common::delete_user(pool, "auth_test_ana").await;
}

#[tokio::test]
#[serial]
async fn test_register_rejects_duplicates_and_blanks() {
    let pool = common::test_pool().await;
    common::delete_user(pool, "auth_test_bruno").await;
    let service = AuthService::new(UserRepository::new(pool.clone()));

    service
        .register(registration("auth_test_bruno", "bruno@example.com", "abc123"))
        .await
        .unwrap();

    let duplicate_name = service
        .register(registration("auth_test_bruno", "other@example.com", "abc123"))
        .await;
    assert!(matches!(duplicate_name, Err(AuthError::AlreadyRegistered)));

    let duplicate_email = service
        .register(registration("auth_test_other", "bruno@example.com", "abc123"))
        .await;
    assert!(matches!(duplicate_email, Err(AuthError::AlreadyRegistered)));

    let blank = service
        .register(registration("auth_test_blank", "  ", "abc123"))
        .await;
    assert!(matches!(blank, Err(AuthError::MissingField)));

    common::delete_user(pool, "auth_test_bruno").await;
}

#[tokio::test]
#[serial]
async fn test_login_issues_key_once() {
    let pool = common::test_pool().await;
    common::delete_user(pool, "auth_test_carla").await;
    let service = AuthService::new(UserRepository::new(pool.clone()));

    service
        .register(registration("auth_test_carla", "carla@example.com", "chuva123"))
        .await
        .unwrap();

    let first = service.login("auth_test_carla", "chuva123").await.unwrap();
    let second = service.login("auth_test_carla", "chuva123").await.unwrap();
    assert_eq!(first, second);
    assert!(uuid::Uuid::parse_str(&first).is_ok());

    let owner = service.authenticate_key(&first).await.unwrap();
    assert_eq!(owner.map(|u| u.name), Some("auth_test_carla".to_string()));
    assert!(service.authenticate_key("not-a-key").await.unwrap().is_none());

    common::delete_user(pool, "auth_test_carla").await;
}

#[tokio::test]
#[serial]
async fn test_login_rejects_bad_credentials() {
    let pool = common::test_pool().await;
    common::delete_user(pool, "auth_test_davi").await;
    let service = AuthService::new(UserRepository::new(pool.clone()));

    service
        .register(registration("auth_test_davi", "davi@example.com", "correta"))
        .await
        .unwrap();

    let wrong_password = service.login("auth_test_davi", "errada").await;
    assert!(matches!(wrong_password, Err(AuthError::InvalidCredentials)));

    let unknown_user = service.login("auth_test_nobody", "correta").await;
    assert!(matches!(unknown_user, Err(AuthError::InvalidCredentials)));

    common::delete_user(pool, "auth_test_davi").await;
}
