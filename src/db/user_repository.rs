use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::db::{DbError, User};

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new user; name and email are unique
    #[instrument(skip(self, password_hash))]
    pub async fn create(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, DbError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash, api_key, created_at
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;

        info!("Created user {} (id={})", user.name, user.id);
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn find_by_name(&self, name: &str) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, api_key, created_at
            FROM users
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self, api_key))]
    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, api_key, created_at
            FROM users
            WHERE api_key = $1
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Store a key only if the user does not have one yet. Returns the key the
    /// user ends up with, which is the existing one if a concurrent login won.
    #[instrument(skip(self, api_key))]
    pub async fn assign_api_key(&self, user_id: i64, api_key: &str) -> Result<String, DbError> {
        let stored = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE users
            SET api_key = COALESCE(api_key, $2)
            WHERE id = $1
            RETURNING api_key
            "#,
        )
        .bind(user_id)
        .bind(api_key)
        .fetch_one(&self.pool)
        .await?;

        debug!("API key assigned for user {}", user_id);
        Ok(stored)
    }
}
