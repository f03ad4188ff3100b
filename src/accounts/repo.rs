use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use tracing::debug;

use super::{
    error::{is_unique_violation, UserError},
    repo_types::{NewUser, PasswordResetRequest, ResetDraft, User},
    store::{UserRewrite, UserStore},
};

const USERNAME_CONSTRAINT: &str = "user_username_key";

/// Postgres-backed [`UserStore`].
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Writes every mutable column of `user` and stamps `updated_at = now`.
/// All user updates go through here.
async fn save_user(
    conn: &mut PgConnection,
    user: &User,
    now: OffsetDateTime,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        UPDATE "user"
           SET username = $2,
               password_hash = $3,
               verified = $4,
               verification_code = $5,
               updated_at = $6
         WHERE id = $1
        RETURNING id, username, password_hash, verified, verification_code, created_at, updated_at
        "#,
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(&user.password_hash)
    .bind(user.verified)
    .bind(&user.verification_code)
    .bind(now)
    .fetch_one(conn)
    .await
}

async fn lock_user_by_id(conn: &mut PgConnection, id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, password_hash, verified, verification_code, created_at, updated_at
        FROM "user"
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert_user(&self, new_user: NewUser) -> Result<User, UserError> {
        let mut tx = self.db.begin().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO "user" (username, password_hash, verified, verification_code, created_at, updated_at)
            VALUES ($1, $2, false, $3, $4, $4)
            RETURNING id, username, password_hash, verified, verification_code, created_at, updated_at
            "#,
        )
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .bind(&new_user.verification_code)
        .bind(new_user.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, USERNAME_CONSTRAINT) {
                UserError::UsernameTaken(new_user.username.clone())
            } else {
                UserError::Database(e)
            }
        })?;
        tx.commit().await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, UserError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, verified, verification_code, created_at, updated_at
            FROM "user"
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, verified, verification_code, created_at, updated_at
            FROM "user"
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn mark_verified(
        &self,
        id: i64,
        verification_code: &str,
        now: OffsetDateTime,
    ) -> Result<u64, UserError> {
        let mut tx = self.db.begin().await?;
        let rows = sqlx::query(
            r#"
            UPDATE "user"
               SET verified = true,
                   updated_at = $3
             WHERE id = $1 AND verification_code = $2
            "#,
        )
        .bind(id)
        .bind(verification_code)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(rows)
    }

    async fn replace_reset_request(
        &self,
        username: &str,
        draft: ResetDraft,
    ) -> Result<Option<(User, PasswordResetRequest)>, UserError> {
        let mut tx = self.db.begin().await?;

        // Row lock serializes concurrent issuance for the same user.
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, verified, verification_code, created_at, updated_at
            FROM "user"
            WHERE username = $1
            FOR UPDATE
            "#,
        )
        .bind(username)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user) = user else {
            return Ok(None);
        };

        let removed = sqlx::query("DELETE FROM password_reset_requests WHERE user_id = $1")
            .bind(user.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let request = draft.for_user(user.id);
        let request = sqlx::query_as::<_, PasswordResetRequest>(
            r#"
            INSERT INTO password_reset_requests (user_id, ip_address, user_agent, token, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING user_id, ip_address, user_agent, token, expires_at
            "#,
        )
        .bind(request.user_id)
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .bind(&request.token)
        .bind(request.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(user_id = user.id, superseded = removed, "reset request stored");
        Ok(Some((user, request)))
    }

    async fn redeem_reset(
        &self,
        user_id: i64,
        token: &str,
        now: OffsetDateTime,
        rewrite: UserRewrite<'_>,
    ) -> Result<bool, UserError> {
        let mut tx = self.db.begin().await?;

        let consumed = sqlx::query_scalar::<_, i64>(
            r#"
            DELETE FROM password_reset_requests
             WHERE user_id = $1 AND token = $2 AND expires_at > $3
            RETURNING user_id
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        if consumed.is_none() {
            return Ok(false);
        }

        let Some(user) = lock_user_by_id(&mut tx, user_id).await? else {
            return Ok(false);
        };
        // An error here drops `tx`, rolling back the delete above.
        let user = rewrite(user)?;
        save_user(&mut tx, &user, now).await?;

        tx.commit().await?;
        Ok(true)
    }
}
