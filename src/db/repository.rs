//! Session repository.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::backend::AuthUser;
use crate::errors::AppError;
use crate::session::{FlowStep, ReauthState, SessionContext};

/// Storage for flow sessions.
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a session.
    pub async fn save(&self, session: &SessionContext) -> Result<(), AppError> {
        let (reauthenticated, reauth_at) = match session.reauth {
            ReauthState::Unverified => (false, None),
            ReauthState::Verified { at } => (true, Some(format_time(at))),
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (token, uid, email, id_token, step, reauthenticated, reauth_at, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(token) DO UPDATE SET
                uid = excluded.uid,
                email = excluded.email,
                id_token = excluded.id_token,
                step = excluded.step,
                reauthenticated = excluded.reauthenticated,
                reauth_at = excluded.reauth_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&session.token)
        .bind(&session.user.uid)
        .bind(&session.user.email)
        .bind(&session.user.id_token)
        .bind(session.step.as_str())
        .bind(reauthenticated)
        .bind(reauth_at)
        .bind(format_time(session.created_at))
        .bind(format_time(session.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a live session. Expired sessions are removed and reported as
    /// absent.
    pub async fn get(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionContext>, AppError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let session = row_to_session(&row)?;
        if session.is_expired(now) {
            self.delete(token).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub async fn delete(&self, token: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every session of an account.
    pub async fn delete_for_uid(&self, uid: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remove sessions that expired before `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(format_time(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Fixed-width UTC timestamps so that stored values compare as strings.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Database(format!("Invalid timestamp {}: {}", value, e)))
}

fn row_to_session(row: &SqliteRow) -> Result<SessionContext, AppError> {
    let step: String = row.get("step");
    let step = FlowStep::parse(&step)
        .ok_or_else(|| AppError::Database(format!("Invalid session step: {}", step)))?;

    let reauthenticated: bool = row.get("reauthenticated");
    let reauth_at: Option<String> = row.get("reauth_at");
    let reauth = match (reauthenticated, reauth_at) {
        (true, Some(at)) => ReauthState::Verified {
            at: parse_time(&at)?,
        },
        _ => ReauthState::Unverified,
    };

    let created_at: String = row.get("created_at");
    let expires_at: String = row.get("expires_at");

    Ok(SessionContext {
        token: row.get("token"),
        user: AuthUser {
            uid: row.get("uid"),
            email: row.get("email"),
            id_token: row.get("id_token"),
        },
        step,
        reauth,
        created_at: parse_time(&created_at)?,
        expires_at: parse_time(&expires_at)?,
    })
}
