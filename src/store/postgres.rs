use super::{DurableStore, StoreError, StoreResult};
use crate::model::{AccessPerms, DomainScope, Group, Partition, Session, now_epoch_string};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use tracing::{Instrument, info_span};

const SESSION_COLUMNS: &str = "session_id, owner, identity_token, previous_identity_token, \
    access_token, refresh_token, token_type, expires_at, created_epoch, expiry_epoch, \
    refresh_count, is_revoked, details";

/// PostgreSQL-backed store. Tables are defined in `sql/schema.sql`.
///
/// `expires_at` comparisons use the "C" collation so the database orders
/// digits the same way the cache does.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_sessions(
        &self,
        query: &str,
        binds: &[&str],
        operation: &'static str,
    ) -> StoreResult<Vec<Session>> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.statement = query
        );
        let mut q = sqlx::query(query);
        for bind in binds {
            q = q.bind(*bind);
        }
        let rows = q.fetch_all(&self.pool).instrument(span).await?;
        rows.iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    Ok(Session {
        session_id: row.try_get("session_id")?,
        owner: row.try_get("owner")?,
        identity_token: row.try_get("identity_token")?,
        previous_identity_token: row.try_get("previous_identity_token")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        token_type: row.try_get("token_type")?,
        expires_at: row.try_get("expires_at")?,
        created_epoch: row.try_get("created_epoch")?,
        expiry_epoch: row.try_get("expiry_epoch")?,
        refresh_count: row.try_get("refresh_count")?,
        is_revoked: row.try_get("is_revoked")?,
        details: row.try_get("details")?,
    })
}

fn group_from_row(row: &PgRow) -> StoreResult<Group> {
    let members: Vec<String> = row.try_get("members")?;
    let Json(access_perms): Json<AccessPerms> = row
        .try_get("access_perms")
        .map_err(|e| StoreError::Decode(format!("access_perms: {e}")))?;
    Ok(Group {
        name: row.try_get("name")?,
        members: members.into_iter().collect(),
        access_perms,
        domain_scope: DomainScope {
            root: row.try_get("domain_root")?,
            info: row.try_get("domain_info")?,
        },
    })
}

#[async_trait]
impl DurableStore for PgStore {
    async fn get_partition(&self, partition: Partition) -> StoreResult<Vec<Session>> {
        let now = now_epoch_string();
        let filter = match partition {
            Partition::All => "TRUE",
            Partition::Active => "NOT is_revoked AND expires_at COLLATE \"C\" > $1",
            Partition::Expired => "NOT is_revoked AND expires_at COLLATE \"C\" <= $1",
            Partition::Revoked => "is_revoked",
        };
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE {filter} ORDER BY created_epoch, session_id"
        );
        let binds: &[&str] = match partition {
            Partition::Active | Partition::Expired => &[now.as_str()],
            Partition::All | Partition::Revoked => &[],
        };
        self.fetch_sessions(&query, binds, "SELECT").await
    }

    async fn get_session_by_token(&self, token: &str) -> StoreResult<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE identity_token = $1");
        Ok(self
            .fetch_sessions(&query, &[token], "SELECT")
            .await?
            .into_iter()
            .next())
    }

    async fn get_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> StoreResult<Option<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token = $1 AND NOT is_revoked"
        );
        Ok(self
            .fetch_sessions(&query, &[refresh_token], "SELECT")
            .await?
            .into_iter()
            .next())
    }

    async fn get_sessions_by_owner(&self, owner: &str) -> StoreResult<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE owner = $1 ORDER BY created_epoch, session_id"
        );
        self.fetch_sessions(&query, &[owner], "SELECT").await
    }

    async fn put_session(&self, session: &Session) -> StoreResult<()> {
        let query = r"
            INSERT INTO sessions
                (session_id, owner, identity_token, previous_identity_token, access_token,
                 refresh_token, token_type, expires_at, created_epoch, expiry_epoch,
                 refresh_count, is_revoked, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (session_id) DO UPDATE SET
                owner = EXCLUDED.owner,
                identity_token = EXCLUDED.identity_token,
                previous_identity_token = EXCLUDED.previous_identity_token,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                token_type = EXCLUDED.token_type,
                expires_at = EXCLUDED.expires_at,
                created_epoch = EXCLUDED.created_epoch,
                expiry_epoch = EXCLUDED.expiry_epoch,
                refresh_count = EXCLUDED.refresh_count,
                is_revoked = EXCLUDED.is_revoked,
                details = EXCLUDED.details
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT"
        );
        sqlx::query(query)
            .bind(&session.session_id)
            .bind(&session.owner)
            .bind(&session.identity_token)
            .bind(&session.previous_identity_token)
            .bind(&session.access_token)
            .bind(&session.refresh_token)
            .bind(&session.token_type)
            .bind(&session.expires_at)
            .bind(session.created_epoch)
            .bind(session.expiry_epoch)
            .bind(session.refresh_count)
            .bind(session.is_revoked)
            .bind(&session.details)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str, created_epoch: i64) -> StoreResult<()> {
        let query = "DELETE FROM sessions WHERE session_id = $1 AND created_epoch = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_id)
            .bind(created_epoch)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn revoke_sessions_of(&self, owner: &str) -> StoreResult<u64> {
        let query = "UPDATE sessions SET is_revoked = TRUE WHERE owner = $1 AND NOT is_revoked";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(owner)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_groups_containing(&self, email: &str) -> StoreResult<Vec<Group>> {
        let query = r"
            SELECT name, members, access_perms, domain_root, domain_info
            FROM ticket_groups
            WHERE $1 = ANY(members)
            ORDER BY name
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(query)
            .bind(email)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn is_banned(&self, email: &str) -> StoreResult<bool> {
        let query = "SELECT EXISTS(SELECT 1 FROM banned_users WHERE user_email = $1) AS banned";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.try_get("banned")?)
    }

    async fn ping(&self) -> StoreResult<()> {
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}
