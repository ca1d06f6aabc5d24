//! PostgreSQL-backed event store.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::instrument;

use super::{
    ApplicationEntry, ApplicationStatus, EventId, EventRef, EventSnapshot, EventStatus, EventStore,
    EventType, ForeignRef, ParticipantStatus,
};
use crate::config::DatabaseConfig;
use crate::error::{GatekeeperError, Result};

/// Reads events and their memberships with `sqlx`.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| GatekeeperError::configuration("database.url is not set"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;

        Ok(Self::new(pool))
    }

    async fn find_row(&self, event_ref: &EventRef) -> Result<Option<EventRow>> {
        let row = match event_ref {
            EventRef::Id(id) => {
                sqlx::query_as::<_, EventRow>(
                    r#"
                    SELECT id::bigint AS id, url, name, status, deleted, application_status, type
                    FROM events
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
            EventRef::Slug(slug) => {
                sqlx::query_as::<_, EventRow>(
                    r#"
                    SELECT id::bigint AS id, url, name, status, deleted, application_status, type
                    FROM events
                    WHERE lower(url) = $1
                    "#,
                )
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row)
    }

    async fn foreign_refs(&self, query: &'static str, event_id: EventId) -> Result<Vec<ForeignRef>> {
        let ids: Vec<(String,)> = sqlx::query_as(query)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.into_iter().map(|(id,)| ForeignRef::new(id)).collect())
    }

    async fn applications(&self, event_id: EventId) -> Result<Vec<ApplicationEntry>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT user_id::text, status::text
            FROM applications
            WHERE event_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(user_id, status)| {
                let status = ParticipantStatus::parse(&status).ok_or_else(|| {
                    GatekeeperError::persistence(format!("unknown participant status `{}`", status))
                })?;
                Ok(ApplicationEntry::new(user_id, status))
            })
            .collect()
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self), fields(event_ref = %event_ref))]
    async fn find(&self, event_ref: &EventRef) -> Result<Option<EventSnapshot>> {
        let Some(row) = self.find_row(event_ref).await? else {
            return Ok(None);
        };

        let organizers = self
            .foreign_refs(
                "SELECT user_id::text FROM event_organizers WHERE event_id = $1 ORDER BY id",
                row.id,
            )
            .await?;
        let organizing_locals = self
            .foreign_refs(
                "SELECT body_id::text FROM event_organizing_locals WHERE event_id = $1 ORDER BY id",
                row.id,
            )
            .await?;
        let applications = self.applications(row.id).await?;

        row.into_snapshot(organizers, organizing_locals, applications)
            .map(Some)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: EventId,
    url: String,
    name: String,
    status: String,
    deleted: bool,
    application_status: String,
    #[sqlx(rename = "type")]
    event_type: String,
}

impl EventRow {
    fn into_snapshot(
        self,
        organizers: Vec<ForeignRef>,
        organizing_locals: Vec<ForeignRef>,
        applications: Vec<ApplicationEntry>,
    ) -> Result<EventSnapshot> {
        let status = EventStatus::parse(&self.status).ok_or_else(|| {
            GatekeeperError::persistence(format!("unknown event status `{}`", self.status))
        })?;
        let application_status = ApplicationStatus::parse(&self.application_status)
            .ok_or_else(|| {
                GatekeeperError::persistence(format!(
                    "unknown application status `{}`",
                    self.application_status
                ))
            })?;

        Ok(EventSnapshot {
            id: self.id,
            slug: self.url.to_lowercase(),
            name: self.name,
            status,
            deleted: self.deleted,
            application_status,
            event_type: EventType::from(self.event_type),
            organizers,
            organizing_locals,
            applications,
        })
    }
}
