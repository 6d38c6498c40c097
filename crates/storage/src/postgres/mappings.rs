use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use etc_core::{EtcError, Mapping, MappingId, MappingStatus, RecordId, Result};

use super::{map_db_error, persistence, Scope};
use crate::gateway::{MappingFilter, MappingGateway, Transactional};

const MAPPING_COLUMNS: &str = "id, record_id, entity_id, entity_type, mapping_type, confidence, \
     status, metadata, created_by, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct MappingRow {
    id: Uuid,
    record_id: Uuid,
    entity_id: String,
    entity_type: String,
    mapping_type: String,
    confidence: f64,
    status: String,
    metadata: serde_json::Value,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MappingRow> for Mapping {
    type Error = EtcError;

    fn try_from(row: MappingRow) -> Result<Self> {
        let status: MappingStatus = row
            .status
            .parse()
            .map_err(|e| EtcError::Persistence(format!("mapping {}: {e}", row.id)))?;
        Ok(Mapping {
            id: row.id,
            record_id: row.record_id,
            entity_id: row.entity_id,
            entity_type: row.entity_type,
            mapping_type: row.mapping_type,
            confidence: row.confidence,
            status,
            metadata: row.metadata,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn active_conflict(record_id: RecordId) -> impl FnOnce() -> String {
    move || format!("record {record_id} already has an active mapping")
}

fn insert_query(mapping: &Mapping) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        "INSERT INTO etc_mappings (id, record_id, entity_id, entity_type, mapping_type,
             confidence, status, metadata, created_by, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(mapping.id)
    .bind(mapping.record_id)
    .bind(&mapping.entity_id)
    .bind(&mapping.entity_type)
    .bind(&mapping.mapping_type)
    .bind(mapping.confidence)
    .bind(mapping.status.as_str())
    .bind(&mapping.metadata)
    .bind(&mapping.created_by)
    .bind(mapping.created_at)
    .bind(mapping.updated_at)
}

fn update_query(mapping: &Mapping) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        "UPDATE etc_mappings
         SET entity_id = $2, entity_type = $3, mapping_type = $4, confidence = $5,
             status = $6, metadata = $7, updated_at = $8
         WHERE id = $1",
    )
    .bind(mapping.id)
    .bind(&mapping.entity_id)
    .bind(&mapping.entity_type)
    .bind(&mapping.mapping_type)
    .bind(mapping.confidence)
    .bind(mapping.status.as_str())
    .bind(&mapping.metadata)
    .bind(mapping.updated_at)
}

/// [`MappingGateway`] over the `etc_mappings` table.
pub struct PgMappingGateway {
    scope: Scope,
}

impl PgMappingGateway {
    pub fn new(pool: PgPool) -> Self {
        Self {
            scope: Scope::unscoped(pool),
        }
    }
}

#[async_trait]
impl Transactional for PgMappingGateway {
    async fn commit_tx(&self) -> Result<()> {
        self.scope.commit().await
    }

    async fn rollback_tx(&self) -> Result<()> {
        self.scope.rollback().await
    }
}

#[async_trait]
impl MappingGateway for PgMappingGateway {
    async fn create(&self, mapping: &Mapping) -> Result<()> {
        self.scope
            .execute_isolated(insert_query(mapping), |e| {
                map_db_error(e, active_conflict(mapping.record_id))
            })
            .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: MappingId) -> Result<Option<Mapping>> {
        let sql = format!("SELECT {MAPPING_COLUMNS} FROM etc_mappings WHERE id = $1");
        let row = exec!(
            self.scope,
            sqlx::query_as::<_, MappingRow>(&sql).bind(id),
            fetch_optional
        )
        .map_err(persistence)?;
        row.map(Mapping::try_from).transpose()
    }

    async fn get_active_mapping(&self, record_id: RecordId) -> Result<Option<Mapping>> {
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM etc_mappings WHERE record_id = $1 AND status = 'active'"
        );
        let row = exec!(
            self.scope,
            sqlx::query_as::<_, MappingRow>(&sql).bind(record_id),
            fetch_optional
        )
        .map_err(persistence)?;
        row.map(Mapping::try_from).transpose()
    }

    async fn update(&self, mapping: &Mapping) -> Result<()> {
        let result = self
            .scope
            .execute_isolated(update_query(mapping), |e| {
                map_db_error(e, active_conflict(mapping.record_id))
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(EtcError::not_found("mapping", mapping.id));
        }
        Ok(())
    }

    async fn delete(&self, id: MappingId) -> Result<()> {
        let result = exec!(
            self.scope,
            sqlx::query("DELETE FROM etc_mappings WHERE id = $1").bind(id),
            execute
        )
        .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(EtcError::not_found("mapping", id));
        }
        Ok(())
    }

    async fn list(&self, filter: &MappingFilter) -> Result<Vec<Mapping>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {MAPPING_COLUMNS} FROM etc_mappings WHERE 1=1"
        ));
        if let Some(record_id) = filter.record_id {
            builder.push(" AND record_id = ").push_bind(record_id);
        }
        if let Some(v) = &filter.entity_id {
            builder.push(" AND entity_id = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.entity_type {
            builder.push(" AND entity_type = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.mapping_type {
            builder.push(" AND mapping_type = ").push_bind(v.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(filter.page_size()))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.page_offset()));

        let rows = exec!(self.scope, builder.build_query_as::<MappingRow>(), fetch_all)
            .map_err(persistence)?;
        rows.into_iter().map(Mapping::try_from).collect()
    }

    async fn ping(&self) -> Result<()> {
        exec!(self.scope, sqlx::query("SELECT 1"), execute).map_err(persistence)?;
        Ok(())
    }

    async fn begin_tx(&self) -> Result<Arc<dyn MappingGateway>> {
        Ok(Arc::new(Self {
            scope: self.scope.begin().await?,
        }))
    }
}
