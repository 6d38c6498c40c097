use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use etc_core::{EtcError, EtcRecord, RecordId, Result, TollFields};

use super::{map_db_error, persistence, Scope};
use crate::gateway::{RecordFilter, RecordGateway, RecordPage, Transactional};

const RECORD_COLUMNS: &str = "id, date, time, entrance_ic, exit_ic, toll_amount, car_number, \
     etc_card_number, device_id, source_row_id, created_at, updated_at, deleted_at";

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    date: NaiveDate,
    time: String,
    entrance_ic: String,
    exit_ic: String,
    toll_amount: i64,
    car_number: String,
    etc_card_number: String,
    device_id: Option<String>,
    source_row_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<RecordRow> for EtcRecord {
    fn from(row: RecordRow) -> Self {
        let fields = TollFields {
            date: row.date,
            time: row.time,
            entrance_ic: row.entrance_ic,
            exit_ic: row.exit_ic,
            toll_amount: row.toll_amount,
            car_number: row.car_number,
            etc_card_number: row.etc_card_number,
            device_id: row.device_id,
        };
        EtcRecord::restore(
            row.id,
            fields,
            row.source_row_id,
            row.created_at,
            row.updated_at,
            row.deleted_at,
        )
    }
}

/// [`RecordGateway`] over the `etc_records` table.
pub struct PgRecordGateway {
    scope: Scope,
}

impl PgRecordGateway {
    pub fn new(pool: PgPool) -> Self {
        Self {
            scope: Scope::unscoped(pool),
        }
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
    builder.push(" WHERE 1=1");
    if !filter.include_deleted {
        builder.push(" AND deleted_at IS NULL");
    }
    if let Some(from) = filter.date_from {
        builder.push(" AND date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        builder.push(" AND date <= ").push_bind(to);
    }
    if let Some(v) = &filter.car_number {
        builder.push(" AND car_number = ").push_bind(v.clone());
    }
    if let Some(v) = &filter.etc_card_number {
        builder.push(" AND etc_card_number = ").push_bind(v.clone());
    }
    if let Some(v) = &filter.entrance_ic {
        builder.push(" AND entrance_ic = ").push_bind(v.clone());
    }
    if let Some(v) = &filter.exit_ic {
        builder.push(" AND exit_ic = ").push_bind(v.clone());
    }
}

fn duplicate_of(record: &EtcRecord) -> impl FnOnce() -> String + '_ {
    move || format!("record with fingerprint {} already exists", record.fingerprint())
}

fn insert_query(record: &EtcRecord) -> Query<'_, Postgres, PgArguments> {
    let f = record.fields();
    sqlx::query(
        "INSERT INTO etc_records (id, date, time, entrance_ic, exit_ic, toll_amount,
             car_number, etc_card_number, device_id, source_row_id, fingerprint,
             created_at, updated_at, deleted_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(record.id)
    .bind(f.date)
    .bind(&f.time)
    .bind(&f.entrance_ic)
    .bind(&f.exit_ic)
    .bind(f.toll_amount)
    .bind(&f.car_number)
    .bind(&f.etc_card_number)
    .bind(&f.device_id)
    .bind(&record.source_row_id)
    .bind(record.fingerprint())
    .bind(record.created_at)
    .bind(record.updated_at)
    .bind(record.deleted_at)
}

fn update_query(record: &EtcRecord) -> Query<'_, Postgres, PgArguments> {
    let f = record.fields();
    sqlx::query(
        "UPDATE etc_records
         SET date = $2, time = $3, entrance_ic = $4, exit_ic = $5, toll_amount = $6,
             car_number = $7, etc_card_number = $8, device_id = $9,
             source_row_id = $10, fingerprint = $11, updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(record.id)
    .bind(f.date)
    .bind(&f.time)
    .bind(&f.entrance_ic)
    .bind(&f.exit_ic)
    .bind(f.toll_amount)
    .bind(&f.car_number)
    .bind(&f.etc_card_number)
    .bind(&f.device_id)
    .bind(&record.source_row_id)
    .bind(record.fingerprint())
}

#[async_trait]
impl Transactional for PgRecordGateway {
    async fn commit_tx(&self) -> Result<()> {
        self.scope.commit().await
    }

    async fn rollback_tx(&self) -> Result<()> {
        self.scope.rollback().await
    }
}

#[async_trait]
impl RecordGateway for PgRecordGateway {
    async fn create(&self, record: &EtcRecord) -> Result<()> {
        self.scope
            .execute_isolated(insert_query(record), |e| map_db_error(e, duplicate_of(record)))
            .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<EtcRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM etc_records WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = exec!(
            self.scope,
            sqlx::query_as::<_, RecordRow>(&sql).bind(id),
            fetch_optional
        )
        .map_err(persistence)?;
        Ok(row.map(EtcRecord::from))
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<EtcRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM etc_records WHERE fingerprint = $1 AND deleted_at IS NULL"
        );
        let row = exec!(
            self.scope,
            sqlx::query_as::<_, RecordRow>(&sql).bind(fingerprint),
            fetch_optional
        )
        .map_err(persistence)?;
        Ok(row.map(EtcRecord::from))
    }

    async fn update(&self, record: &EtcRecord) -> Result<()> {
        let result = self
            .scope
            .execute_isolated(update_query(record), |e| map_db_error(e, duplicate_of(record)))
            .await?;
        if result.rows_affected() == 0 {
            return Err(EtcError::not_found("record", record.id));
        }
        Ok(())
    }

    async fn delete(&self, id: RecordId) -> Result<()> {
        let result = exec!(
            self.scope,
            sqlx::query(
                "UPDATE etc_records SET deleted_at = now(), updated_at = now()
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id),
            execute
        )
        .map_err(persistence)?;
        if result.rows_affected() == 0 {
            return Err(EtcError::not_found("record", id));
        }
        Ok(())
    }

    async fn check_duplicate_fingerprint(
        &self,
        fingerprint: &str,
        exclude_ids: &[RecordId],
    ) -> Result<bool> {
        let exists: bool = exec!(
            self.scope,
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (
                     SELECT 1 FROM etc_records
                     WHERE fingerprint = $1 AND deleted_at IS NULL AND NOT (id = ANY($2))
                 )",
            )
            .bind(fingerprint)
            .bind(exclude_ids.to_vec()),
            fetch_one
        )
        .map_err(persistence)?;
        Ok(exists)
    }

    async fn list(&self, filter: &RecordFilter) -> Result<RecordPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM etc_records");
        push_filters(&mut count, filter);
        let total: i64 = exec!(self.scope, count.build_query_scalar::<i64>(), fetch_one)
            .map_err(persistence)?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {RECORD_COLUMNS} FROM etc_records"));
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY date DESC, time DESC LIMIT ")
            .push_bind(i64::from(filter.page_size()))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.page_offset()));
        let rows = exec!(self.scope, select.build_query_as::<RecordRow>(), fetch_all)
            .map_err(persistence)?;

        Ok(RecordPage {
            records: rows.into_iter().map(EtcRecord::from).collect(),
            total: total.max(0) as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        exec!(self.scope, sqlx::query("SELECT 1"), execute).map_err(persistence)?;
        Ok(())
    }

    async fn begin_tx(&self) -> Result<Arc<dyn RecordGateway>> {
        Ok(Arc::new(Self {
            scope: self.scope.begin().await?,
        }))
    }
}
