//! PostgreSQL-backed dataset store over the `dataset_records` table.

use super::{FieldMap, RecordStore};
use crate::error::PipelineResult;
use crate::models::record::{Collection, DatasetRecord};
use crate::query_builder::sql::{push_query_tail, push_where};
use crate::query_builder::{RecordFilter, RecordQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

// Six binds per row keeps a batch well under the protocol's bind limit
const INSERT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn record_from_row(row: &PgRow) -> PipelineResult<DatasetRecord> {
        let fields: Json<FieldMap> = row.try_get("data")?;
        Ok(DatasetRecord {
            id: row.try_get("id")?,
            scratch: row.try_get::<Option<Uuid>, _>("scratch")?,
            staged_at: row.try_get::<Option<DateTime<Utc>>, _>("staged_at")?,
            origin: row.try_get::<Option<Uuid>, _>("origin")?,
            fields: fields.0,
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find(
        &self,
        collection: Collection,
        query: &RecordQuery,
    ) -> PipelineResult<Vec<DatasetRecord>> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT id, scratch, staged_at, origin, data FROM dataset_records");
        push_query_tail(&mut builder, collection.as_str(), query);

        let rows = builder.build().fetch_all(&self.pool).await?;
        debug!(collection = %collection, rows = rows.len(), "Fetched dataset records");

        rows.iter()
            .map(|row| Self::record_from_row(row).map(|r| query.apply_projection(r)))
            .collect()
    }

    async fn count(&self, collection: Collection, filter: &RecordFilter) -> PipelineResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM dataset_records");
        push_where(&mut builder, collection.as_str(), filter);
        let count: i64 = builder.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn insert_many(
        &self,
        collection: Collection,
        records: Vec<DatasetRecord>,
    ) -> PipelineResult<u64> {
        let mut inserted = 0;
        for chunk in records.chunks(INSERT_BATCH_SIZE) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO dataset_records (id, collection, scratch, staged_at, origin, data) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.id)
                    .push_bind(collection.as_str())
                    .push_bind(record.scratch)
                    .push_bind(record.staged_at)
                    .push_bind(record.origin)
                    .push_bind(Json(record.fields.clone()));
            });
            inserted += builder.build().execute(&self.pool).await?.rows_affected();
        }
        debug!(collection = %collection, inserted = inserted, "Inserted dataset records");
        Ok(inserted)
    }

    async fn update_fields(
        &self,
        collection: Collection,
        id: Uuid,
        fields: FieldMap,
    ) -> PipelineResult<bool> {
        let result = sqlx::query(
            "UPDATE dataset_records SET data = data || $1 WHERE collection = $2 AND id = $3",
        )
        .bind(Json(fields))
        .bind(collection.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace(
        &self,
        collection: Collection,
        id: Uuid,
        fields: FieldMap,
    ) -> PipelineResult<bool> {
        let result =
            sqlx::query("UPDATE dataset_records SET data = $1 WHERE collection = $2 AND id = $3")
                .bind(Json(fields))
                .bind(collection.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_many(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        fields: FieldMap,
    ) -> PipelineResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE dataset_records SET data = data || ");
        builder.push_bind(Json(fields));
        push_where(&mut builder, collection.as_str(), filter);
        Ok(builder.build().execute(&self.pool).await?.rows_affected())
    }

    async fn delete_many(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> PipelineResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM dataset_records");
        push_where(&mut builder, collection.as_str(), filter);
        let deleted = builder.build().execute(&self.pool).await?.rows_affected();
        debug!(collection = %collection, deleted = deleted, "Deleted dataset records");
        Ok(deleted)
    }

    async fn clear_scratch(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> PipelineResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "UPDATE dataset_records SET scratch = NULL, staged_at = NULL, origin = NULL",
        );
        push_where(&mut builder, collection.as_str(), filter);
        Ok(builder.build().execute(&self.pool).await?.rows_affected())
    }
}
