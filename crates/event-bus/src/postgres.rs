use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::log::{check_partition, check_partition_count};
use crate::memory::DEFAULT_PARTITIONS;
use crate::{Ack, EventBusError, EventLog, Offset, Partition, Record, Result};

/// PostgreSQL-backed partitioned log.
///
/// Each partition keeps its next offset in `event_partitions`; appending
/// increments that row inside the insert transaction, so concurrent writers
/// to one partition serialize on the row lock and offsets stay gapless.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
    default_partitions: u32,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_partitions: DEFAULT_PARTITIONS,
        }
    }

    /// Sets the partition count for implicitly created streams.
    pub fn with_default_partitions(mut self, partitions: u32) -> Self {
        self.default_partitions = partitions.max(1);
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<Record> {
        Ok(Record {
            stream: row.try_get("stream")?,
            partition: Partition::new(row.try_get::<i32, _>("partition_no")? as u32),
            offset: Offset::new(row.try_get("record_offset")?),
            key: row.try_get("record_key")?,
            payload: row.try_get("payload")?,
            appended_at: row.try_get("appended_at")?,
        })
    }

    async fn ensure_stream(
        tx: &mut Transaction<'_, Postgres>,
        stream: &str,
        partitions: u32,
    ) -> Result<u32> {
        sqlx::query(
            r#"
            INSERT INTO event_streams (name, partitions)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(stream)
        .bind(partitions as i32)
        .execute(&mut **tx)
        .await?;

        let existing: i32 =
            sqlx::query_scalar("SELECT partitions FROM event_streams WHERE name = $1")
                .bind(stream)
                .fetch_one(&mut **tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO event_partitions (stream, partition_no)
            SELECT $1, gs FROM generate_series(0, $2 - 1) AS gs
            ON CONFLICT (stream, partition_no) DO NOTHING
            "#,
        )
        .bind(stream)
        .bind(existing)
        .execute(&mut **tx)
        .await?;

        Ok(existing as u32)
    }

    async fn known_partition_count(&self, stream: &str) -> Result<Option<u32>> {
        let partitions: Option<i32> =
            sqlx::query_scalar("SELECT partitions FROM event_streams WHERE name = $1")
                .bind(stream)
                .fetch_optional(&self.pool)
                .await?;
        Ok(partitions.map(|p| p as u32))
    }

    async fn checked_partition(&self, stream: &str, partition: Partition) -> Result<()> {
        let partitions = self
            .known_partition_count(stream)
            .await?
            .ok_or_else(|| EventBusError::UnknownStream(stream.to_string()))?;
        check_partition(stream, partition, partitions)
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    #[tracing::instrument(skip(self))]
    async fn create_stream(&self, stream: &str, partitions: u32) -> Result<u32> {
        check_partition_count(stream, partitions)?;

        let mut tx = self.pool.begin().await?;
        let count = Self::ensure_stream(&mut tx, stream, partitions).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn partition_count(&self, stream: &str) -> Result<u32> {
        self.known_partition_count(stream)
            .await?
            .ok_or_else(|| EventBusError::UnknownStream(stream.to_string()))
    }

    async fn append(&self, stream: &str, key: &str, payload: Vec<u8>) -> Result<Ack> {
        let mut tx = self.pool.begin().await?;

        let partitions = match self.known_partition_count(stream).await? {
            Some(p) => p,
            None => Self::ensure_stream(&mut tx, stream, self.default_partitions).await?,
        };
        let partition = Partition::for_key(key, partitions);

        let offset: i64 = sqlx::query_scalar(
            r#"
            UPDATE event_partitions
            SET next_offset = next_offset + 1
            WHERE stream = $1 AND partition_no = $2
            RETURNING next_offset - 1
            "#,
        )
        .bind(stream)
        .bind(partition.as_u32() as i32)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO event_records (stream, partition_no, record_offset, record_key, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(stream)
        .bind(partition.as_u32() as i32)
        .bind(offset)
        .bind(key)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Ack {
            partition,
            offset: Offset::new(offset),
        })
    }

    async fn fetch(
        &self,
        stream: &str,
        partition: Partition,
        from: Offset,
        max: usize,
    ) -> Result<Vec<Record>> {
        self.checked_partition(stream, partition).await?;

        let rows = sqlx::query(
            r#"
            SELECT stream, partition_no, record_offset, record_key, payload, appended_at
            FROM event_records
            WHERE stream = $1 AND partition_no = $2 AND record_offset >= $3
            ORDER BY record_offset ASC
            LIMIT $4
            "#,
        )
        .bind(stream)
        .bind(partition.as_u32() as i32)
        .bind(from.as_i64())
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn end_offset(&self, stream: &str, partition: Partition) -> Result<Offset> {
        self.checked_partition(stream, partition).await?;

        let next: i64 = sqlx::query_scalar(
            "SELECT next_offset FROM event_partitions WHERE stream = $1 AND partition_no = $2",
        )
        .bind(stream)
        .bind(partition.as_u32() as i32)
        .fetch_one(&self.pool)
        .await?;

        Ok(Offset::new(next))
    }

    async fn commit(
        &self,
        group: &str,
        stream: &str,
        partition: Partition,
        next: Offset,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (group_name, stream, partition_no, next_offset, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (group_name, stream, partition_no) DO UPDATE SET
                next_offset = EXCLUDED.next_offset,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(group)
        .bind(stream)
        .bind(partition.as_u32() as i32)
        .bind(next.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn committed(
        &self,
        group: &str,
        stream: &str,
        partition: Partition,
    ) -> Result<Option<Offset>> {
        let next: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT next_offset FROM consumer_offsets
            WHERE group_name = $1 AND stream = $2 AND partition_no = $3
            "#,
        )
        .bind(group)
        .bind(stream)
        .bind(partition.as_u32() as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(next.map(Offset::new))
    }
}
