//! # PostgreSQL Mirror
//!
//! The database is **optional**. When `DATABASE_URL` is set the mirror lives
//! in PostgreSQL and survives restarts; otherwise the service runs with
//! [`crate::MemoryMirror`].
//!
//! The ledger-wins rule is enforced twice: the application classifies the
//! write inside a transaction, and the upsert itself never replaces a row
//! with an older version of the same ledger line.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use async_trait::async_trait;
use escrow_core::{
    AccountRecord, AccountStatus, CourseId, IdentityHandle, Timestamp, UserId,
};
use escrow_ledger::VersionedRecord;

use crate::error::MirrorError;
use crate::row::{DisplayFields, MirrorRow, MirrorWrite, PaymentReceipt, SyncStatus};
use crate::store::MirrorStore;

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory mirror).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, MirrorError> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set; using the in-memory mirror. \
                 Mirror rows will be rebuilt from the ledger after a restart."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Mirror migrations applied");

    Ok(Some(pool))
}

const ROW_COLUMNS: &str = "m.course_id, m.human_course_id, m.script_ref, m.payee_wallet, \
     m.oracle_wallet, m.ledger_line, m.ledger_version, m.locked, m.released, m.refunded, m.deposited, \
     m.paid_count, m.tranche30_released, m.tranche40_released, m.tranche_final_released, \
     m.comment_count, m.rating_sum, m.rating_count, m.all_watch_met, m.first_watch_at, \
     m.dispute_deadline, m.status, m.synced_at, (q.course_id IS NOT NULL) AS quarantined";

/// Mirror backed by the `escrow_mirror` tables.
#[derive(Clone)]
pub struct PgMirror {
    pool: PgPool,
}

impl PgMirror {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_row(
        tx: &mut Transaction<'_, Postgres>,
        course: &CourseId,
    ) -> Result<Option<MirrorRow>, MirrorError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM escrow_mirror m \
             LEFT JOIN escrow_mirror_quarantine q ON q.course_id = m.course_id \
             WHERE m.course_id = $1 FOR UPDATE OF m"
        );
        let row = sqlx::query_as::<_, DbMirrorRow>(&sql)
            .bind(course.to_hex())
            .fetch_optional(&mut **tx)
            .await?;
        row.map(DbMirrorRow::into_row).transpose()
    }
}

#[async_trait]
impl MirrorStore for PgMirror {
    async fn get(&self, course: &CourseId) -> Result<Option<MirrorRow>, MirrorError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM escrow_mirror m \
             LEFT JOIN escrow_mirror_quarantine q ON q.course_id = m.course_id \
             WHERE m.course_id = $1"
        );
        let row = sqlx::query_as::<_, DbMirrorRow>(&sql)
            .bind(course.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(DbMirrorRow::into_row).transpose()
    }

    async fn apply_ledger_state(
        &self,
        ledger: &VersionedRecord,
        display: Option<&DisplayFields>,
        synced_at: Timestamp,
    ) -> Result<MirrorWrite, MirrorError> {
        let course = ledger.record.course_id;
        let mut tx = self.pool.begin().await?;

        let quarantined: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM escrow_mirror_quarantine WHERE course_id = $1)",
        )
        .bind(course.to_hex())
        .fetch_one(&mut *tx)
        .await?;
        if quarantined {
            tx.rollback().await?;
            return Ok(MirrorWrite::Quarantined);
        }

        let existing = Self::fetch_row(&mut tx, &course).await?;
        let outcome = match &existing {
            None => MirrorWrite::Inserted,
            Some(row) if row.supersedes(ledger) => MirrorWrite::Stale {
                mirror_version: row.ledger_version,
            },
            Some(row) if row.matches(ledger) && display.map_or(true, |d| *d == row.display) => {
                MirrorWrite::Unchanged
            }
            Some(_) => MirrorWrite::Updated,
        };
        if !matches!(outcome, MirrorWrite::Inserted | MirrorWrite::Updated) {
            tx.rollback().await?;
            return Ok(outcome);
        }

        let display = display
            .cloned()
            .or_else(|| existing.map(|r| r.display))
            .unwrap_or_default();
        let r = &ledger.record;

        sqlx::query(
            "INSERT INTO escrow_mirror (
                 course_id, human_course_id, script_ref, payee_wallet, oracle_wallet,
                 ledger_line, ledger_version, locked, released, refunded, deposited,
                 paid_count, tranche30_released, tranche40_released,
                 tranche_final_released, comment_count, rating_sum, rating_count,
                 all_watch_met, first_watch_at, dispute_deadline, status, synced_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                     $15, $16, $17, $18, $19, $20, $21, $22, $23)
             ON CONFLICT (course_id) DO UPDATE SET
                 human_course_id = EXCLUDED.human_course_id,
                 script_ref = EXCLUDED.script_ref,
                 payee_wallet = EXCLUDED.payee_wallet,
                 oracle_wallet = EXCLUDED.oracle_wallet,
                 ledger_line = EXCLUDED.ledger_line,
                 ledger_version = EXCLUDED.ledger_version,
                 locked = EXCLUDED.locked,
                 released = EXCLUDED.released,
                 refunded = EXCLUDED.refunded,
                 deposited = EXCLUDED.deposited,
                 paid_count = EXCLUDED.paid_count,
                 tranche30_released = EXCLUDED.tranche30_released,
                 tranche40_released = EXCLUDED.tranche40_released,
                 tranche_final_released = EXCLUDED.tranche_final_released,
                 comment_count = EXCLUDED.comment_count,
                 rating_sum = EXCLUDED.rating_sum,
                 rating_count = EXCLUDED.rating_count,
                 all_watch_met = EXCLUDED.all_watch_met,
                 first_watch_at = EXCLUDED.first_watch_at,
                 dispute_deadline = EXCLUDED.dispute_deadline,
                 status = EXCLUDED.status,
                 synced_at = EXCLUDED.synced_at
             WHERE escrow_mirror.ledger_line <> EXCLUDED.ledger_line
                OR escrow_mirror.ledger_version <= EXCLUDED.ledger_version",
        )
        .bind(course.to_hex())
        .bind(&display.human_course_id)
        .bind(&display.script_ref)
        .bind(r.payee.as_str())
        .bind(r.oracle.as_str())
        .bind(i64::from(ledger.line))
        .bind(to_db(ledger.version, "ledger_version")?)
        .bind(to_db(r.locked, "locked")?)
        .bind(to_db(r.released, "released")?)
        .bind(to_db(r.refunded, "refunded")?)
        .bind(to_db(r.deposited, "deposited")?)
        .bind(to_db(r.paid_count, "paid_count")?)
        .bind(r.tranche30_released)
        .bind(r.tranche40_released)
        .bind(r.tranche_final_released)
        .bind(to_db(r.comment_count, "comment_count")?)
        .bind(to_db(r.rating_sum, "rating_sum")?)
        .bind(to_db(r.rating_count, "rating_count")?)
        .bind(r.all_watch_met)
        .bind(r.first_watch_at.map(|t| *t.as_datetime()))
        .bind(r.dispute_deadline.map(|t| *t.as_datetime()))
        .bind(r.status.as_str())
        .bind(*synced_at.as_datetime())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn list(&self) -> Result<Vec<MirrorRow>, MirrorError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM escrow_mirror m \
             LEFT JOIN escrow_mirror_quarantine q ON q.course_id = m.course_id \
             ORDER BY m.course_id"
        );
        let rows = sqlx::query_as::<_, DbMirrorRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DbMirrorRow::into_row).collect()
    }

    async fn mark_drift_ambiguous(
        &self,
        course: &CourseId,
        candidates: usize,
        flagged_at: Timestamp,
    ) -> Result<(), MirrorError> {
        let candidates =
            i32::try_from(candidates).map_err(|_| MirrorError::OutOfRange("candidates"))?;
        sqlx::query(
            "INSERT INTO escrow_mirror_quarantine (course_id, candidates, flagged_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (course_id) DO UPDATE SET candidates = EXCLUDED.candidates",
        )
        .bind(course.to_hex())
        .bind(candidates)
        .bind(*flagged_at.as_datetime())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_drift(&self, course: &CourseId) -> Result<bool, MirrorError> {
        let result = sqlx::query("DELETE FROM escrow_mirror_quarantine WHERE course_id = $1")
            .bind(course.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_quarantined(&self, course: &CourseId) -> Result<bool, MirrorError> {
        let quarantined: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM escrow_mirror_quarantine WHERE course_id = $1)",
        )
        .bind(course.to_hex())
        .fetch_one(&self.pool)
        .await?;
        Ok(quarantined)
    }

    async fn record_receipt(&self, receipt: &PaymentReceipt) -> Result<bool, MirrorError> {
        let result = sqlx::query(
            "INSERT INTO escrow_payment_receipts
                 (course_id, payer, gross_amount, net_amount, idempotency_key, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (course_id, idempotency_key) DO NOTHING",
        )
        .bind(receipt.course_id.to_hex())
        .bind(receipt.payer.as_str())
        .bind(to_db(receipt.gross_amount, "gross_amount")?)
        .bind(to_db(receipt.net_amount, "net_amount")?)
        .bind(&receipt.idempotency_key)
        .bind(*receipt.recorded_at.as_datetime())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn receipts(&self, course: &CourseId) -> Result<Vec<PaymentReceipt>, MirrorError> {
        let rows = sqlx::query_as::<_, DbReceiptRow>(
            "SELECT course_id, payer, gross_amount, net_amount, idempotency_key, recorded_at
             FROM escrow_payment_receipts WHERE course_id = $1 ORDER BY id",
        )
        .bind(course.to_hex())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DbReceiptRow::into_receipt).collect()
    }
}

fn to_db(value: u64, column: &'static str) -> Result<i64, MirrorError> {
    i64::try_from(value).map_err(|_| MirrorError::OutOfRange(column))
}

fn from_db(value: i64, course: &str, column: &str) -> Result<u64, MirrorError> {
    u64::try_from(value).map_err(|_| corrupt(course, format!("negative {column}: {value}")))
}

fn corrupt(course: &str, reason: impl Into<String>) -> MirrorError {
    MirrorError::Corrupt {
        course: course.to_string(),
        reason: reason.into(),
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct DbMirrorRow {
    course_id: String,
    human_course_id: Option<String>,
    script_ref: Option<String>,
    payee_wallet: String,
    oracle_wallet: String,
    ledger_line: i64,
    ledger_version: i64,
    locked: i64,
    released: i64,
    refunded: i64,
    deposited: i64,
    paid_count: i64,
    tranche30_released: bool,
    tranche40_released: bool,
    tranche_final_released: bool,
    comment_count: i64,
    rating_sum: i64,
    rating_count: i64,
    all_watch_met: bool,
    first_watch_at: Option<DateTime<Utc>>,
    dispute_deadline: Option<DateTime<Utc>>,
    status: String,
    synced_at: DateTime<Utc>,
    quarantined: bool,
}

impl DbMirrorRow {
    fn into_row(self) -> Result<MirrorRow, MirrorError> {
        let id = self.course_id.as_str();
        let course_id = CourseId::from_hex(id).map_err(|e| corrupt(id, e.to_string()))?;
        let payee =
            IdentityHandle::new(self.payee_wallet.clone()).map_err(|e| corrupt(id, e.to_string()))?;
        let oracle =
            IdentityHandle::new(self.oracle_wallet).map_err(|e| corrupt(id, e.to_string()))?;
        let status = AccountStatus::from_str_name(&self.status)
            .ok_or_else(|| corrupt(id, format!("unknown status {:?}", self.status)))?;

        let record = AccountRecord {
            course_id,
            payee,
            oracle,
            locked: from_db(self.locked, id, "locked")?,
            released: from_db(self.released, id, "released")?,
            refunded: from_db(self.refunded, id, "refunded")?,
            deposited: from_db(self.deposited, id, "deposited")?,
            paid_count: from_db(self.paid_count, id, "paid_count")?,
            tranche30_released: self.tranche30_released,
            tranche40_released: self.tranche40_released,
            tranche_final_released: self.tranche_final_released,
            comment_count: from_db(self.comment_count, id, "comment_count")?,
            rating_sum: from_db(self.rating_sum, id, "rating_sum")?,
            rating_count: from_db(self.rating_count, id, "rating_count")?,
            all_watch_met: self.all_watch_met,
            first_watch_at: self.first_watch_at.map(Timestamp::from_utc),
            dispute_deadline: self.dispute_deadline.map(Timestamp::from_utc),
            status,
        };

        let ledger_line = u32::try_from(self.ledger_line)
            .map_err(|_| corrupt(id, format!("ledger_line out of range: {}", self.ledger_line)))?;

        Ok(MirrorRow {
            ledger_line,
            ledger_version: from_db(self.ledger_version, id, "ledger_version")?,
            record,
            payee_wallet: self.payee_wallet,
            display: DisplayFields {
                human_course_id: self.human_course_id,
                script_ref: self.script_ref,
            },
            sync_status: if self.quarantined {
                SyncStatus::DriftAmbiguous
            } else {
                SyncStatus::InSync
            },
            synced_at: Timestamp::from_utc(self.synced_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct DbReceiptRow {
    course_id: String,
    payer: String,
    gross_amount: i64,
    net_amount: i64,
    idempotency_key: String,
    recorded_at: DateTime<Utc>,
}

impl DbReceiptRow {
    fn into_receipt(self) -> Result<PaymentReceipt, MirrorError> {
        let id = self.course_id.as_str();
        Ok(PaymentReceipt {
            course_id: CourseId::from_hex(id).map_err(|e| corrupt(id, e.to_string()))?,
            payer: UserId::new(self.payer).map_err(|e| corrupt(id, e.to_string()))?,
            gross_amount: from_db(self.gross_amount, id, "gross_amount")?,
            net_amount: from_db(self.net_amount, id, "net_amount")?,
            idempotency_key: self.idempotency_key,
            recorded_at: Timestamp::from_utc(self.recorded_at),
        })
    }
}
