//! OLTPトランザクション読み込みモジュール
//!
//! "OLTP"スキーマのAPIトランザクションテーブルから、
//! 処理ウィンドウ内の行を読み込む。

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{ExportWindow, SourceTransaction};

/// トランザクション読み込みのエラー型
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source query failed: {0}")]
    Query(String),

    #[error("Failed to decode source row: {0}")]
    Decode(String),
}

/// トランザクション読み込みトレイト（テスト用の抽象化）
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// ウィンドウ内のトランザクションを作成時刻順に取得する
    async fn fetch_window(
        &self,
        window: &ExportWindow,
    ) -> Result<Vec<SourceTransaction>, SourceError>;
}

/// ソーステーブルの読み込みクエリ
///
/// テーブル側の型揺れに備えて、すべての列を読み込み側の型へキャストする。
pub fn select_window_sql(table: &str) -> String {
    format!(
        r#"SELECT
    log_id::bigint AS log_id,
    created_at::timestamp AS created_at,
    country::text AS country,
    region::text AS region,
    city::text AS city,
    zip_code::text AS zip_code,
    latitude::float8 AS latitude,
    longitude::float8 AS longitude,
    role::text AS role,
    origin::text AS origin,
    destination::text AS destination,
    api_version::text AS api_version,
    request_method::text AS request_method,
    request_url::text AS request_url,
    request_headers::text AS request_headers,
    request_body::text AS request_body,
    response_status_code::int4 AS response_status_code,
    response_body::text AS response_body,
    execution_time_ms::int4 AS execution_time_ms,
    error_message::text AS error_message
FROM "OLTP"."{table}"
WHERE created_at >= $1 AND created_at < $2
ORDER BY created_at, log_id"#
    )
}

/// Postgresのソーステーブル実装
#[derive(Clone)]
pub struct PgTransactionSource {
    pool: PgPool,
    table: String,
}

impl PgTransactionSource {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

fn decode_row(row: &PgRow) -> Result<SourceTransaction, sqlx::Error> {
    Ok(SourceTransaction {
        log_id: row.try_get("log_id")?,
        created_at: row.try_get("created_at")?,
        country: row.try_get("country")?,
        region: row.try_get("region")?,
        city: row.try_get("city")?,
        zip_code: row.try_get("zip_code")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        role: row.try_get("role")?,
        origin: row.try_get("origin")?,
        destination: row.try_get("destination")?,
        api_version: row.try_get("api_version")?,
        request_method: row.try_get("request_method")?,
        request_url: row.try_get("request_url")?,
        request_headers: row.try_get("request_headers")?,
        request_body: row.try_get("request_body")?,
        response_status_code: row.try_get("response_status_code")?,
        response_body: row.try_get("response_body")?,
        execution_time_ms: row.try_get("execution_time_ms")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl TransactionSource for PgTransactionSource {
    async fn fetch_window(
        &self,
        window: &ExportWindow,
    ) -> Result<Vec<SourceTransaction>, SourceError> {
        debug!(
            table = %self.table,
            start = %window.start,
            end = %window.end,
            "ソーステーブル読み込み開始"
        );

        let rows = sqlx::query(&select_window_sql(&self.table))
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;

        let transactions = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        info!(
            table = %self.table,
            count = transactions.len(),
            "ソーステーブル読み込み完了"
        );

        Ok(transactions)
    }
}
