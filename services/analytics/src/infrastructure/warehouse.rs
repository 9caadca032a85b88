/// OLAPウェアハウスモジュール
///
/// スタースキーマへのロード、テナントマートの再構築、
/// エクスポート用データセットの取得を提供する。
use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::{Arguments, PgPool, Row};
use thiserror::Error;
use tracing::{debug, info};

use super::warehouse_sql::{
    self, DIM_LOCATION, DIM_SERVICE, DIM_TIME, DIM_USER, Dimension, LOAD_CHUNK_SIZE,
    SCHEMA_STATEMENTS,
};
use crate::domain::{
    CsvTable, ExportDataset, ExportWindow, StarBatch, Tenant,
    star_schema::{FactRow, LocationKey, ServiceKey, TimeKey, UserKey},
};

/// スキーマ変更とロードを直列化するアドバイザリロックのキー
///
/// テナントごとのLambdaが同時に起動しても、DDLとディメンション採番が競合しない。
const ETL_LOCK_KEY: i64 = 0x0A1A_7E57;

/// ウェアハウス操作のエラー型
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Schema setup failed: {0}")]
    Schema(String),

    #[error("Load failed: {0}")]
    Load(String),

    #[error("Dimension row not found after upsert: {0}")]
    MissingDimension(String),

    #[error("Mart rebuild failed for {tenant}: {reason}")]
    Mart { tenant: Tenant, reason: String },

    #[error("Dataset query failed: {0}")]
    Query(String),
}

/// ロード結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub dimension_rows_inserted: u64,
    pub fact_rows_inserted: u64,
}

/// ウェアハウス操作トレイト（テスト用の抽象化）
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// OLAPスキーマとスタースキーマのテーブルを作成する（存在しない場合のみ）
    async fn ensure_schema(&self) -> Result<(), WarehouseError>;

    /// 変換済みバッチを1トランザクションでロードする
    ///
    /// 既存のディメンション・ファクトは挿入せず、挿入した行数のみを返す。
    async fn load_batch(&self, batch: &StarBatch) -> Result<LoadReport, WarehouseError>;

    /// テナントマートを作り直し、挿入した行数を返す
    async fn rebuild_mart(
        &self,
        tenant: Tenant,
        window: &ExportWindow,
    ) -> Result<u64, WarehouseError>;

    /// エクスポート用データセットを取得する
    async fn fetch_dataset(
        &self,
        dataset: ExportDataset,
        tenant: Tenant,
        window: &ExportWindow,
    ) -> Result<CsvTable, WarehouseError>;
}

/// ディメンションキーの配列バインド
trait DimensionKey: Eq + Hash + Clone + Sync {
    const DIMENSION: Dimension;

    /// キー列を`Dimension::columns`の順に列ごとの配列としてバインドする
    fn column_arrays(keys: &[Self]) -> Result<PgArguments, BoxDynError>;
}

fn column<K, T>(keys: &[K], field: impl Fn(&K) -> T) -> Vec<T> {
    keys.iter().map(field).collect()
}

impl DimensionKey for TimeKey {
    const DIMENSION: Dimension = DIM_TIME;

    fn column_arrays(keys: &[Self]) -> Result<PgArguments, BoxDynError> {
        let mut args = PgArguments::default();
        args.add(column(keys, |k| k.timestamp))?;
        args.add(column(keys, |k| k.hour))?;
        args.add(column(keys, |k| k.day))?;
        args.add(column(keys, |k| k.month))?;
        args.add(column(keys, |k| k.year))?;
        Ok(args)
    }
}

impl DimensionKey for LocationKey {
    const DIMENSION: Dimension = DIM_LOCATION;

    fn column_arrays(keys: &[Self]) -> Result<PgArguments, BoxDynError> {
        let mut args = PgArguments::default();
        args.add(column(keys, |k| k.country.clone()))?;
        args.add(column(keys, |k| k.region.clone()))?;
        args.add(column(keys, |k| k.city.clone()))?;
        args.add(column(keys, |k| k.zip_code.clone()))?;
        args.add(column(keys, |k| k.latitude))?;
        args.add(column(keys, |k| k.longitude))?;
        Ok(args)
    }
}

impl DimensionKey for UserKey {
    const DIMENSION: Dimension = DIM_USER;

    fn column_arrays(keys: &[Self]) -> Result<PgArguments, BoxDynError> {
        let mut args = PgArguments::default();
        args.add(column(keys, |k| k.role.clone()))?;
        args.add(column(keys, |k| k.origin.clone()))?;
        Ok(args)
    }
}

impl DimensionKey for ServiceKey {
    const DIMENSION: Dimension = DIM_SERVICE;

    fn column_arrays(keys: &[Self]) -> Result<PgArguments, BoxDynError> {
        let mut args = PgArguments::default();
        args.add(column(keys, |k| k.destination.clone()))?;
        args.add(column(keys, |k| k.api_version.clone()))?;
        args.add(column(keys, |k| k.service_type.clone()))?;
        Ok(args)
    }
}

fn bind_err(e: BoxDynError) -> WarehouseError {
    WarehouseError::Load(e.to_string())
}

fn load_err(e: sqlx::Error) -> WarehouseError {
    WarehouseError::Load(e.to_string())
}

/// キーの集合をIDに解決し、新規挿入数を加算する
///
/// チャンクごとに一括挿入（既存キーは無視）と一括検索の2文だけを発行する。
/// 挿入数は`rows_affected`なので、既存キーは数えない。
async fn resolve_all<K: DimensionKey>(
    conn: &mut PgConnection,
    keys: &[K],
    inserted: &mut u64,
) -> Result<HashMap<K, i32>, WarehouseError> {
    let insert = K::DIMENSION.insert_batch_sql();
    let lookup = K::DIMENSION.lookup_batch_sql();
    let missing = || WarehouseError::MissingDimension(K::DIMENSION.table.to_string());

    let mut ids = HashMap::with_capacity(keys.len());
    for chunk in keys.chunks(LOAD_CHUNK_SIZE) {
        *inserted += sqlx::query_with(&insert, K::column_arrays(chunk).map_err(bind_err)?)
            .execute(&mut *conn)
            .await
            .map_err(load_err)?
            .rows_affected();

        let rows = sqlx::query_as_with::<_, (i64, i32), _>(
            &lookup,
            K::column_arrays(chunk).map_err(bind_err)?,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(load_err)?;

        if rows.len() != chunk.len() {
            return Err(missing());
        }
        for (ordinality, id) in rows {
            let key = usize::try_from(ordinality - 1)
                .ok()
                .and_then(|i| chunk.get(i))
                .ok_or_else(missing)?;
            ids.insert(key.clone(), id);
        }
    }
    debug!(
        table = K::DIMENSION.table,
        keys = keys.len(),
        "ディメンション解決完了"
    );
    Ok(ids)
}

fn id_of<K: DimensionKey>(ids: &HashMap<K, i32>, key: &K) -> Result<i32, WarehouseError> {
    ids.get(key)
        .copied()
        .ok_or_else(|| WarehouseError::MissingDimension(K::DIMENSION.table.to_string()))
}

/// 解決済みのディメンションID
struct DimensionIds {
    times: HashMap<TimeKey, i32>,
    locations: HashMap<LocationKey, i32>,
    users: HashMap<UserKey, i32>,
    services: HashMap<ServiceKey, i32>,
}

impl DimensionIds {
    /// ファクト列を`FACT_COLUMNS`の順に列ごとの配列としてバインドする
    fn fact_arrays(&self, facts: &[FactRow]) -> Result<PgArguments, WarehouseError> {
        let time_ids = facts
            .iter()
            .map(|f| id_of(&self.times, &f.time))
            .collect::<Result<Vec<_>, _>>()?;
        let location_ids = facts
            .iter()
            .map(|f| id_of(&self.locations, &f.location))
            .collect::<Result<Vec<_>, _>>()?;
        let user_ids = facts
            .iter()
            .map(|f| id_of(&self.users, &f.user))
            .collect::<Result<Vec<_>, _>>()?;
        let service_ids = facts
            .iter()
            .map(|f| id_of(&self.services, &f.service))
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = PgArguments::default();
        args.add(column(facts, |f| f.log_id)).map_err(bind_err)?;
        args.add(time_ids).map_err(bind_err)?;
        args.add(location_ids).map_err(bind_err)?;
        args.add(user_ids).map_err(bind_err)?;
        args.add(service_ids).map_err(bind_err)?;
        args.add(column(facts, |f| f.request_method.clone()))
            .map_err(bind_err)?;
        args.add(column(facts, |f| f.request_url.clone()))
            .map_err(bind_err)?;
        args.add(column(facts, |f| f.request_headers.clone()))
            .map_err(bind_err)?;
        args.add(column(facts, |f| f.request_body.clone()))
            .map_err(bind_err)?;
        args.add(column(facts, |f| f.response_status_code))
            .map_err(bind_err)?;
        args.add(column(facts, |f| f.response_body.clone()))
            .map_err(bind_err)?;
        args.add(column(facts, |f| f.execution_time_ms))
            .map_err(bind_err)?;
        args.add(column(facts, |f| f.error_message.clone()))
            .map_err(bind_err)?;
        Ok(args)
    }
}

async fn acquire_etl_lock(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(ETL_LOCK_KEY)
        .execute(conn)
        .await
        .map(|_| ())
}

fn decode_text_row(row: &PgRow, width: usize) -> Result<Vec<Option<String>>, sqlx::Error> {
    (0..width).map(|i| row.try_get::<Option<String>, _>(i)).collect()
}

/// Postgres実装
#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn ensure_schema(&self) -> Result<(), WarehouseError> {
        let map_err = |e: sqlx::Error| WarehouseError::Schema(e.to_string());

        let mut tx = self.pool.begin().await.map_err(map_err)?;
        acquire_etl_lock(&mut tx).await.map_err(map_err)?;

        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
        }

        tx.commit().await.map_err(map_err)?;
        info!("OLAPスキーマ確認完了");
        Ok(())
    }

    async fn load_batch(&self, batch: &StarBatch) -> Result<LoadReport, WarehouseError> {
        let map_err = |e: sqlx::Error| WarehouseError::Load(e.to_string());

        let mut tx = self.pool.begin().await.map_err(map_err)?;
        acquire_etl_lock(&mut tx).await.map_err(map_err)?;

        let mut report = LoadReport::default();
        let inserted = &mut report.dimension_rows_inserted;
        let ids = DimensionIds {
            times: resolve_all(&mut tx, &batch.times, inserted).await?,
            locations: resolve_all(&mut tx, &batch.locations, inserted).await?,
            users: resolve_all(&mut tx, &batch.users, inserted).await?,
            services: resolve_all(&mut tx, &batch.services, inserted).await?,
        };

        let insert_facts = warehouse_sql::insert_facts_sql();
        for chunk in batch.facts.chunks(LOAD_CHUNK_SIZE) {
            report.fact_rows_inserted += sqlx::query_with(&insert_facts, ids.fact_arrays(chunk)?)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?
                .rows_affected();
        }

        tx.commit().await.map_err(map_err)?;

        info!(
            dimension_rows_inserted = report.dimension_rows_inserted,
            fact_rows_inserted = report.fact_rows_inserted,
            facts = batch.facts.len(),
            "スタースキーマロード完了"
        );
        Ok(report)
    }

    async fn rebuild_mart(
        &self,
        tenant: Tenant,
        window: &ExportWindow,
    ) -> Result<u64, WarehouseError> {
        let map_err = |e: sqlx::Error| WarehouseError::Mart {
            tenant,
            reason: e.to_string(),
        };

        let mut tx = self.pool.begin().await.map_err(map_err)?;

        sqlx::query(&warehouse_sql::create_mart_sql(tenant))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        sqlx::query(&warehouse_sql::clear_mart_sql(tenant))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        let inserted = sqlx::query(&warehouse_sql::fill_mart_sql(tenant))
            .bind(window.start)
            .bind(window.end)
            .bind(tenant.display_name())
            .execute(&mut *tx)
            .await
            .map_err(map_err)?
            .rows_affected();

        tx.commit().await.map_err(map_err)?;

        info!(
            tenant = %tenant,
            table = %warehouse_sql::mart_table(tenant),
            rows = inserted,
            "マート再構築完了"
        );
        Ok(inserted)
    }

    async fn fetch_dataset(
        &self,
        dataset: ExportDataset,
        tenant: Tenant,
        window: &ExportWindow,
    ) -> Result<CsvTable, WarehouseError> {
        let query = warehouse_sql::dataset_query(dataset, tenant);

        let mut statement = sqlx::query(&query.sql).bind(window.start).bind(window.end);
        if query.binds_tenant {
            statement = statement.bind(tenant.display_name());
        }

        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(|e| WarehouseError::Query(e.to_string()))?;

        let mut table = CsvTable::new(query.columns.iter().map(|c| c.to_string()).collect());
        for row in &rows {
            let cells = decode_text_row(row, query.columns.len())
                .map_err(|e| WarehouseError::Query(e.to_string()))?;
            table.push_row(cells);
        }

        debug!(
            tenant = %tenant,
            dataset = ?dataset,
            rows = table.row_count(),
            "データセット取得完了"
        );
        Ok(table)
    }
}
