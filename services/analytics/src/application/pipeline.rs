/// アナリティクスパイプライン
///
/// 1日分の処理を以下のステップで実行し、結果をレポートにまとめる。
/// - schema: OLAPスキーマの作成（存在しない場合のみ）
/// - etl: OLTPからスタースキーマへのロード（skip_etl時は省略）
/// - mart: テナントごとのマート再構築
/// - export: テナントごとのCSV書き出しとアップロード
///
/// schema・etlの失敗で処理を打ち切る。マートの失敗はそのテナントの
/// エクスポートのみを省略し、エクスポートの失敗は他テナントに影響しない。
use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::etl::{EtlService, EtlSummary};
use super::export::{ExportService, TenantExport};
use super::marts::MartService;
use crate::domain::{ExportDate, Tenant};
use crate::infrastructure::{ObjectStore, TransactionSource, Warehouse};

/// レポートの種別
pub const REPORT_TYPE: &str = "analytics-export-result";

/// ステップ名
pub const STEP_SCHEMA: &str = "schema";
pub const STEP_ETL: &str = "etl";
pub const STEP_MART: &str = "mart";
pub const STEP_EXPORT: &str = "export";

/// パイプライン実行要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub date: ExportDate,
    pub tenants: Vec<Tenant>,
    pub skip_etl: bool,
}

/// ステップの実行結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    /// ステップ名
    pub step: String,
    /// テナント単位のステップの場合のテナント
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Tenant>,
    /// 成功したかどうか
    pub success: bool,
    /// 結果メッセージ
    pub message: String,
    /// 実行時間（ミリ秒）
    pub duration_ms: u64,
}

impl StepResult {
    pub fn new(
        step: impl Into<String>,
        tenant: Option<Tenant>,
        success: bool,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step: step.into(),
            tenant,
            success,
            message: message.into(),
            duration_ms,
        }
    }

    /// 成功結果を作成
    pub fn success(
        step: impl Into<String>,
        tenant: Option<Tenant>,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self::new(step, tenant, true, message, duration_ms)
    }

    /// 失敗結果を作成
    pub fn failure(
        step: impl Into<String>,
        tenant: Option<Tenant>,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self::new(step, tenant, false, message, duration_ms)
    }

    /// ログ・エラー表示用のラベル（例: `mart:campus`）
    pub fn label(&self) -> String {
        match self.tenant {
            Some(tenant) => format!("{}:{}", self.step, tenant),
            None => self.step.clone(),
        }
    }
}

/// パイプライン全体の実行結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// 結果タイプ
    #[serde(rename = "type")]
    pub result_type: String,
    /// 対象日
    pub date: ExportDate,
    /// タイムスタンプ（RFC 3339形式）
    pub timestamp: String,
    /// 各ステップの結果
    pub steps: Vec<StepResult>,
    /// 全体の成功/失敗
    pub overall_success: bool,
    /// 合計実行時間（ミリ秒）
    pub total_duration_ms: u64,
    /// テナントごとのエクスポート結果
    pub exports: Vec<TenantExport>,
}

/// 失敗したパイプライン
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Analytics export for {date} failed at: {}", .failed_steps.join(", "))]
pub struct PipelineFailure {
    pub date: ExportDate,
    pub failed_steps: Vec<String>,
}

impl PipelineReport {
    pub fn new(
        date: ExportDate,
        timestamp: String,
        steps: Vec<StepResult>,
        exports: Vec<TenantExport>,
    ) -> Self {
        let overall_success = steps.iter().all(|s| s.success);
        let total_duration_ms = steps.iter().map(|s| s.duration_ms).sum();

        Self {
            result_type: REPORT_TYPE.to_string(),
            date,
            timestamp,
            steps,
            overall_success,
            total_duration_ms,
            exports,
        }
    }

    /// 通知の件名
    pub fn subject(&self) -> String {
        let status = if self.overall_success { "succeeded" } else { "failed" };
        format!("Integreat analytics export {} {}", self.date, status)
    }

    /// 失敗したステップがあればエラーとして返す
    pub fn failure(&self) -> Option<PipelineFailure> {
        if self.overall_success {
            return None;
        }
        Some(PipelineFailure {
            date: self.date,
            failed_steps: self
                .steps
                .iter()
                .filter(|s| !s.success)
                .map(StepResult::label)
                .collect(),
        })
    }
}

/// ステップを実行して結果を記録する
async fn timed<T, E, F>(
    step: &str,
    tenant: Option<Tenant>,
    describe: impl FnOnce(&T) -> String,
    future: F,
) -> (StepResult, Option<T>)
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let outcome = future.await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(value) => {
            let message = describe(&value);
            info!(step, tenant = ?tenant, message = %message, duration_ms, "ステップ完了");
            (
                StepResult::success(step, tenant, message, duration_ms),
                Some(value),
            )
        }
        Err(err) => {
            warn!(step, tenant = ?tenant, error = %err, duration_ms, "ステップ失敗");
            (
                StepResult::failure(step, tenant, err.to_string(), duration_ms),
                None,
            )
        }
    }
}

/// アナリティクスパイプライン
pub struct AnalyticsPipeline<S, W, O>
where
    S: TransactionSource,
    W: Warehouse,
    O: ObjectStore,
{
    warehouse: W,
    etl: EtlService<S, W>,
    marts: MartService<W>,
    export: ExportService<W, O>,
}

impl<S, W, O> AnalyticsPipeline<S, W, O>
where
    S: TransactionSource,
    W: Warehouse + Clone,
    O: ObjectStore,
{
    pub fn new(source: S, warehouse: W, export: ExportService<W, O>) -> Self {
        Self {
            etl: EtlService::new(source, warehouse.clone()),
            marts: MartService::new(warehouse.clone()),
            warehouse,
            export,
        }
    }

    /// パイプラインを実行する
    ///
    /// 失敗はエラーではなくレポートの各ステップに記録する。
    pub async fn run(&self, request: &PipelineRequest) -> PipelineReport {
        let date = request.date;
        let window = date.window();
        let mut steps = Vec::new();
        let mut exports = Vec::new();

        info!(
            date = %date,
            tenants = ?request.tenants,
            skip_etl = request.skip_etl,
            "パイプライン開始"
        );

        let (step, schema) = timed(
            STEP_SCHEMA,
            None,
            |_: &()| "OLAP schema ready".to_string(),
            self.warehouse.ensure_schema(),
        )
        .await;
        steps.push(step);
        if schema.is_none() {
            return self.finish(date, steps, exports);
        }

        if !request.skip_etl {
            let (step, summary) =
                timed(STEP_ETL, None, EtlSummary::describe, self.etl.run(&window)).await;
            steps.push(step);
            if summary.is_none() {
                return self.finish(date, steps, exports);
            }
        }

        let mut ready = Vec::with_capacity(request.tenants.len());
        for &tenant in &request.tenants {
            let (step, rows) = timed(
                STEP_MART,
                Some(tenant),
                |rows: &u64| format!("{} rows in mart_{}", rows, tenant.code()),
                self.marts.rebuild(tenant, &window),
            )
            .await;
            steps.push(step);
            if rows.is_some() {
                ready.push(tenant);
            } else {
                warn!(tenant = %tenant, "マート再構築に失敗したためエクスポートを省略");
            }
        }

        for tenant in ready {
            let (step, export) = timed(
                STEP_EXPORT,
                Some(tenant),
                TenantExport::describe,
                self.export.export_tenant(tenant, &date),
            )
            .await;
            steps.push(step);
            exports.extend(export);
        }

        self.finish(date, steps, exports)
    }

    fn finish(
        &self,
        date: ExportDate,
        steps: Vec<StepResult>,
        exports: Vec<TenantExport>,
    ) -> PipelineReport {
        let report = PipelineReport::new(date, Utc::now().to_rfc3339(), steps, exports);

        if report.overall_success {
            info!(
                date = %date,
                total_duration_ms = report.total_duration_ms,
                "パイプライン完了"
            );
        } else {
            error!(
                date = %date,
                failed_steps = ?report.failure().map(|f| f.failed_steps),
                "パイプライン失敗"
            );
        }
        report
    }
}
