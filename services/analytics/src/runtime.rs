/// Lambda実行環境
///
/// 環境変数から設定を読み込み、Postgres・S3・SNSに接続したパイプラインを組み立てる。
/// テナントごとのLambda関数と、全テナントを処理するパイプライン関数が共通で使用する。
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use lambda_runtime::{Error, LambdaEvent, service_fn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::application::{
    AnalyticsPipeline, ExportRequest, ExportService, ExportSettings, PipelineReport,
    PipelineRequest,
};
use crate::domain::Tenant;
use crate::infrastructure::{
    AnalyticsConfig, AwsParameterStore, AwsSnsNotifier, ConfigError, CsvFileWriter,
    DatabaseError, Notifier, PgTransactionSource, PgWarehouse, S3ObjectStore, database,
};

/// 本番用のパイプライン
pub type LivePipeline = AnalyticsPipeline<PgTransactionSource, PgWarehouse, S3ObjectStore>;

/// 実行環境の初期化エラー
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// 関数が処理するテナントの範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionScope {
    /// テナント専用のLambda関数（要求のテナント指定は無視する）
    Tenant(Tenant),
    /// 全テナント（要求でテナントを絞り込める）
    AllTenants,
}

impl FunctionScope {
    /// 呼び出し要求から実行内容を決める
    pub fn plan(&self, request: &ExportRequest, now: DateTime<Utc>) -> PipelineRequest {
        let tenants = match self {
            FunctionScope::Tenant(tenant) => {
                if let Some(requested) = &request.tenants {
                    if requested.as_slice() != [*tenant] {
                        warn!(
                            function_tenant = %tenant,
                            requested = ?requested,
                            "テナント専用関数のためテナント指定を無視"
                        );
                    }
                }
                vec![*tenant]
            }
            FunctionScope::AllTenants => request.resolve_tenants(&Tenant::ALL),
        };

        PipelineRequest {
            date: request.resolve_date(now),
            tenants,
            skip_etl: request.skip_etl,
        }
    }
}

/// ローカル実行時の上書き設定
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// EXPORT_DIRの上書き
    pub export_dir: Option<PathBuf>,
    /// falseならS3へアップロードしない
    pub upload: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            export_dir: None,
            upload: true,
        }
    }
}

/// 組み立て済みの実行環境
pub struct Runtime {
    config: AnalyticsConfig,
    pipeline: LivePipeline,
    notifier: Option<AwsSnsNotifier>,
}

impl Runtime {
    /// 環境変数から実行環境を組み立てる
    ///
    /// DATABASE_URLがなければDATABASE_URL_PARAMのSSMパラメータから取得する。
    pub async fn from_env(options: RuntimeOptions) -> Result<Self, RuntimeError> {
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let parameter_store = AwsParameterStore::new(aws_sdk_ssm::Client::new(&aws));
        let mut config = AnalyticsConfig::from_env_resolving(&parameter_store).await?;
        if let Some(export_dir) = options.export_dir {
            config = config.with_export_dir(export_dir);
        }

        let pool = database::connect(&config).await?;
        let warehouse = PgWarehouse::new(pool.clone());
        let source = PgTransactionSource::new(pool, config.source_table());
        let export = ExportService::new(
            warehouse.clone(),
            S3ObjectStore::new(aws_sdk_s3::Client::new(&aws)),
            CsvFileWriter::new(config.export_dir()),
            ExportSettings {
                buckets: config.tenant_buckets().clone(),
                key_prefix: config.key_prefix().to_string(),
                upload: options.upload,
            },
        );

        let notifier = config
            .result_topic_arn()
            .map(|_| AwsSnsNotifier::new(aws_sdk_sns::Client::new(&aws)));

        info!(
            source_table = config.source_table(),
            export_dir = %config.export_dir().display(),
            upload = options.upload,
            notify = notifier.is_some(),
            "実行環境を初期化"
        );

        Ok(Self {
            pipeline: AnalyticsPipeline::new(source, warehouse, export),
            config,
            notifier,
        })
    }

    /// パイプラインを実行し、設定があれば結果を通知する
    pub async fn execute(&self, request: &PipelineRequest) -> PipelineReport {
        let report = self.pipeline.run(request).await;

        if let (Some(notifier), Some(topic_arn)) = (&self.notifier, self.config.result_topic_arn())
        {
            notify_report(notifier, topic_arn, &report).await;
        }

        report
    }
}

/// 実行結果を通知する（失敗してもパイプラインの結果は変えない）
pub async fn notify_report<N: Notifier>(
    notifier: &N,
    topic_arn: &str,
    report: &PipelineReport,
) -> bool {
    match notifier
        .publish_json(topic_arn, report, Some(&report.subject()))
        .await
    {
        Ok(_) => true,
        Err(err) => {
            warn!(topic_arn = %topic_arn, error = %err, "実行結果の通知に失敗");
            false
        }
    }
}

/// Lambda warm start時に接続を再利用するための実行環境
static RUNTIME: OnceCell<Runtime> = OnceCell::const_new();

async fn shared_runtime() -> Result<&'static Runtime, RuntimeError> {
    RUNTIME
        .get_or_try_init(|| Runtime::from_env(RuntimeOptions::default()))
        .await
}

/// Lambda呼び出し1回分の処理
///
/// パイプラインが失敗した場合はエラーを返し、Lambdaの失敗として記録させる。
pub async fn handle_event(
    scope: FunctionScope,
    event: LambdaEvent<Value>,
) -> Result<PipelineReport, Error> {
    let request = ExportRequest::from_payload(&event.payload)?;
    let plan = scope.plan(&request, Utc::now());

    info!(
        request_id = %event.context.request_id,
        date = %plan.date,
        tenants = ?plan.tenants,
        skip_etl = plan.skip_etl,
        "エクスポート要求を受信"
    );

    let runtime = shared_runtime().await.map_err(|e| {
        error!(error = %e, "実行環境の初期化に失敗");
        e
    })?;

    let report = runtime.execute(&plan).await;
    match report.failure() {
        Some(failure) => Err(failure.into()),
        None => Ok(report),
    }
}

/// Lambdaランタイムを起動する
pub async fn run_lambda(scope: FunctionScope) -> Result<(), Error> {
    info!(scope = ?scope, "Lambda関数として起動");
    lambda_runtime::run(service_fn(move |event| handle_event(scope, event))).await
}
