/// PillarsアナリティクスエクスポートLambda関数
///
/// 前日分のトランザクションをスタースキーマへ取り込み、Pillarsのマートを再構築して
/// CSVをPillarsのS3バケットへアップロードする。
///
/// # 環境変数
/// - DATABASE_URL: Postgres接続文字列（DATABASE_URL_PARAMでSSMから取得も可）
/// - TENANT_BUCKETS: テナントとバケットの対応（例: `pillars=integreat-pillars-analytics`）
/// - RESULT_SNS_TOPIC_ARN: 実行結果の通知先SNSトピック（任意）
use analytics::domain::Tenant;
use analytics::infrastructure::init_logging;
use analytics::runtime::{FunctionScope, run_lambda};
use lambda_runtime::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();
    run_lambda(FunctionScope::Tenant(Tenant::Pillars)).await
}
