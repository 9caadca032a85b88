/// Postgres接続
///
/// 共有のNeonDBインスタンスへのコネクションプールを作成する。
/// 接続文字列に`sslmode`の指定がなければTLS必須で接続する。
use std::str::FromStr;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use thiserror::Error;
use tracing::info;
use url::Url;

use super::config::AnalyticsConfig;

/// 接続取得のタイムアウト
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// DB接続のエラー型
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// 接続文字列に明示的なsslmodeがあるかどうか
fn has_explicit_ssl_mode(database_url: &str) -> bool {
    Url::parse(database_url)
        .map(|url| url.query_pairs().any(|(key, _)| key == "sslmode"))
        .unwrap_or(false)
}

/// 接続文字列から接続オプションを作成する
pub fn connect_options(database_url: &str) -> Result<PgConnectOptions, DatabaseError> {
    let options = PgConnectOptions::from_str(database_url)
        .map_err(|e| DatabaseError::InvalidUrl(e.to_string()))?;

    if has_explicit_ssl_mode(database_url) {
        Ok(options)
    } else {
        Ok(options.ssl_mode(PgSslMode::Require))
    }
}

/// ログ出力用にパスワードを伏せた接続文字列
pub fn redact_url(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) => {
            if url.password().is_some() {
                // set_passwordはcannot-be-a-baseなURLでのみ失敗する
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid database url>".to_string(),
    }
}

/// コネクションプールを作成する
pub async fn connect(config: &AnalyticsConfig) -> Result<PgPool, DatabaseError> {
    let options = connect_options(config.database_url())?;

    info!(
        database = %redact_url(config.database_url()),
        max_connections = config.max_connections(),
        "Postgres接続開始"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections())
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))
}
