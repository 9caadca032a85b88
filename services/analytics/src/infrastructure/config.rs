/// エクスポート実行設定
///
/// Lambdaの環境変数から接続文字列、テナントバケット、出力先などを読み込む。
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::parameter_store::ParameterStore;
use crate::domain::Tenant;

/// デフォルトの出力ディレクトリ（Lambdaで書き込み可能な唯一の領域）
pub const DEFAULT_EXPORT_DIR: &str = "/tmp";

/// デフォルトのOLTPテーブル名（"OLTP"スキーマ内）
pub const DEFAULT_SOURCE_TABLE: &str = "api_transaction";

/// デフォルトのDBコネクションプール上限
pub const DEFAULT_MAX_CONNECTIONS: u32 = 2;

/// 設定のエラー型
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("No bucket configured for tenant: {0}")]
    MissingBucket(Tenant),

    #[error("Failed to load parameter {name}: {reason}")]
    Parameter { name: String, reason: String },
}

/// テナントごとのエクスポート先バケット
///
/// `TENANT_BUCKETS` を `campus=bucket-a,teleo=bucket-b` の形式で指定する。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantBuckets(BTreeMap<Tenant, String>);

impl TenantBuckets {
    /// `tenant=bucket` のカンマ区切りリストをパースする
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            name: "TENANT_BUCKETS".to_string(),
            reason,
        };

        let mut buckets = BTreeMap::new();
        for entry in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (tenant, bucket) = entry
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected tenant=bucket, got '{}'", entry)))?;

            let tenant: Tenant = tenant.parse().map_err(|e| invalid(format!("{}", e)))?;
            let bucket = bucket.trim();
            if bucket.is_empty() {
                return Err(invalid(format!("empty bucket for {}", tenant)));
            }
            if buckets.insert(tenant, bucket.to_string()).is_some() {
                return Err(invalid(format!("{} listed more than once", tenant)));
            }
        }

        Ok(Self(buckets))
    }

    /// テナントのバケット名を取得
    pub fn bucket_for(&self, tenant: Tenant) -> Result<&str, ConfigError> {
        self.0
            .get(&tenant)
            .map(String::as_str)
            .ok_or(ConfigError::MissingBucket(tenant))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// アナリティクスエクスポートの設定
///
/// 以下の環境変数から読み込む:
/// - DATABASE_URL: Postgres接続文字列（DATABASE_URL_PARAM 未指定時は必須）
/// - DATABASE_URL_PARAM: 接続文字列を保持するSSMパラメータ名（任意）
/// - TENANT_BUCKETS: テナントごとのS3バケット（任意、アップロード時に必要）
/// - EXPORT_DIR: CSVの出力ディレクトリ（デフォルト: /tmp）
/// - EXPORT_KEY_PREFIX: S3オブジェクトキーのプレフィックス（デフォルト: なし）
/// - SOURCE_TABLE: "OLTP"スキーマのトランザクションテーブル（デフォルト: api_transaction）
/// - DB_MAX_CONNECTIONS: コネクションプール上限（デフォルト: 2）
/// - RESULT_SNS_TOPIC_ARN: 実行結果の通知先（任意）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsConfig {
    database_url: String,
    tenant_buckets: TenantBuckets,
    export_dir: PathBuf,
    key_prefix: String,
    source_table: String,
    max_connections: u32,
    result_topic_arn: Option<String>,
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// SQLに埋め込むテーブル名は英数字とアンダースコアのみ許可する
fn validate_identifier(name: &str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("'{}' is not a plain SQL identifier", value),
        })
    }
}

impl AnalyticsConfig {
    /// 環境変数から設定を読み込む
    ///
    /// # エラー
    /// DATABASE_URLが未設定、または値が不正な場合
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = optional_env("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
        Self::from_env_with_database_url(database_url)
    }

    /// 環境変数から設定を読み込み、接続文字列はSSMからの取得も許可する
    ///
    /// DATABASE_URLが設定されていればそれを優先し、
    /// なければDATABASE_URL_PARAMのSecureStringを復号して使用する。
    pub async fn from_env_resolving<P: ParameterStore>(store: &P) -> Result<Self, ConfigError> {
        if let Some(database_url) = optional_env("DATABASE_URL") {
            return Self::from_env_with_database_url(database_url);
        }

        let parameter = optional_env("DATABASE_URL_PARAM").ok_or_else(|| {
            ConfigError::MissingEnvVar("DATABASE_URL or DATABASE_URL_PARAM".to_string())
        })?;

        let database_url =
            store
                .get_secure_string(&parameter)
                .await
                .map_err(|e| ConfigError::Parameter {
                    name: parameter.clone(),
                    reason: e.to_string(),
                })?;

        Self::from_env_with_database_url(database_url)
    }

    fn from_env_with_database_url(database_url: String) -> Result<Self, ConfigError> {
        let tenant_buckets = match optional_env("TENANT_BUCKETS") {
            Some(value) => TenantBuckets::parse(&value)?,
            None => TenantBuckets::default(),
        };

        let source_table =
            optional_env("SOURCE_TABLE").unwrap_or_else(|| DEFAULT_SOURCE_TABLE.to_string());
        validate_identifier("SOURCE_TABLE", &source_table)?;

        let max_connections = match optional_env("DB_MAX_CONNECTIONS") {
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: "DB_MAX_CONNECTIONS".to_string(),
                    reason: format!("'{}' is not a positive integer", value),
                })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let mut config = Self::new(database_url, tenant_buckets);
        if let Some(export_dir) = optional_env("EXPORT_DIR") {
            config.export_dir = PathBuf::from(export_dir);
        }
        config.key_prefix = optional_env("EXPORT_KEY_PREFIX").unwrap_or_default();
        config.source_table = source_table;
        config.max_connections = max_connections;
        config.result_topic_arn = optional_env("RESULT_SNS_TOPIC_ARN");
        Ok(config)
    }

    /// 既定値で設定を作成する
    pub fn new(database_url: impl Into<String>, tenant_buckets: TenantBuckets) -> Self {
        Self {
            database_url: database_url.into(),
            tenant_buckets,
            export_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            key_prefix: String::new(),
            source_table: DEFAULT_SOURCE_TABLE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            result_topic_arn: None,
        }
    }

    /// 出力ディレクトリを上書き
    pub fn with_export_dir(mut self, export_dir: impl Into<PathBuf>) -> Self {
        self.export_dir = export_dir.into();
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn tenant_buckets(&self) -> &TenantBuckets {
        &self.tenant_buckets
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn result_topic_arn(&self) -> Option<&str> {
        self.result_topic_arn.as_deref()
    }
}
