//! SSM Parameter Storeモジュール
//!
//! DATABASE_URLを環境変数に平文で置かない構成向けに、
//! SecureStringパラメータを復号して取得する。

use async_trait::async_trait;
use aws_sdk_ssm::Client as SsmClient;
use thiserror::Error;
use tracing::{info, warn};

/// パラメータ取得のエラー型
#[derive(Debug, Error)]
pub enum ParameterStoreError {
    /// AWS SDK エラー
    #[error("AWS SSM APIエラー: {0}")]
    AwsSdkError(String),
    /// パラメータに値がない
    #[error("パラメータに値がありません: {0}")]
    EmptyValue(String),
}

/// パラメータ取得トレイト（テスト用の抽象化）
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// SecureStringパラメータを復号して取得する
    async fn get_secure_string(&self, name: &str) -> Result<String, ParameterStoreError>;
}

/// AWS SSM SDKを使用した実装
pub struct AwsParameterStore {
    client: SsmClient,
}

impl AwsParameterStore {
    pub fn new(client: SsmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ParameterStore for AwsParameterStore {
    async fn get_secure_string(&self, name: &str) -> Result<String, ParameterStoreError> {
        let response = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|err| {
                warn!(parameter = %name, error = %err, "SSMパラメータ取得失敗");
                ParameterStoreError::AwsSdkError(err.to_string())
            })?;

        let value = response
            .parameter()
            .and_then(|p| p.value())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ParameterStoreError::EmptyValue(name.to_string()))?;

        // 値そのものはログに出さない
        info!(parameter = %name, "SSMパラメータ取得成功");
        Ok(value.to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// テスト用のモックParameter Store
    #[derive(Clone)]
    pub(crate) struct MockParameterStore {
        values: HashMap<String, String>,
        call_count: Arc<AtomicUsize>,
    }

    impl MockParameterStore {
        pub(crate) fn new(values: Vec<(&str, &str)>) -> Self {
            Self {
                values: values
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                call_count: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ParameterStore for MockParameterStore {
        async fn get_secure_string(&self, name: &str) -> Result<String, ParameterStoreError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.values
                .get(name)
                .cloned()
                .ok_or_else(|| ParameterStoreError::AwsSdkError("ParameterNotFound".to_string()))
        }
    }

    #[test]
    fn test_error_display() {
        let error = ParameterStoreError::AwsSdkError("ParameterNotFound".to_string());
        assert_eq!(error.to_string(), "AWS SSM APIエラー: ParameterNotFound");

        let error = ParameterStoreError::EmptyValue("/integreat/db".to_string());
        assert!(error.to_string().contains("/integreat/db"));
    }

    #[tokio::test]
    async fn test_mock_returns_configured_value() {
        let store = MockParameterStore::new(vec![("/integreat/db", "postgres://x/y")]);

        assert_eq!(
            store.get_secure_string("/integreat/db").await.unwrap(),
            "postgres://x/y"
        );
        assert!(store.get_secure_string("/other").await.is_err());
        assert_eq!(store.call_count(), 2);
    }
}
