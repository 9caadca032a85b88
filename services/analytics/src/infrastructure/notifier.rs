//! 実行結果通知モジュール
//!
//! RESULT_SNS_TOPIC_ARNが設定されている場合、パイプラインの
//! 実行結果をJSONとしてSNSトピックに発行する。

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// SNS件名の上限（文字数）
const MAX_SUBJECT_LENGTH: usize = 100;

/// 通知のエラー型
#[derive(Debug, Error)]
pub enum NotifierError {
    /// AWS SDK エラー
    #[error("AWS SNS APIエラー: {0}")]
    AwsSdkError(String),
    /// JSON シリアライズエラー
    #[error("JSONシリアライズエラー: {0}")]
    SerializeError(String),
}

/// 通知トレイト（テスト用の抽象化）
#[async_trait]
pub trait Notifier: Send + Sync {
    /// メッセージをトピックに発行し、メッセージIDを返す
    async fn publish(
        &self,
        topic_arn: &str,
        message: &str,
        subject: Option<&str>,
    ) -> Result<String, NotifierError>;

    /// シリアライズ可能な値をJSONとして発行する
    async fn publish_json<T: Serialize + Send + Sync>(
        &self,
        topic_arn: &str,
        value: &T,
        subject: Option<&str>,
    ) -> Result<String, NotifierError> {
        let message = serde_json::to_string(value)
            .map_err(|e| NotifierError::SerializeError(e.to_string()))?;

        self.publish(topic_arn, &message, subject).await
    }
}

/// SNSの件名制限に収まるよう切り詰める
pub fn truncate_subject(subject: &str) -> String {
    subject.chars().take(MAX_SUBJECT_LENGTH).collect()
}

/// AWS SNS SDKを使用した実装
pub struct AwsSnsNotifier {
    client: SnsClient,
}

impl AwsSnsNotifier {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for AwsSnsNotifier {
    async fn publish(
        &self,
        topic_arn: &str,
        message: &str,
        subject: Option<&str>,
    ) -> Result<String, NotifierError> {
        let mut request = self.client.publish().topic_arn(topic_arn).message(message);

        if let Some(subject) = subject {
            request = request.subject(truncate_subject(subject));
        }

        match request.send().await {
            Ok(response) => {
                let message_id = response.message_id().unwrap_or("unknown").to_string();
                info!(
                    topic_arn = %topic_arn,
                    message_id = %message_id,
                    "実行結果通知完了"
                );
                Ok(message_id)
            }
            Err(err) => {
                warn!(topic_arn = %topic_arn, error = %err, "実行結果通知失敗");
                Err(NotifierError::AwsSdkError(err.to_string()))
            }
        }
    }
}
