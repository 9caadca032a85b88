/// Lambda呼び出しペイロード
///
/// 手動実行では `{"date": "2025-07-01", "skip_etl": false}` のようなJSONを、
/// 定期実行ではEventBridgeのスケジュールイベントを受け取る。
use aws_lambda_events::event::cloudwatch_events::CloudWatchEvent;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ExportDate, Tenant};

/// ペイロード解釈のエラー型
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid scheduled event: {0}")]
    ScheduledEvent(String),

    #[error("Invalid request payload: {0}")]
    Payload(String),
}

/// エクスポート要求
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExportRequest {
    /// 対象日（未指定なら前日）
    pub date: Option<ExportDate>,
    /// ETLを省略してマートとエクスポートのみ行う
    pub skip_etl: bool,
    /// 対象テナント（未指定なら関数のデフォルト）
    pub tenants: Option<Vec<Tenant>>,
}

impl ExportRequest {
    /// 呼び出しペイロードを解釈する
    ///
    /// `detail-type`を持つペイロードはEventBridgeイベントとして扱い、
    /// イベント時刻の前日を対象日とする。
    pub fn from_payload(payload: &Value) -> Result<Self, RequestError> {
        if payload.is_null() {
            return Ok(Self::default());
        }

        if payload.get("detail-type").is_some() {
            let event: CloudWatchEvent = serde_json::from_value(payload.clone())
                .map_err(|e| RequestError::ScheduledEvent(e.to_string()))?;
            return Ok(Self {
                date: Some(ExportDate::from_schedule_time(event.time)),
                ..Default::default()
            });
        }

        serde_json::from_value(payload.clone()).map_err(|e| RequestError::Payload(e.to_string()))
    }

    /// 対象日を確定する（未指定なら`now`の前日）
    pub fn resolve_date(&self, now: DateTime<Utc>) -> ExportDate {
        self.date.unwrap_or_else(|| ExportDate::yesterday(now))
    }

    /// 対象テナントを確定する
    ///
    /// 要求にテナントがなければ`defaults`を使う。重複は除き順序は保つ。
    pub fn resolve_tenants(&self, defaults: &[Tenant]) -> Vec<Tenant> {
        let requested = self.tenants.as_deref().unwrap_or(defaults);
        let mut tenants = Vec::with_capacity(requested.len());
        for tenant in requested {
            if !tenants.contains(tenant) {
                tenants.push(*tenant);
            }
        }
        tenants
    }
}
