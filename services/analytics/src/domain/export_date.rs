/// エクスポート対象日と処理ウィンドウ
///
/// 1回の実行は1日分 `[D 00:00, D+1 00:00)` のトランザクションを処理する。
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 日付文字列の形式
const DATE_FORMAT: &str = "%Y-%m-%d";

/// `YYYY-MM-DD` の文字数
const DATE_LENGTH: usize = 10;

/// 日付パースのエラー型
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportDateError {
    #[error("Invalid date format: '{0}', expected YYYY-MM-DD")]
    InvalidFormat(String),
}

/// エクスポート対象日
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExportDate(NaiveDate);

/// 処理対象の時間範囲（開始を含み、終了を含まない）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ExportDate {
    /// `YYYY-MM-DD` 形式の文字列をパースする
    ///
    /// 年は4桁に限る。符号付きの拡張年や、翌日が表現できない日付は受け付けない。
    pub fn parse(input: &str) -> Result<Self, ExportDateError> {
        let invalid = || ExportDateError::InvalidFormat(input.to_string());
        let trimmed = input.trim();

        let well_formed = trimmed.len() == DATE_LENGTH
            && trimmed.bytes().enumerate().all(|(i, b)| match i {
                4 | 7 => b == b'-',
                _ => b.is_ascii_digit(),
            });
        if !well_formed {
            return Err(invalid());
        }

        let date = NaiveDate::parse_from_str(trimmed, DATE_FORMAT).map_err(|_| invalid())?;
        date.succ_opt().ok_or_else(invalid)?;
        Ok(Self(date))
    }

    /// 指定時刻（UTC）の前日
    ///
    /// 日付の指定がない実行のデフォルト。
    pub fn yesterday(now: DateTime<Utc>) -> Self {
        Self(now.date_naive() - Duration::days(1))
    }

    /// スケジュール起動時刻から対象日を決める
    ///
    /// Lambdaの再試行で起動が遅れても、イベント時刻を基準にするため対象日はずれない。
    pub fn from_schedule_time(time: DateTime<Utc>) -> Self {
        Self::yesterday(time)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// 処理ウィンドウ `[D 00:00, D+1 00:00)`
    pub fn window(&self) -> ExportWindow {
        let start = self.0.and_time(NaiveTime::MIN);
        let end = self
            .0
            .succ_opt()
            .map_or(NaiveDateTime::MAX, |next| next.and_time(NaiveTime::MIN));
        ExportWindow { start, end }
    }
}

impl ExportWindow {
    /// 時刻がウィンドウ内かどうか
    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        *timestamp >= self.start && *timestamp < self.end
    }
}

impl fmt::Display for ExportDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl TryFrom<String> for ExportDate {
    type Error = ExportDateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ExportDate> for String {
    fn from(value: ExportDate) -> Self {
        value.to_string()
    }
}
