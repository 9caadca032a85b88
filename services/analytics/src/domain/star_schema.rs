/// スタースキーマ変換
///
/// OLTPのAPIトランザクション行を、OLAPスキーマのディメンション
/// （時間・ロケーション・ユーザー・サービス）とファクト行に変換する。
/// DBに依存しない純粋な変換のみを扱い、ID採番はウェアハウス側で行う。
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::hash::{Hash, Hasher};

use chrono::{Datelike, NaiveDateTime, Timelike};

use super::export_date::ExportWindow;
use super::tenant::Tenant;

/// 欠損値の代替表記
pub const UNKNOWN: &str = "Unknown";

/// テナント間通信のサービス種別
pub const SERVICE_TYPE_SYSTEM: &str = "System-to-System";

/// 外部サービス呼び出しのサービス種別
pub const SERVICE_TYPE_THIRD_PARTY: &str = "3rd-Party";

/// OLTPテーブルの1行（APIトランザクションログ）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceTransaction {
    pub log_id: i64,
    pub created_at: NaiveDateTime,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub role: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub api_version: Option<String>,
    pub request_method: Option<String>,
    pub request_url: Option<String>,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub execution_time_ms: Option<i32>,
    pub error_message: Option<String>,
}

/// 時間ディメンションのキー（秒単位に切り捨てたタイムスタンプ）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeKey {
    pub timestamp: NaiveDateTime,
    pub hour: i32,
    pub day: i32,
    pub month: i32,
    pub year: i32,
}

/// ロケーションディメンションのキー
#[derive(Debug, Clone)]
pub struct LocationKey {
    pub country: String,
    pub region: String,
    pub city: String,
    pub zip_code: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// ユーザーディメンションのキー
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserKey {
    pub role: String,
    pub origin: String,
}

/// サービスディメンションのキー
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub destination: String,
    pub api_version: String,
    pub service_type: String,
}

/// ファクト行（ディメンションはキーで参照する）
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub log_id: i64,
    pub time: TimeKey,
    pub location: LocationKey,
    pub user: UserKey,
    pub service: ServiceKey,
    pub request_method: Option<String>,
    pub request_url: Option<String>,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub execution_time_ms: Option<i32>,
    pub error_message: Option<String>,
}

/// 1ウィンドウ分の変換結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarBatch {
    pub times: Vec<TimeKey>,
    pub locations: Vec<LocationKey>,
    pub users: Vec<UserKey>,
    pub services: Vec<ServiceKey>,
    pub facts: Vec<FactRow>,
    /// ウィンドウ外または重複log_idとして除外した行数
    pub skipped: usize,
}

impl LocationKey {
    /// 浮動小数点を含めた全順序比較用のタプル
    fn cmp_key(&self) -> (&str, &str, &str, &str) {
        (&self.country, &self.region, &self.city, &self.zip_code)
    }
}

impl PartialEq for LocationKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LocationKey {}

impl PartialOrd for LocationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_key()
            .cmp(&other.cmp_key())
            .then_with(|| self.latitude.total_cmp(&other.latitude))
            .then_with(|| self.longitude.total_cmp(&other.longitude))
    }
}

impl Hash for LocationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cmp_key().hash(state);
        self.latitude.to_bits().hash(state);
        self.longitude.to_bits().hash(state);
    }
}

/// Postgresの`initcap`と同じ規則で単語の先頭を大文字、残りを小文字にする
///
/// 英数字以外の文字を単語の区切りとして扱う。
pub fn initcap(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut in_word = false;

    for ch in input.chars() {
        if ch.is_alphanumeric() {
            if in_word {
                output.extend(ch.to_lowercase());
            } else {
                output.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            output.push(ch);
            in_word = false;
        }
    }

    output
}

/// originとroleの組み合わせを検証したロール
///
/// originがテナントに一致し、そのテナントで有効なロールの場合のみ元の値を残す。
pub fn validate_role(origin: &str, role: &str) -> String {
    match Tenant::from_origin(origin) {
        Some(tenant) if tenant.accepts_role(role) => role.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// 呼び出し先からサービス種別を分類する
pub fn classify_service(destination: &str) -> &'static str {
    if Tenant::is_tenant_destination(destination) {
        SERVICE_TYPE_SYSTEM
    } else {
        SERVICE_TYPE_THIRD_PARTY
    }
}

/// 作成時刻から時間ディメンションのキーを作る
pub fn time_key(created_at: &NaiveDateTime) -> TimeKey {
    let timestamp = created_at.with_nanosecond(0).unwrap_or(*created_at);
    TimeKey {
        timestamp,
        hour: timestamp.hour() as i32,
        day: timestamp.day() as i32,
        month: timestamp.month() as i32,
        year: timestamp.year(),
    }
}

fn text_or_unknown(value: &Option<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

impl SourceTransaction {
    pub fn location_key(&self) -> LocationKey {
        LocationKey {
            country: text_or_unknown(&self.country),
            region: text_or_unknown(&self.region),
            city: text_or_unknown(&self.city),
            zip_code: text_or_unknown(&self.zip_code),
            latitude: self.latitude.unwrap_or(0.0),
            longitude: self.longitude.unwrap_or(0.0),
        }
    }

    pub fn user_key(&self) -> UserKey {
        let origin = self.origin.as_deref().map(str::trim).unwrap_or_default();
        let role = self.role.as_deref().map(str::trim).unwrap_or_default();

        UserKey {
            role: validate_role(origin, role),
            origin: if origin.is_empty() {
                UNKNOWN.to_string()
            } else {
                initcap(origin)
            },
        }
    }

    pub fn service_key(&self) -> ServiceKey {
        let destination = text_or_unknown(&self.destination);
        let service_type = classify_service(&destination).to_string();
        ServiceKey {
            destination,
            api_version: text_or_unknown(&self.api_version),
            service_type,
        }
    }

    pub fn to_fact(&self) -> FactRow {
        FactRow {
            log_id: self.log_id,
            time: time_key(&self.created_at),
            location: self.location_key(),
            user: self.user_key(),
            service: self.service_key(),
            request_method: self.request_method.clone(),
            request_url: self.request_url.clone(),
            request_headers: self.request_headers.clone(),
            request_body: self.request_body.clone(),
            response_status_code: self.response_status_code,
            response_body: self.response_body.clone(),
            execution_time_ms: self.execution_time_ms,
            error_message: self.error_message.clone(),
        }
    }
}

impl StarBatch {
    /// トランザクション行をウィンドウで絞り込み、スタースキーマに変換する
    ///
    /// ディメンションは重複を除いてソート済みで返す。
    /// 同じlog_idが複数ある場合は最初の行を採用する。
    pub fn from_transactions(transactions: &[SourceTransaction], window: &ExportWindow) -> Self {
        let mut times = BTreeSet::new();
        let mut locations = BTreeSet::new();
        let mut users = BTreeSet::new();
        let mut services = BTreeSet::new();
        let mut seen_log_ids = HashSet::new();
        let mut facts = Vec::with_capacity(transactions.len());
        let mut skipped = 0;

        for transaction in transactions {
            if !window.contains(&transaction.created_at) || !seen_log_ids.insert(transaction.log_id)
            {
                skipped += 1;
                continue;
            }

            let fact = transaction.to_fact();
            times.insert(fact.time.clone());
            locations.insert(fact.location.clone());
            users.insert(fact.user.clone());
            services.insert(fact.service.clone());
            facts.push(fact);
        }

        Self {
            times: times.into_iter().collect(),
            locations: locations.into_iter().collect(),
            users: users.into_iter().collect(),
            services: services.into_iter().collect(),
            facts,
            skipped,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// ディメンション行の合計
    pub fn dimension_count(&self) -> usize {
        self.times.len() + self.locations.len() + self.users.len() + self.services.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::ExportDate;
    use chrono::NaiveDate;

    pub(crate) fn at(date: &str, hms: (u32, u32, u32), nanos: u32) -> NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_nano_opt(hms.0, hms.1, hms.2, nanos)
            .unwrap()
    }

    /// テスト用のトランザクション行を作成
    pub(crate) fn transaction(log_id: i64, created_at: NaiveDateTime) -> SourceTransaction {
        SourceTransaction {
            log_id,
            created_at,
            country: Some("Philippines".to_string()),
            region: Some("NCR".to_string()),
            city: Some("Manila".to_string()),
            zip_code: Some("1000".to_string()),
            latitude: Some(14.5995),
            longitude: Some(120.9842),
            role: Some("Student".to_string()),
            origin: Some("campus".to_string()),
            destination: Some("Teleo".to_string()),
            api_version: Some("v1".to_string()),
            request_method: Some("GET".to_string()),
            request_url: Some("/api/v1/courses".to_string()),
            request_headers: None,
            request_body: None,
            response_status_code: Some(200),
            response_body: Some("{}".to_string()),
            execution_time_ms: Some(42),
            error_message: None,
        }
    }

    #[test]
    fn test_initcap() {
        assert_eq!(initcap("campus"), "Campus");
        assert_eq!(initcap("EVNTGARDE"), "Evntgarde");
        assert_eq!(initcap("hello world-foo_bar"), "Hello World-Foo_Bar");
        assert_eq!(initcap("v2api"), "V2api");
        assert_eq!(initcap(""), "");
    }

    #[test]
    fn test_validate_role_accepts_tenant_roles() {
        assert_eq!(validate_role("teleo", "Pastor"), "Pastor");
        assert_eq!(validate_role("Campus", "Admin"), "Admin");
        assert_eq!(validate_role("PILLARS", "Dean"), "Dean");
        assert_eq!(validate_role("evntgarde", "Vendor"), "Vendor");
    }

    #[test]
    fn test_validate_role_rejects_foreign_or_unknown() {
        // 他テナントのロール
        assert_eq!(validate_role("campus", "Pastor"), UNKNOWN);
        // 大文字小文字違い
        assert_eq!(validate_role("campus", "student"), UNKNOWN);
        // テナント以外のorigin
        assert_eq!(validate_role("stripe", "Student"), UNKNOWN);
        assert_eq!(validate_role("", ""), UNKNOWN);
    }

    #[test]
    fn test_classify_service() {
        assert_eq!(classify_service("Campus"), SERVICE_TYPE_SYSTEM);
        assert_eq!(classify_service("Pillars"), SERVICE_TYPE_SYSTEM);
        assert_eq!(classify_service("campus"), SERVICE_TYPE_THIRD_PARTY);
        assert_eq!(classify_service("Paymongo"), SERVICE_TYPE_THIRD_PARTY);
    }

    #[test]
    fn test_time_key_truncates_to_second() {
        let key = time_key(&at("2025-05-04", (13, 7, 9), 987_000_000));

        assert_eq!(key.timestamp, at("2025-05-04", (13, 7, 9), 0));
        assert_eq!((key.hour, key.day, key.month, key.year), (13, 4, 5, 2025));
    }

    #[test]
    fn test_user_key_normalizes_origin() {
        let mut tx = transaction(1, at("2025-05-04", (0, 0, 0), 0));
        tx.origin = Some("  teLEO ".to_string());
        tx.role = Some("Guest".to_string());

        let key = tx.user_key();
        assert_eq!(key.origin, "Teleo");
        assert_eq!(key.role, "Guest");

        tx.origin = None;
        let key = tx.user_key();
        assert_eq!(key.origin, UNKNOWN);
        assert_eq!(key.role, UNKNOWN);
    }

    #[test]
    fn test_location_key_fills_missing_values() {
        let mut tx = transaction(1, at("2025-05-04", (0, 0, 0), 0));
        tx.city = None;
        tx.zip_code = Some("   ".to_string());
        tx.latitude = None;

        let key = tx.location_key();
        assert_eq!(key.city, UNKNOWN);
        assert_eq!(key.zip_code, UNKNOWN);
        assert_eq!(key.latitude, 0.0);
        assert_eq!(key.longitude, 120.9842);
    }

    #[test]
    fn test_batch_filters_window_and_duplicates() {
        let window = ExportDate::parse("2025-05-04").unwrap().window();
        let transactions = vec![
            transaction(1, at("2025-05-04", (0, 0, 0), 0)),
            transaction(2, at("2025-05-04", (23, 59, 59), 500)),
            // ウィンドウ外（前日・翌日0時）
            transaction(3, at("2025-05-03", (23, 59, 59), 0)),
            transaction(4, at("2025-05-05", (0, 0, 0), 0)),
            // 重複log_id
            transaction(1, at("2025-05-04", (12, 0, 0), 0)),
        ];

        let batch = StarBatch::from_transactions(&transactions, &window);

        assert_eq!(batch.facts.len(), 2);
        assert_eq!(batch.skipped, 3);
        assert_eq!(
            batch.facts.iter().map(|f| f.log_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(batch.facts[0].time.hour, 0);
    }

    #[test]
    fn test_batch_deduplicates_dimensions() {
        let window = ExportDate::parse("2025-05-04").unwrap().window();
        let mut third = transaction(3, at("2025-05-04", (9, 30, 0), 0));
        third.destination = Some("Google Maps".to_string());
        let transactions = vec![
            transaction(1, at("2025-05-04", (9, 30, 0), 100)),
            transaction(2, at("2025-05-04", (9, 30, 0), 900)),
            third,
        ];

        let batch = StarBatch::from_transactions(&transactions, &window);

        // 同一秒は1つの時間キーにまとまる
        assert_eq!(batch.times.len(), 1);
        assert_eq!(batch.locations.len(), 1);
        assert_eq!(batch.users.len(), 1);
        assert_eq!(batch.services.len(), 2);
        assert_eq!(batch.dimension_count(), 5);

        let types: Vec<&str> = batch
            .services
            .iter()
            .map(|s| s.service_type.as_str())
            .collect();
        assert!(types.contains(&SERVICE_TYPE_SYSTEM));
        assert!(types.contains(&SERVICE_TYPE_THIRD_PARTY));
    }

    #[test]
    fn test_empty_batch() {
        let window = ExportDate::parse("2025-05-04").unwrap().window();
        let batch = StarBatch::from_transactions(&[], &window);

        assert!(batch.is_empty());
        assert_eq!(batch, StarBatch::default());
    }
}
