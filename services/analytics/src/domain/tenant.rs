/// テナント定義
///
/// Integreatのアナリティクスをエクスポートする4つのテナントと、
/// テナントごとに有効なユーザーロールを定義する。
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// テナント名のパースエラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantParseError {
    #[error("Unknown tenant: '{0}'")]
    UnknownTenant(String),
}

/// エクスポート対象のテナント
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Tenant {
    Campus,
    Teleo,
    Pillars,
    Evntgarde,
}

impl Tenant {
    /// 全テナント（デプロイ記述子の関数順と同じ）
    pub const ALL: [Tenant; 4] = [
        Tenant::Campus,
        Tenant::Teleo,
        Tenant::Pillars,
        Tenant::Evntgarde,
    ];

    /// 小文字のテナントコード（バイナリ名、ファイル名、テーブル名に使用）
    pub fn code(&self) -> &'static str {
        match self {
            Tenant::Campus => "campus",
            Tenant::Teleo => "teleo",
            Tenant::Pillars => "pillars",
            Tenant::Evntgarde => "evntgarde",
        }
    }

    /// ウェアハウス上の表記（origin/destination列の値）
    pub fn display_name(&self) -> &'static str {
        match self {
            Tenant::Campus => "Campus",
            Tenant::Teleo => "Teleo",
            Tenant::Pillars => "Pillars",
            Tenant::Evntgarde => "Evntgarde",
        }
    }

    /// テナントのアプリケーションで有効なロール
    ///
    /// この一覧にないロールは`Unknown`に正規化される。
    pub fn allowed_roles(&self) -> &'static [&'static str] {
        match self {
            Tenant::Teleo => &["Normal_User", "Guest", "Church_Admin", "Pastor"],
            Tenant::Campus => &["Student", "Professor", "Admin"],
            Tenant::Evntgarde => &["Customer", "Organizer", "Vendor"],
            Tenant::Pillars => &["Employer", "Dean", "Professor", "Student"],
        }
    }

    /// ロールがこのテナントで有効かどうか（大文字小文字を区別する）
    pub fn accepts_role(&self, role: &str) -> bool {
        self.allowed_roles().contains(&role)
    }

    /// origin値からテナントを特定する（大文字小文字を区別しない完全一致）
    pub fn from_origin(origin: &str) -> Option<Tenant> {
        Tenant::ALL
            .into_iter()
            .find(|tenant| tenant.code().eq_ignore_ascii_case(origin))
    }

    /// destination値がテナントを指しているかどうか（表記の完全一致）
    pub fn is_tenant_destination(destination: &str) -> bool {
        Tenant::ALL
            .iter()
            .any(|tenant| tenant.display_name() == destination)
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Tenant {
    type Err = TenantParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Tenant::ALL
            .into_iter()
            .find(|tenant| tenant.code().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| TenantParseError::UnknownTenant(s.to_string()))
    }
}

impl TryFrom<String> for Tenant {
    type Error = TenantParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_display_names() {
        assert_eq!(Tenant::Campus.code(), "campus");
        assert_eq!(Tenant::Evntgarde.code(), "evntgarde");
        assert_eq!(Tenant::Teleo.display_name(), "Teleo");
        assert_eq!(Tenant::Pillars.to_string(), "pillars");
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!("Campus".parse::<Tenant>().unwrap(), Tenant::Campus);
        assert_eq!(" TELEO ".parse::<Tenant>().unwrap(), Tenant::Teleo);
        assert_eq!("evntgarde".parse::<Tenant>().unwrap(), Tenant::Evntgarde);
    }

    #[test]
    fn test_from_str_unknown() {
        let err = "integreat".parse::<Tenant>().unwrap_err();
        assert_eq!(err, TenantParseError::UnknownTenant("integreat".to_string()));
        assert_eq!(err.to_string(), "Unknown tenant: 'integreat'");
    }

    #[test]
    fn test_allowed_roles() {
        assert!(Tenant::Teleo.accepts_role("Church_Admin"));
        assert!(Tenant::Campus.accepts_role("Professor"));
        assert!(Tenant::Pillars.accepts_role("Professor"));
        assert!(!Tenant::Evntgarde.accepts_role("Professor"));
        // 大文字小文字は区別する
        assert!(!Tenant::Campus.accepts_role("student"));
    }

    #[test]
    fn test_from_origin() {
        assert_eq!(Tenant::from_origin("CAMPUS"), Some(Tenant::Campus));
        assert_eq!(Tenant::from_origin("pillars"), Some(Tenant::Pillars));
        assert_eq!(Tenant::from_origin("campus-app"), None);
        assert_eq!(Tenant::from_origin(""), None);
    }

    #[test]
    fn test_is_tenant_destination() {
        assert!(Tenant::is_tenant_destination("Evntgarde"));
        assert!(!Tenant::is_tenant_destination("evntgarde"));
        assert!(!Tenant::is_tenant_destination("Stripe"));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Tenant::Campus).unwrap();
        assert_eq!(json, "\"campus\"");
        let tenant: Tenant = serde_json::from_str("\"teleo\"").unwrap();
        assert_eq!(tenant, Tenant::Teleo);
    }

    #[test]
    fn test_deserialize_is_case_insensitive() {
        let tenants: Vec<Tenant> = serde_json::from_str(r#"["Campus", "TELEO", " pillars "]"#).unwrap();
        assert_eq!(tenants, vec![Tenant::Campus, Tenant::Teleo, Tenant::Pillars]);

        let err = serde_json::from_str::<Tenant>("\"integreat\"").unwrap_err();
        assert!(err.to_string().contains("Unknown tenant: 'integreat'"));
    }
}
