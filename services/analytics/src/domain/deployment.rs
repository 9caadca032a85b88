//! デプロイ記述子
//!
//! テナントごとのエクスポートLambda（4関数）と、全関数で共有する
//! グローバル設定（ランタイム、タイムアウト、メモリ、環境変数）を表現する。
//! SAMテンプレート（JSON）の生成と、既存テンプレートの構造検証を提供する。

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value, json};
use thiserror::Error;

use super::tenant::Tenant;

/// Lambdaのカスタムランタイム（Rustバイナリ）
pub const RUNTIME: &str = "provided.al2023";

/// Lambdaの最大タイムアウト（15分）
pub const MAX_TIMEOUT_SECONDS: u32 = 900;

/// 毎日 0:00（GMT+8）= 16:00 UTC
pub const DAILY_SCHEDULE: &str = "cron(0 16 * * ? *)";

/// SAMのサーバーレス関数リソース型
pub const FUNCTION_RESOURCE_TYPE: &str = "AWS::Serverless::Function";

/// DB接続文字列の環境変数名
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

const MIN_MEMORY_MB: u32 = 128;
const MAX_MEMORY_MB: u32 = 10_240;

/// デプロイ記述子のエラー型
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeploymentError {
    #[error("Duplicate handler path: {0}")]
    DuplicateHandler(String),

    #[error("Duplicate logical id: {0}")]
    DuplicateLogicalId(String),

    #[error("Tenant declared more than once: {0}")]
    DuplicateTenant(Tenant),

    #[error("Timeout must be between 1 and 900 seconds: {0}")]
    InvalidTimeout(u32),

    #[error("Memory must be between 128 and 10240 MB: {0}")]
    InvalidMemory(u32),

    #[error("Missing global environment variable: {0}")]
    MissingEnvironment(String),

    #[error("Environment variable {variable} references undeclared parameter {parameter}")]
    UndeclaredParameter { variable: String, parameter: String },

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Expected {expected} functions, found {actual}")]
    FunctionCount { expected: usize, actual: usize },

    #[error("Function {0} overrides global setting {1}")]
    OverridesGlobal(String, String),
}

/// 環境変数の値（リテラルまたはテンプレートパラメータ参照）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    Parameter(String),
}

impl EnvValue {
    fn to_json(&self) -> Value {
        match self {
            EnvValue::Literal(value) => Value::String(value.clone()),
            EnvValue::Parameter(name) => json!({ "Ref": name }),
        }
    }
}

/// テンプレートパラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParameter {
    pub name: String,
    pub description: String,
    /// CloudFormationのコンソール/ログに値を表示しない
    pub no_echo: bool,
}

/// 全関数で共有する設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettings {
    pub runtime: String,
    pub architecture: String,
    pub timeout_seconds: u32,
    pub memory_mb: u32,
    pub environment: BTreeMap<String, EnvValue>,
}

/// テナントのエクスポート関数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDefinition {
    pub logical_id: String,
    pub tenant: Tenant,
    /// エントリポイント（cargo-lambdaでビルドするバイナリ名）
    pub handler: String,
    pub code_uri: String,
    pub description: String,
    /// EventBridgeスケジュール式
    pub schedule: Option<String>,
}

/// デプロイ記述子
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    pub description: String,
    pub parameters: Vec<TemplateParameter>,
    pub globals: GlobalSettings,
    pub functions: Vec<FunctionDefinition>,
}

impl FunctionDefinition {
    /// テナントの標準関数定義
    pub fn for_tenant(tenant: Tenant) -> Self {
        Self {
            logical_id: format!("{}ExportFunction", tenant.display_name()),
            tenant,
            handler: tenant.code().to_string(),
            code_uri: ".".to_string(),
            description: format!(
                "Exports {} analytics from the shared Postgres warehouse to its S3 bucket",
                tenant.display_name()
            ),
            schedule: Some(DAILY_SCHEDULE.to_string()),
        }
    }

    fn to_resource(&self) -> Value {
        let mut properties = Map::new();
        properties.insert("Handler".to_string(), json!(self.handler));
        properties.insert("CodeUri".to_string(), json!(self.code_uri));
        properties.insert("Description".to_string(), json!(self.description));

        if let Some(schedule) = &self.schedule {
            properties.insert(
                "Events".to_string(),
                json!({
                    "DailyExport": {
                        "Type": "Schedule",
                        "Properties": {
                            "Schedule": schedule,
                            "Description": format!("Daily {} analytics export", self.tenant.display_name()),
                            "Enabled": true
                        }
                    }
                }),
            );
        }

        json!({
            "Type": FUNCTION_RESOURCE_TYPE,
            "Metadata": {
                "BuildMethod": "rust-cargolambda",
                "BuildProperties": { "Binary": self.handler }
            },
            "Properties": properties
        })
    }
}

impl DeploymentDescriptor {
    /// 標準構成: 4テナント × 同一グローバル設定
    pub fn standard() -> Self {
        let mut environment = BTreeMap::new();
        environment.insert(
            DATABASE_URL_ENV.to_string(),
            EnvValue::Parameter("DatabaseUrl".to_string()),
        );
        environment.insert(
            "TENANT_BUCKETS".to_string(),
            EnvValue::Parameter("TenantBuckets".to_string()),
        );
        environment.insert("RUST_LOG".to_string(), EnvValue::Literal("info".to_string()));

        Self {
            description: "Integreat tenant analytics export functions".to_string(),
            parameters: vec![
                TemplateParameter {
                    name: "DatabaseUrl".to_string(),
                    description: "Postgres connection URI shared by all export functions"
                        .to_string(),
                    no_echo: true,
                },
                TemplateParameter {
                    name: "TenantBuckets".to_string(),
                    description: "Comma separated tenant=bucket pairs".to_string(),
                    no_echo: false,
                },
            ],
            globals: GlobalSettings {
                runtime: RUNTIME.to_string(),
                architecture: "arm64".to_string(),
                timeout_seconds: MAX_TIMEOUT_SECONDS,
                memory_mb: 2048,
                environment,
            },
            functions: Tenant::ALL
                .into_iter()
                .map(FunctionDefinition::for_tenant)
                .collect(),
        }
    }

    /// 記述子の整合性を検証する
    pub fn validate(&self) -> Result<(), DeploymentError> {
        let globals = &self.globals;
        if globals.timeout_seconds == 0 || globals.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(DeploymentError::InvalidTimeout(globals.timeout_seconds));
        }
        if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&globals.memory_mb) {
            return Err(DeploymentError::InvalidMemory(globals.memory_mb));
        }
        if !globals.environment.contains_key(DATABASE_URL_ENV) {
            return Err(DeploymentError::MissingEnvironment(
                DATABASE_URL_ENV.to_string(),
            ));
        }

        let declared: HashSet<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        for (variable, value) in &globals.environment {
            if let EnvValue::Parameter(parameter) = value {
                if !declared.contains(parameter.as_str()) {
                    return Err(DeploymentError::UndeclaredParameter {
                        variable: variable.clone(),
                        parameter: parameter.clone(),
                    });
                }
            }
        }

        let mut handlers = HashSet::new();
        let mut logical_ids = HashSet::new();
        let mut tenants = HashSet::new();
        for function in &self.functions {
            if !handlers.insert(function.handler.as_str()) {
                return Err(DeploymentError::DuplicateHandler(function.handler.clone()));
            }
            if !logical_ids.insert(function.logical_id.as_str()) {
                return Err(DeploymentError::DuplicateLogicalId(
                    function.logical_id.clone(),
                ));
            }
            if !tenants.insert(function.tenant) {
                return Err(DeploymentError::DuplicateTenant(function.tenant));
            }
        }

        Ok(())
    }

    /// SAMテンプレート（JSON）を生成する
    pub fn to_template(&self) -> Value {
        let parameters: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                let mut parameter = json!({
                    "Type": "String",
                    "Description": p.description
                });
                if p.no_echo {
                    parameter["NoEcho"] = json!(true);
                }
                (p.name.clone(), parameter)
            })
            .collect();

        let variables: Map<String, Value> = self
            .globals
            .environment
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();

        let resources: Map<String, Value> = self
            .functions
            .iter()
            .map(|f| (f.logical_id.clone(), f.to_resource()))
            .collect();

        json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Transform": "AWS::Serverless-2016-10-31",
            "Description": self.description,
            "Parameters": parameters,
            "Globals": {
                "Function": {
                    "Runtime": self.globals.runtime,
                    "Architectures": [self.globals.architecture],
                    "Timeout": self.globals.timeout_seconds,
                    "MemorySize": self.globals.memory_mb,
                    "Environment": { "Variables": variables }
                }
            },
            "Resources": resources
        })
    }
}

/// 関数ごとに上書きしてはならないグローバル設定
const GLOBAL_KEYS: [&str; 4] = ["Runtime", "Timeout", "MemorySize", "Environment"];

/// テンプレートから読み取った関数リソース
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSummary {
    pub logical_id: String,
    pub handler: String,
    pub code_uri: Option<String>,
    pub description: Option<String>,
    /// Propertiesで上書きされているグローバル設定キー
    pub overridden_globals: Vec<String>,
}

/// テンプレートの構造の要約
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSummary {
    pub runtime: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub memory_mb: Option<u64>,
    pub environment: BTreeMap<String, Value>,
    pub functions: Vec<FunctionSummary>,
}

impl TemplateSummary {
    /// JSONテンプレートをパースして関数リソースとグローバル設定を抽出する
    pub fn from_json(text: &str) -> Result<Self, DeploymentError> {
        let template: Value = serde_json::from_str(text)
            .map_err(|e| DeploymentError::InvalidTemplate(e.to_string()))?;
        Self::from_value(&template)
    }

    pub fn from_value(template: &Value) -> Result<Self, DeploymentError> {
        let resources = template
            .get("Resources")
            .and_then(Value::as_object)
            .ok_or_else(|| DeploymentError::InvalidTemplate("missing Resources".to_string()))?;

        let globals = template.pointer("/Globals/Function");
        let environment = globals
            .and_then(|g| g.pointer("/Environment/Variables"))
            .and_then(Value::as_object)
            .map(|vars| {
                vars.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        let mut functions = Vec::new();
        for (logical_id, resource) in resources {
            if resource.get("Type").and_then(Value::as_str) != Some(FUNCTION_RESOURCE_TYPE) {
                continue;
            }
            let properties = resource.get("Properties").and_then(Value::as_object).ok_or_else(
                || DeploymentError::InvalidTemplate(format!("{} has no Properties", logical_id)),
            )?;
            let handler = properties
                .get("Handler")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DeploymentError::InvalidTemplate(format!("{} has no Handler", logical_id))
                })?
                .to_string();

            functions.push(FunctionSummary {
                logical_id: logical_id.clone(),
                handler,
                code_uri: properties
                    .get("CodeUri")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                description: properties
                    .get("Description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                overridden_globals: GLOBAL_KEYS
                    .iter()
                    .filter(|key| properties.contains_key(**key))
                    .map(|key| key.to_string())
                    .collect(),
            });
        }

        Ok(Self {
            runtime: globals
                .and_then(|g| g.get("Runtime"))
                .and_then(Value::as_str)
                .map(str::to_string),
            timeout_seconds: globals.and_then(|g| g.get("Timeout")).and_then(Value::as_u64),
            memory_mb: globals
                .and_then(|g| g.get("MemorySize"))
                .and_then(Value::as_u64),
            environment,
            functions,
        })
    }

    /// 関数数・ハンドラーの一意性・グローバル設定の共有を検証する
    pub fn check_structure(&self, expected_functions: usize) -> Result<(), DeploymentError> {
        if self.functions.len() != expected_functions {
            return Err(DeploymentError::FunctionCount {
                expected: expected_functions,
                actual: self.functions.len(),
            });
        }

        let mut handlers = HashSet::new();
        for function in &self.functions {
            if !handlers.insert(function.handler.as_str()) {
                return Err(DeploymentError::DuplicateHandler(function.handler.clone()));
            }
            if let Some(key) = function.overridden_globals.first() {
                return Err(DeploymentError::OverridesGlobal(
                    function.logical_id.clone(),
                    key.clone(),
                ));
            }
        }

        if !self.environment.contains_key(DATABASE_URL_ENV) {
            return Err(DeploymentError::MissingEnvironment(
                DATABASE_URL_ENV.to_string(),
            ));
        }
        if self.runtime.is_none() {
            return Err(DeploymentError::InvalidTemplate(
                "missing Globals.Function.Runtime".to_string(),
            ));
        }

        Ok(())
    }
}
