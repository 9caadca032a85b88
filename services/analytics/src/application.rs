// アプリケーション層モジュール
pub mod etl;
pub mod export;
pub mod marts;
pub mod pipeline;
pub mod request;

// 再エクスポート
pub use etl::{EtlError, EtlService, EtlSummary};
pub use export::{ExportError, ExportService, ExportSettings, ExportedFile, TenantExport};
pub use marts::MartService;
pub use pipeline::{AnalyticsPipeline, PipelineFailure, PipelineReport, PipelineRequest, StepResult};
pub use request::{ExportRequest, RequestError};
