// Domain layer modules
pub mod dataset;
pub mod deployment;
pub mod export_date;
pub mod star_schema;
pub mod tenant;

// Re-exports
pub use dataset::{CsvError, CsvTable, ExportDataset};
pub use deployment::{DeploymentDescriptor, DeploymentError, TemplateSummary};
pub use export_date::{ExportDate, ExportDateError, ExportWindow};
pub use star_schema::{SourceTransaction, StarBatch};
pub use tenant::{Tenant, TenantParseError};
