// Infrastructure layer modules
pub mod config;
pub mod csv_files;
pub mod database;
pub mod logging;
pub mod notifier;
pub mod object_store;
pub mod parameter_store;
pub mod transaction_source;
pub mod warehouse;
pub mod warehouse_sql;

// Re-exports
pub use config::{AnalyticsConfig, ConfigError, TenantBuckets};
pub use csv_files::{CsvFileError, CsvFileWriter, WrittenFile};
pub use database::{DatabaseError, connect, redact_url};
pub use logging::init_logging;
pub use notifier::{AwsSnsNotifier, Notifier, NotifierError};
pub use object_store::{CSV_CONTENT_TYPE, ObjectStore, ObjectStoreError, S3ObjectStore};
pub use parameter_store::{AwsParameterStore, ParameterStore, ParameterStoreError};
pub use transaction_source::{PgTransactionSource, SourceError, TransactionSource};
pub use warehouse::{LoadReport, PgWarehouse, Warehouse, WarehouseError};
