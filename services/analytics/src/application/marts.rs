/// テナントマート再構築サービス
///
/// テナントごとのフラットテーブル`"OLAP".mart_<tenant>`を、
/// 対象ウィンドウのスライスで作り直す。
use tracing::info;

use crate::domain::{ExportWindow, Tenant};
use crate::infrastructure::{Warehouse, WarehouseError};

/// マート再構築サービス
pub struct MartService<W>
where
    W: Warehouse,
{
    warehouse: W,
}

impl<W> MartService<W>
where
    W: Warehouse,
{
    pub fn new(warehouse: W) -> Self {
        Self { warehouse }
    }

    /// 1テナントのマートを再構築し、行数を返す
    pub async fn rebuild(&self, tenant: Tenant, window: &ExportWindow) -> Result<u64, WarehouseError> {
        let rows = self.warehouse.rebuild_mart(tenant, window).await?;
        info!(tenant = %tenant, rows, "マート更新");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExportDate;
    use crate::infrastructure::warehouse::tests::{MockWarehouse, WarehouseCall};

    #[tokio::test]
    async fn test_rebuild_returns_rows() {
        let warehouse = MockWarehouse::new().with_mart_rows(Tenant::Teleo, 42);
        let service = MartService::new(warehouse.clone());
        let window = ExportDate::parse("2025-07-01").unwrap().window();

        assert_eq!(service.rebuild(Tenant::Teleo, &window).await.unwrap(), 42);
        assert_eq!(warehouse.calls(), vec![WarehouseCall::RebuildMart(Tenant::Teleo)]);
    }
}
