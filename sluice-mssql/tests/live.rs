//! Round trips against a live SQL Server.
//!
//! Skipped unless `SLUICE_TEST_MSSQL_URL` holds a connection string for a
//! database where the test may create `dbo.sluice_stock`.

use pretty_assertions::assert_eq;
use sluice_core::prelude::*;
use sluice_core::{Statement, StatementKind};
use sluice_mssql::MssqlConnection;

#[derive(Debug, Clone, Default, PartialEq)]
struct StockLevel {
    warehouse: i32,
    sku: String,
    on_hand: i32,
}

sluice_core::impl_entity!(StockLevel, table = "sluice_stock";
    warehouse: "WarehouseId" => SqlType::Int, key;
    sku: "Sku" => SqlType::Text(Some(20)), key;
    on_hand: "OnHand" => SqlType::Int;
);

async fn connection() -> Option<MssqlConnection> {
    let conn_str = std::env::var("SLUICE_TEST_MSSQL_URL").ok()?;
    let mut conn = MssqlConnection::from_connection_string(&conn_str).unwrap();
    conn.open()
        .await
        .unwrap_or_else(|e| panic!("cannot reach SQL Server: {}", e));
    conn.execute(&Statement::new(
        StatementKind::Setup,
        "IF OBJECT_ID(N'dbo.sluice_stock') IS NOT NULL DROP TABLE [dbo].[sluice_stock]; \
         CREATE TABLE [dbo].[sluice_stock] ( \
             [WarehouseId] int NOT NULL, \
             [Sku] nvarchar(20) NOT NULL, \
             [OnHand] int NOT NULL, \
             PRIMARY KEY ([WarehouseId], [Sku]))",
    ))
    .await
    .unwrap();
    Some(conn)
}

fn level(warehouse: i32, sku: &str, on_hand: i32) -> StockLevel {
    StockLevel {
        warehouse,
        sku: sku.to_string(),
        on_hand,
    }
}

#[tokio::test]
async fn test_composite_key_round_trip() {
    let Some(mut conn) = connection().await else {
        return;
    };
    let mut ctx = BulkContext::new(&mut conn);

    let mut levels = vec![level(1, "A-1", 5), level(1, "B-2", 0), level(2, "A-1", 9)];
    let added = ctx.bulk_add(&mut levels).await.unwrap();
    assert_eq!(added.inserted_keys.len(), 3);

    let keys = vec![Key::from((1, "A-1")), Key::from((2, "A-1"))];
    let updated = ctx
        .bulk_update_with(&Query::all(), &keys, &["on_hand"], |key| StockLevel {
            on_hand: if key.values()[0] == Value::Int(1) { 50 } else { 90 },
            ..StockLevel::default()
        })
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let mut feed = vec![level(1, "A-1", 49), level(3, "C-3", 1)];
    let warehouse_one = Query::<StockLevel>::all().where_eq("warehouse", 1);
    let merged = ctx
        .bulk_merge(&warehouse_one, &mut feed, MergeOptions::delete())
        .await
        .unwrap();
    assert_eq!(merged.rows_affected, 3);

    let gone = [Key::from((2, "A-1")), Key::from((9, "none"))];
    let removed = ctx
        .bulk_remove_keys(&Query::<StockLevel>::all(), &gone)
        .await
        .unwrap();
    assert_eq!(removed, 1);

    conn.execute(&Statement::new(
        StatementKind::Cleanup,
        "DROP TABLE [dbo].[sluice_stock]",
    ))
    .await
    .unwrap();
}
