//! Bulk operations against the in-memory dialect.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use sluice_core::entity::SqlType;
use sluice_core::memory::MemoryDatabase;
use sluice_core::prelude::*;
use sluice_core::{ResultRow, Statement};

#[derive(Debug, Clone, Default, PartialEq)]
struct Customer {
    id: i64,
    name: Option<String>,
    region: String,
}

sluice_core::impl_entity!(Customer, table = "Customers", schema = "sales";
    id: "CustomerId" => SqlType::BigInt, key, generated;
    name: "Name" => SqlType::Text(Some(50)), nullable;
    region: "Region" => SqlType::Text(Some(8));
);

#[derive(Debug, Clone, Default, PartialEq)]
struct Seat {
    row: String,
    number: i32,
    holder: Option<String>,
}

sluice_core::impl_entity!(Seat, table = "Seats";
    row: "Row" => SqlType::Text(Some(2)), key;
    number: "Number" => SqlType::Int, key;
    holder: "Holder" => SqlType::Text(None), nullable;
);

#[derive(Debug, Clone, Default)]
struct AuditLine {
    message: String,
}

sluice_core::impl_entity!(AuditLine, table = "AuditLines";
    message: "Message" => SqlType::Text(None);
);

fn customer(name: &str, region: &str) -> Customer {
    Customer {
        id: 0,
        name: Some(name.to_string()),
        region: region.to_string(),
    }
}

fn seat(row: &str, number: i32) -> Seat {
    Seat {
        row: row.to_string(),
        number,
        holder: None,
    }
}

fn seeded_customers(db: &MemoryDatabase, eu: usize, us: usize) {
    let mut rows = Vec::new();
    for i in 0..eu + us {
        let region = if i < eu { "EU" } else { "US" };
        rows.push(Customer {
            id: i as i64 + 1,
            name: Some(format!("c{}", i + 1)),
            region: region.to_string(),
        });
    }
    db.seed(&rows).unwrap();
}

#[tokio::test]
async fn test_add_assigns_sequential_keys_and_keeps_nulls() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut records: Vec<Customer> = (0..10)
        .map(|i| customer(&format!("n{}", i), "EU"))
        .collect();
    records[0].name = None;

    let outcome = ctx.bulk_add(&mut records).await.unwrap();

    assert_eq!(outcome.rows_affected, 10);
    assert_eq!(outcome.inserted_keys.len(), 10);
    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    assert_eq!(records[0].name, None);
    for (i, record) in records.iter().enumerate().skip(1) {
        assert_eq!(record.name.as_deref(), Some(format!("n{}", i).as_str()));
    }

    let stored = db.find::<Customer>(&Key::from(1i64)).unwrap().unwrap();
    assert_eq!(stored.name, None);
}

#[tokio::test]
async fn test_add_never_reuses_an_explicit_key() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut records = vec![
        customer("a", "EU"),
        Customer {
            id: 2,
            ..customer("b", "EU")
        },
        customer("c", "EU"),
    ];
    let outcome = ctx.bulk_add(&mut records).await.unwrap();

    assert_eq!(outcome.rows_affected, 3);
    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 2, 4]);
    assert_eq!(db.count::<Customer>(), 3);
}

#[tokio::test]
async fn test_inserted_keys_follow_input_order_past_chunk_size() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut records: Vec<Customer> = (0..2500)
        .map(|i| customer(&format!("bulk-{}", i), "EU"))
        .collect();
    let outcome = ctx.bulk_add(&mut records).await.unwrap();
    assert_eq!(outcome.inserted_keys.len(), 2500);

    for (i, key) in outcome.inserted_keys.iter().enumerate() {
        let stored = db.find::<Customer>(key).unwrap().unwrap();
        assert_eq!(stored, records[i]);
        assert_eq!(stored.name.as_deref(), Some(format!("bulk-{}", i).as_str()));
    }
}

#[tokio::test]
async fn test_merge_updates_and_inserts_within_filter() {
    let db = MemoryDatabase::new();
    seeded_customers(&db, 5, 3);
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut incoming: Vec<Customer> = (1..=5)
        .map(|id| Customer {
            id,
            name: Some(format!("updated-{}", id)),
            region: "EU".to_string(),
        })
        .collect();
    incoming.push(customer("fresh-a", "EU"));
    incoming.push(customer("fresh-b", "EU"));

    let query = Query::<Customer>::all().where_eq("region", "EU");
    let outcome = ctx
        .bulk_merge(&query, &mut incoming, MergeOptions::delete())
        .await
        .unwrap();

    assert_eq!(outcome.rows_affected, 7);
    assert_eq!(outcome.inserted_keys.len(), 2);
    assert_eq!(incoming[5].id, 9);
    assert_eq!(incoming[6].id, 10);
    assert_eq!(db.count::<Customer>(), 10);

    let stored = db.find::<Customer>(&Key::from(3i64)).unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("updated-3"));
    let untouched = db.find::<Customer>(&Key::from(7i64)).unwrap().unwrap();
    assert_eq!(untouched.name.as_deref(), Some("c7"));
}

#[tokio::test]
async fn test_merge_not_matched_delete_versus_do_nothing() {
    for (options, expected_remaining) in [
        (MergeOptions::<Customer>::delete(), 3),
        (MergeOptions::<Customer>::do_nothing(), 4),
    ] {
        let db = MemoryDatabase::new();
        seeded_customers(&db, 3, 0);
        let mut conn = db.connect();
        let mut ctx = BulkContext::new(&mut conn);

        let mut incoming = vec![
            Customer {
                id: 2,
                name: Some("two".into()),
                region: "EU".into(),
            },
            Customer {
                id: 3,
                name: Some("three".into()),
                region: "EU".into(),
            },
            customer("four", "EU"),
        ];
        ctx.bulk_merge(&Query::all(), &mut incoming, options)
            .await
            .unwrap();

        assert_eq!(db.count::<Customer>(), expected_remaining);
        let first = db.find::<Customer>(&Key::from(1i64)).unwrap();
        assert_eq!(first.is_some(), expected_remaining == 4);
        let second = db.find::<Customer>(&Key::from(2i64)).unwrap().unwrap();
        assert_eq!(second.name.as_deref(), Some("two"));
    }
}

#[tokio::test]
async fn test_merge_updates_unmatched_rows_from_replacement() {
    let db = MemoryDatabase::new();
    seeded_customers(&db, 3, 0);
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut incoming = vec![Customer {
        id: 1,
        name: Some("kept".into()),
        region: "EU".into(),
    }];
    let replacement = Customer {
        region: "ARCHIVE".into(),
        ..Customer::default()
    };
    let outcome = ctx
        .bulk_merge(
            &Query::all(),
            &mut incoming,
            MergeOptions::update_unmatched(replacement, &["region"]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.rows_affected, 3);
    let archived = db
        .select(&Query::<Customer>::all().where_eq("region", "ARCHIVE"))
        .unwrap();
    let mut ids: Vec<i64> = archived.iter().map(|c| c.id).collect();
    ids.sort();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(archived[0].name.as_deref(), Some("c2"));
}

#[tokio::test]
async fn test_merge_respects_excluded_properties() {
    let db = MemoryDatabase::new();
    seeded_customers(&db, 1, 0);
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut incoming = vec![Customer {
        id: 1,
        name: Some("renamed".into()),
        region: "APAC".into(),
    }];
    ctx.bulk_merge(
        &Query::all(),
        &mut incoming,
        MergeOptions::do_nothing().exclude(&["name"]),
    )
    .await
    .unwrap();

    let stored = db.find::<Customer>(&Key::from(1i64)).unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("c1"));
    assert_eq!(stored.region, "APAC");
}

#[tokio::test]
async fn test_merge_rejects_unknown_excluded_property() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut incoming = vec![customer("x", "EU")];
    let err = ctx
        .bulk_merge(
            &Query::all(),
            &mut incoming,
            MergeOptions::do_nothing().exclude(&["nickname"]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownProperty);
    assert_eq!(db.count::<Customer>(), 0);
}

#[tokio::test]
async fn test_remove_by_keys_is_idempotent() {
    let db = MemoryDatabase::new();
    seeded_customers(&db, 5, 0);
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let keys: Vec<Key> = [1i64, 2, 3].into_iter().map(Key::from).collect();
    let query = Query::<Customer>::all();

    assert_eq!(ctx.bulk_remove_keys(&query, &keys).await.unwrap(), 3);
    assert_eq!(ctx.bulk_remove_keys(&query, &keys).await.unwrap(), 0);
    assert_eq!(db.count::<Customer>(), 2);
}

#[tokio::test]
async fn test_remove_and_update_follow_the_query() {
    let db = MemoryDatabase::new();
    seeded_customers(&db, 2, 3);
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let us = Query::<Customer>::all().where_eq("region", "US");
    let replacement = Customer {
        name: Some("anonymized".into()),
        ..Customer::default()
    };
    assert_eq!(ctx.bulk_update(&us, &replacement, &["name"]).await.unwrap(), 3);
    let renamed = db
        .select(&Query::<Customer>::all().where_eq("name", "anonymized"))
        .unwrap();
    assert_eq!(renamed.len(), 3);

    assert_eq!(ctx.bulk_remove(&us).await.unwrap(), 3);
    assert_eq!(db.count::<Customer>(), 2);
}

#[tokio::test]
async fn test_update_rejects_key_properties() {
    let db = MemoryDatabase::new();
    seeded_customers(&db, 1, 0);
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let err = ctx
        .bulk_update(&Query::<Customer>::all(), &Customer::default(), &["id"])
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_composite_keys_match_whole_tuples_only() {
    let db = MemoryDatabase::new();
    db.seed(&[seat("A", 1), seat("A", 2), seat("B", 1), seat("B", 2)])
        .unwrap();
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let keys = vec![Key::from(("A", 2)), Key::from(("B", 1))];

    let joined = ctx.join(Query::<Seat>::all(), &keys).unwrap();
    let mut matched: Vec<(String, i32)> = db
        .select(&joined)
        .unwrap()
        .into_iter()
        .map(|s| (s.row, s.number))
        .collect();
    matched.sort();
    assert_eq!(matched, vec![("A".to_string(), 2), ("B".to_string(), 1)]);

    let updated = ctx
        .bulk_update_with(&Query::all(), &keys, &["holder"], |key| Seat {
            holder: Some(format!("holder {}", key)),
            ..Seat::default()
        })
        .await
        .unwrap();
    assert_eq!(updated, 2);
    let a1 = db.find::<Seat>(&Key::from(("A", 1))).unwrap().unwrap();
    assert_eq!(a1.holder, None);
    let b1 = db.find::<Seat>(&Key::from(("B", 1))).unwrap().unwrap();
    assert!(b1.holder.is_some());

    assert_eq!(ctx.bulk_remove_keys(&Query::<Seat>::all(), &keys).await.unwrap(), 2);
    let mut remaining: Vec<(String, i32)> = db
        .all::<Seat>()
        .unwrap()
        .into_iter()
        .map(|s| (s.row, s.number))
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec![("A".to_string(), 1), ("B".to_string(), 2)]);
}

#[tokio::test]
async fn test_composite_merge_inserts_supplied_keys() {
    let db = MemoryDatabase::new();
    db.seed(&[seat("A", 1)]).unwrap();
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut incoming = vec![
        Seat {
            holder: Some("kim".into()),
            ..seat("A", 1)
        },
        seat("A", 2),
    ];
    let outcome = ctx
        .bulk_merge(&Query::all(), &mut incoming, MergeOptions::delete())
        .await
        .unwrap();

    assert_eq!(outcome.rows_affected, 2);
    assert_eq!(outcome.inserted_keys, vec![Key::from(("A", 2))]);
    let a1 = db.find::<Seat>(&Key::from(("A", 1))).unwrap().unwrap();
    assert_eq!(a1.holder.as_deref(), Some("kim"));
}

#[tokio::test]
async fn test_join_delimited_narrows_simple_keys() {
    let db = MemoryDatabase::new();
    seeded_customers(&db, 4, 0);
    let mut conn = db.connect();
    let ctx = BulkContext::new(&mut conn);

    let query = ctx
        .join_delimited(Query::<Customer>::all(), "1, 3", ',')
        .unwrap();
    let mut ids: Vec<i64> = db.select(&query).unwrap().iter().map(|c| c.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);

    let err = ctx
        .join_delimited(Query::<Seat>::all(), "A,1", ',')
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotImplemented);
}

#[tokio::test]
async fn test_rollback_discards_bulk_changes() {
    let db = MemoryDatabase::new();
    seeded_customers(&db, 2, 0);
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    ctx.begin().await.unwrap();
    let mut records = vec![customer("temp", "EU")];
    ctx.bulk_add(&mut records).await.unwrap();
    ctx.bulk_remove(&Query::<Customer>::all().where_eq("region", "EU"))
        .await
        .unwrap();
    assert_eq!(db.count::<Customer>(), 0);
    ctx.rollback().await.unwrap();

    assert_eq!(db.count::<Customer>(), 2);
}

#[tokio::test]
async fn test_commit_keeps_bulk_changes() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    ctx.begin().await.unwrap();
    let mut records = vec![customer("kept", "EU")];
    ctx.bulk_add(&mut records).await.unwrap();
    ctx.commit().await.unwrap();

    assert_eq!(db.count::<Customer>(), 1);
}

#[tokio::test]
async fn test_entity_without_key_is_rejected() {
    let db = MemoryDatabase::new();
    let mut conn = db.connect();
    let mut ctx = BulkContext::new(&mut conn);

    let mut lines = vec![AuditLine {
        message: "hello".into(),
    }];
    let err = ctx.bulk_add(&mut lines).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingPrimaryKey);

    let err = ctx
        .bulk_update(&Query::<AuditLine>::all(), &lines[0], &["message"])
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingPrimaryKey);
}

struct OracleConnection;

#[async_trait]
impl BulkConnection for OracleConnection {
    fn provider_name(&self) -> &str {
        "oracle"
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn open(&mut self) -> BulkResult<()> {
        Ok(())
    }

    async fn execute(&mut self, _statement: &Statement) -> BulkResult<u64> {
        unreachable!("no SQL should run for an unsupported provider")
    }

    async fn query(&mut self, _statement: &Statement) -> BulkResult<Vec<ResultRow>> {
        unreachable!("no SQL should run for an unsupported provider")
    }

    async fn begin(&mut self) -> BulkResult<()> {
        Ok(())
    }

    async fn commit(&mut self) -> BulkResult<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> BulkResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_unsupported_provider_fails_before_any_sql() {
    let mut conn = OracleConnection;
    let mut ctx = BulkContext::new(&mut conn);

    let mut records = vec![customer("x", "EU")];
    let err = ctx.bulk_add(&mut records).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedProvider);
    assert!(err.is_configuration());
}
