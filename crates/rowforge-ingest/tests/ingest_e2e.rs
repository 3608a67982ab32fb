//! End-to-end ingestion against the in-memory driver.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use rowforge_config::IngestConfig;
use rowforge_core::mem::{MemConn, MemDriver};
use rowforge_core::{Column, IngestError, Kind};
use rowforge_ingest::{IngestJob, IngestSummary};

fn job(cfg: IngestConfig) -> IngestJob<MemDriver> {
    IngestJob::new(MemDriver, cfg, CancellationToken::new())
}

fn col_names(cols: &[Column]) -> Vec<&str> {
    cols.iter().map(|c| c.name.as_str()).collect()
}

#[tokio::test]
async fn single_object() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    let summary = job
        .ingest_object(&mut conn, &br#"{"a":1,"b":"x"}"#[..])
        .await
        .unwrap();

    assert_eq!(
        summary,
        IngestSummary {
            objects: 1,
            rows_inserted: 1,
            schema_deltas: 1
        }
    );

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(
        cols,
        vec![Column::new("a", Kind::Int), Column::new("b", Kind::Text)]
    );
    assert_eq!(conn.rows("data").unwrap(), vec![vec![json!(1), json!("x")]]);
}

#[tokio::test]
async fn array_evolves_schema() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    let summary = job
        .ingest_array(&mut conn, &br#"[{"a":1},{"a":2,"b":"x"}]"#[..])
        .await
        .unwrap();

    assert_eq!(summary.objects, 2);
    assert_eq!(summary.rows_inserted, 2);

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(col_names(&cols), vec!["a", "b"]);

    // The first row was inserted before column b existed.
    assert_eq!(
        conn.rows("data").unwrap(),
        vec![
            vec![json!(1), Value::Null],
            vec![json!(2), json!("x")],
        ]
    );
}

#[tokio::test]
async fn nested_object_flattens() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    job.ingest_object(
        &mut conn,
        &br#"{"name":{"first":"Ann","last":"Lee"}}"#[..],
    )
    .await
    .unwrap();

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(
        cols,
        vec![
            Column::new("name_first", Kind::Text),
            Column::new("name_last", Kind::Text)
        ]
    );
    assert_eq!(
        conn.rows("data").unwrap(),
        vec![vec![json!("Ann"), json!("Lee")]]
    );
}

#[tokio::test]
async fn kind_widens_to_text_across_lines() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    job.ingest_lines(&mut conn, &b"{\"x\":1}\n{\"x\":\"hi\"}\n"[..])
        .await
        .unwrap();

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(cols, vec![Column::new("x", Kind::Text)]);

    // The first row was stored as Int, then converted by the kind alter.
    assert_eq!(
        conn.rows("data").unwrap(),
        vec![vec![json!("1")], vec![json!("hi")]]
    );
}

#[tokio::test]
async fn array_then_object_conflict() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    let err = job
        .ingest_lines(&mut conn, &br#"{"a":[1,2]}{"a":{"k":3}}"#[..])
        .await
        .unwrap_err();

    assert!(
        matches!(err, IngestError::StructuralConflict { .. }),
        "{err}"
    );
}

#[tokio::test]
async fn all_null_column_becomes_text() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    job.ingest_lines(&mut conn, &b"{\"a\":null}\n{\"a\":null}\n"[..])
        .await
        .unwrap();

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(cols, vec![Column::new("a", Kind::Text)]);
    assert_eq!(
        conn.rows("data").unwrap(),
        vec![vec![Value::Null], vec![Value::Null]]
    );
}

#[tokio::test]
async fn column_order_matches_document_order() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    job.ingest_object(
        &mut conn,
        &br#"{"zeta":1,"meta":{"q":2,"a":3},"alpha":"x","tags":[1,2]}"#[..],
    )
    .await
    .unwrap();

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(
        col_names(&cols),
        vec!["zeta", "meta_q", "meta_a", "alpha", "tags"]
    );
}

#[tokio::test]
async fn omitted_field_is_never_dropped() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    job.ingest_lines(
        &mut conn,
        &b"{\"a\":1,\"b\":\"x\"}\n{\"a\":2}\n{\"a\":3}\n"[..],
    )
    .await
    .unwrap();

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(col_names(&cols), vec!["a", "b"]);
    assert_eq!(
        conn.rows("data").unwrap(),
        vec![
            vec![json!(1), json!("x")],
            vec![json!(2), Value::Null],
            vec![json!(3), Value::Null],
        ]
    );
}

#[tokio::test]
async fn batch_threshold_flushes() {
    let cfg = IngestConfig {
        batch_size: 2,
        ..IngestConfig::default()
    };
    let job = job(cfg);
    let mut conn = MemConn::new();

    let input = (0..5)
        .map(|i| format!("{{\"n\":{i}}}\n"))
        .collect::<String>();
    let summary = job
        .ingest_lines(&mut conn, input.as_bytes())
        .await
        .unwrap();

    assert_eq!(summary.objects, 5);
    assert_eq!(summary.rows_inserted, 5);
    // Only the first flush changed the schema.
    assert_eq!(summary.schema_deltas, 1);
    assert_eq!(conn.rows("data").unwrap().len(), 5);
}

#[tokio::test]
async fn array_values_are_stored_as_json_text() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    job.ingest_object(&mut conn, &br#"{"id":7,"tags":["a","b"]}"#[..])
        .await
        .unwrap();

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(
        cols,
        vec![
            Column::new("id", Kind::Int),
            Column::new("tags", Kind::Text)
        ]
    );
    assert_eq!(
        conn.rows("data").unwrap(),
        vec![vec![json!(7), json!(r#"["a","b"]"#)]]
    );
}

#[tokio::test]
async fn datetime_columns_are_normalized() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    job.ingest_lines(
        &mut conn,
        &b"{\"ts\":\"2023-04-01 13:45:10\"}\n{\"ts\":\"2023-04-02T00:00:00Z\"}\n"[..],
    )
    .await
    .unwrap();

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(cols, vec![Column::new("ts", Kind::Datetime)]);
    assert_eq!(
        conn.rows("data").unwrap(),
        vec![
            vec![json!("2023-04-01T13:45:10Z")],
            vec![json!("2023-04-02T00:00:00Z")],
        ]
    );
}

#[tokio::test]
async fn rejects_non_json_input() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    let err = job
        .ingest_lines(&mut conn, &b"hello world"[..])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Decode { .. }), "{err}");
    assert!(conn.table_names().is_empty());
}

#[tokio::test]
async fn rejects_trailing_content_after_array() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    let err = job
        .ingest_array(&mut conn, &br#"[{"a":1}] trailing"#[..])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Decode { .. }), "{err}");
}

#[tokio::test]
async fn rejects_second_object_in_object_dialect() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    let err = job
        .ingest_object(&mut conn, &br#"{"a":1}{"a":2}"#[..])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Decode { .. }), "{err}");
}

#[tokio::test]
async fn cancelled_job_returns_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let job = IngestJob::new(MemDriver, IngestConfig::default(), cancel);
    let mut conn = MemConn::new();

    let err = job
        .ingest_lines(&mut conn, &b"{\"a\":1}\n"[..])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Cancelled), "{err}");
    assert!(conn.rows("data").is_none(), "no batch may land after cancel");
}

#[tokio::test]
async fn empty_lines_are_skipped() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    let summary = job
        .ingest_lines(&mut conn, &b"\n{\"a\":1}\n\n   \n{\"a\":2}\n\n"[..])
        .await
        .unwrap();
    assert_eq!(summary.objects, 2);
    assert_eq!(conn.rows("data").unwrap().len(), 2);
}

#[tokio::test]
async fn bools_and_floats_detect() {
    let job = job(IngestConfig::default());
    let mut conn = MemConn::new();

    job.ingest_object(
        &mut conn,
        &br#"{"ok":true,"ratio":0.5,"count":3}"#[..],
    )
    .await
    .unwrap();

    let cols = conn.table_columns("data").unwrap();
    assert_eq!(
        cols,
        vec![
            Column::new("ok", Kind::Bool),
            Column::new("ratio", Kind::Float),
            Column::new("count", Kind::Int)
        ]
    );
}
