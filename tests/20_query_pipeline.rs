use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use docstore_console::{
    audit::{
        AuditEntry, AuditFilter, AuditTrail, Category, ExecutionStatus, HistoryStore, MemoryAuditStore,
        MemoryHistoryStore, QueryKind, Severity,
    },
    config::AppConfig,
    pipeline::{PipelineError, QueryForm, QueryPipeline, WriteForm, WriteKind},
    query::{Namespace, QueryError, QueryExecutor},
    security::{Actor, RequestMeta, SecurityGate, SessionContext},
    store::MemoryStore,
};
use serde_json::{json, Value};

struct Fixture {
    pipeline: QueryPipeline,
    store: Arc<MemoryStore>,
    audit: Arc<AuditTrail>,
    history: Arc<MemoryHistoryStore>,
    session: SessionContext,
}

fn fixture() -> Fixture {
    let config = AppConfig::development();
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(AuditTrail::new(Arc::new(MemoryAuditStore::new()), 100));
    let history = Arc::new(MemoryHistoryStore::new(10));
    let pipeline = QueryPipeline::new(
        SecurityGate::new(config.security.clone()),
        QueryExecutor::new(store.clone(), config.query.clone()),
        audit.clone(),
        history.clone(),
    );
    let actor = Actor {
        username: "ann".into(),
        role: "editor".into(),
        session_id: "s-1".into(),
    };
    let session = SessionContext::new(actor, Utc::now(), config.security.csrf_token_ttl());
    Fixture { pipeline, store, audit, history, session }
}

fn post() -> RequestMeta {
    RequestMeta {
        method: "POST".into(),
        path: "/api/query/shop/users".into(),
        ip: Some("127.0.0.1".into()),
        user_agent: Some("console-tests/1.0".into()),
        referer: None,
    }
}

fn seed_ages(store: &MemoryStore) -> Result<()> {
    let ns = Namespace::new("shop", "users")?;
    store.insert_many(
        &ns,
        vec![
            json!({ "name": "teen", "age": 15 }),
            json!({ "name": "adult", "age": 18 }),
            json!({ "name": "senior", "age": 21 }),
        ],
    );
    Ok(())
}

async fn data_entries(audit: &AuditTrail) -> Result<Vec<AuditEntry>> {
    let filter = AuditFilter {
        category: Some(Category::Data),
        ..Default::default()
    };
    Ok(audit.query(&filter, 100).await?)
}

#[tokio::test]
async fn quick_gte_filter_returns_matching_documents_and_one_audit_entry() -> Result<()> {
    let mut fx = fixture();
    seed_ages(&fx.store)?;

    let form = QueryForm {
        query_field: "age".into(),
        query_op: "gte".into(),
        query_value: "18".into(),
        value_type: "number".into(),
        sort: "age".into(),
        csrf_token: Some(fx.session.csrf().value().to_string()),
        ..Default::default()
    };
    let outcome = fx.pipeline.run_query(&mut fx.session, &post(), "shop", "users", &form).await?;

    assert_eq!(outcome.query_type, QueryKind::Quick);
    assert_eq!(outcome.filter, json!({ "age": { "$gte": 18 } }));
    let ages: Vec<i64> = outcome.documents.iter().filter_map(|d| d["age"].as_i64()).collect();
    assert_eq!(ages, vec![18, 21]);

    let entries = data_entries(&fx.audit).await?;
    assert_eq!(entries.len(), 1, "expected exactly one data entry: {:?}", entries);
    assert_eq!(entries[0].action, "query_executed");
    assert_eq!(entries[0].severity, Severity::Info);
    assert_eq!(entries[0].details["status"], json!("success"));
    assert_eq!(entries[0].details["result_count"], json!(2));
    assert_eq!(
        entries[0].database.as_ref().and_then(|d| d.collection.as_deref()),
        Some("users")
    );

    let recent = fx.history.recent("ann", 10).await?;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].result_count, 2);
    assert_eq!(recent[0].status, ExecutionStatus::Success);
    Ok(())
}

#[tokio::test]
async fn custom_query_operators_and_projection() -> Result<()> {
    let mut fx = fixture();
    seed_ages(&fx.store)?;

    let form = QueryForm {
        custom_query: r#"{"$or": [{"age": {"$lt": 16}}, {"name": {"$regex": "^sen"}}]}"#.into(),
        projection: "name".into(),
        sort: "age".into(),
        sort_order: "desc".into(),
        csrf_token: Some(fx.session.csrf().value().to_string()),
        ..Default::default()
    };
    let outcome = fx.pipeline.run_query(&mut fx.session, &post(), "shop", "users", &form).await?;

    assert_eq!(outcome.query_type, QueryKind::Custom);
    let names: Vec<&str> = outcome.documents.iter().filter_map(|d| d["name"].as_str()).collect();
    assert_eq!(names, vec!["senior", "teen"]);
    assert!(outcome.documents.iter().all(|d| d.get("age").is_none()));
    Ok(())
}

#[tokio::test]
async fn forbidden_operator_is_rejected_and_audited_once() -> Result<()> {
    let mut fx = fixture();
    seed_ages(&fx.store)?;

    let form = QueryForm {
        custom_query: r#"{"$where": "sleep(1000)"}"#.into(),
        csrf_token: Some(fx.session.csrf().value().to_string()),
        ..Default::default()
    };
    let err = fx
        .pipeline
        .run_query(&mut fx.session, &post(), "shop", "users", &form)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Query(QueryError::InvalidField(_)) | PipelineError::Query(QueryError::InvalidQuery(_))));

    let entries = data_entries(&fx.audit).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].severity, Severity::Error);
    assert_eq!(fx.history.recent("ann", 10).await?[0].status, ExecutionStatus::Error);
    Ok(())
}

#[tokio::test]
async fn unparsable_number_is_an_invalid_value() -> Result<()> {
    let mut fx = fixture();
    let form = QueryForm {
        query_field: "age".into(),
        query_op: "gt".into(),
        query_value: "eighteen".into(),
        value_type: "number".into(),
        csrf_token: Some(fx.session.csrf().value().to_string()),
        ..Default::default()
    };
    let err = fx
        .pipeline
        .run_query(&mut fx.session, &post(), "shop", "users", &form)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Query(QueryError::InvalidValue { .. })));
    Ok(())
}

#[tokio::test]
async fn bulk_delete_requires_confirmation() -> Result<()> {
    let mut fx = fixture();
    seed_ages(&fx.store)?;
    let ns = Namespace::new("shop", "users")?;

    let mut form = WriteForm {
        filter: json!({ "age": { "$lt": 18 } }),
        update: None,
        confirm: false,
        csrf_token: Some(fx.session.csrf().value().to_string()),
    };
    let err = fx
        .pipeline
        .run_write(&mut fx.session, &post(), "shop", "users", WriteKind::Delete, &form)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ConfirmationRequired("delete")));
    assert_eq!(fx.store.count(&ns), 3);

    form.confirm = true;
    let outcome = fx
        .pipeline
        .run_write(&mut fx.session, &post(), "shop", "users", WriteKind::Delete, &form)
        .await?;
    assert_eq!(outcome.affected, 1);
    assert_eq!(fx.store.count(&ns), 2);

    let entries = data_entries(&fx.audit).await?;
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.action == "bulk_delete" && e.severity == Severity::Warning));
    Ok(())
}

#[tokio::test]
async fn bulk_write_without_filter_is_rejected() -> Result<()> {
    let mut fx = fixture();
    seed_ages(&fx.store)?;
    let ns = Namespace::new("shop", "users")?;

    let form: WriteForm = serde_json::from_value(json!({
        "confirm": true,
        "csrf_token": fx.session.csrf().value(),
    }))?;
    let err = fx
        .pipeline
        .run_write(&mut fx.session, &post(), "shop", "users", WriteKind::Delete, &form)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Query(QueryError::InvalidQuery(_))));
    assert_eq!(fx.store.count(&ns), 3);

    let entries = data_entries(&fx.audit).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].severity, Severity::Error);

    // An explicit empty filter still means every document
    let form = WriteForm { filter: json!({}), ..form };
    let outcome = fx
        .pipeline
        .run_write(&mut fx.session, &post(), "shop", "users", WriteKind::Delete, &form)
        .await?;
    assert_eq!(outcome.affected, 3);
    assert_eq!(fx.store.count(&ns), 0);
    Ok(())
}

#[tokio::test]
async fn bulk_update_applies_allow_listed_operators() -> Result<()> {
    let mut fx = fixture();
    seed_ages(&fx.store)?;

    let form = WriteForm {
        filter: json!({ "age": { "$gte": 18 } }),
        update: Some(json!({ "$inc": { "age": 1 }, "$set": { "adult": true } })),
        confirm: true,
        csrf_token: Some(fx.session.csrf().value().to_string()),
    };
    let outcome = fx
        .pipeline
        .run_write(&mut fx.session, &post(), "shop", "users", WriteKind::Update, &form)
        .await?;
    assert_eq!(outcome.affected, 2);

    let query = QueryForm {
        query_field: "adult".into(),
        query_value: "true".into(),
        value_type: "bool".into(),
        sort: "age".into(),
        csrf_token: Some(fx.session.csrf().value().to_string()),
        ..Default::default()
    };
    let found = fx.pipeline.run_query(&mut fx.session, &post(), "shop", "users", &query).await?;
    let ages: Vec<Value> = found.documents.iter().map(|d| d["age"].clone()).collect();
    assert_eq!(ages, vec![json!(19), json!(22)]);
    Ok(())
}
