use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use garden_hub::{build_router, DatasetId, HostConfig, MemoryStore, ReadingService};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

fn app() -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::with_default_tables());
    let service = ReadingService::new(store.clone(), &HostConfig::default());
    (store, build_router(service))
}

async fn post(app: &Router, body: impl Into<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/envirodata")
                .header("Content-Type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn reading(nickname: &str) -> Value {
    json!({
        "nickname": nickname,
        "timestamp": "2024-01-01T00:00:00Z",
        "readings": {
            "temperature": 21, "humidity": 40, "pressure": 1012, "noise": 30,
            "pm1": 1, "pm2_5": 2, "pm10": 3
        },
        "model": "urban",
        "uid": "e6614103e75c6322"
    })
}

#[tokio::test]
async fn batch_appends_only_our_device() {
    let (store, app) = app();
    let body = json!([reading("embsgarden"), reading("other")]).to_string();

    let (status, code) = post(&app, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(code, json!(200));

    let raw = store.raw(DatasetId::Automated).await.unwrap();
    assert_eq!(
        raw,
        "timestamp,temperature,humidity,pressure,noise,pm1,pm2_5,pm10\n\
         2024-01-01T00:00:00Z,21,40,1012,30,1,2,3\n"
    );
}

#[tokio::test]
async fn single_object_and_one_element_array_store_the_same() {
    let (single_store, single_app) = app();
    let (array_store, array_app) = app();

    let (status, _) = post(&single_app, reading("embsgarden").to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&array_app, json!([reading("embsgarden")]).to_string()).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        single_store.raw(DatasetId::Automated).await,
        array_store.raw(DatasetId::Automated).await
    );
}

#[tokio::test]
async fn unparsable_body_is_400_and_leaves_table_alone() {
    let (store, app) = app();
    post(&app, reading("embsgarden").to_string()).await;
    let before = store.raw(DatasetId::Automated).await;

    let (status, code) = post(&app, "{\"nickname\": ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(code, json!(400));
    assert_eq!(store.raw(DatasetId::Automated).await, before);
}

#[tokio::test]
async fn empty_body_is_400() {
    let (_store, app) = app();
    let (status, _) = post(&app, Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_stored_table_is_400() {
    let (store, app) = app();
    store.put_raw(DatasetId::Automated, "timestamp,temperature\n\"open\n").await;
    let (status, _) = post(&app, reading("embsgarden").to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn posted_rows_show_up_in_the_merged_view() {
    let (_store, app) = app();
    post(&app, json!([reading("embsgarden")]).to_string()).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/readings").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let view: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(view["readings"].as_array().unwrap().len(), 1);
    assert_eq!(view["readings"][0]["provenance"], json!("automated"));
    assert_eq!(view["readings"][0]["pm2_5"], json!(2.0));
    assert_eq!(view["ceilings"]["Pressure"], json!(1020.0));
    assert_eq!(view["range"]["start"], json!("2023-12-31T00:00:00Z"));
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn far_future_timestamp_is_dropped_and_views_still_load() {
    let (store, app) = app();
    let body = json!({
        "nickname": "embsgarden",
        "timestamp": "+262142-12-31T12:00:00",
        "readings": {"temperature": 1}
    });

    let (status, _) = post(&app, body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        store.raw(DatasetId::Automated).await.unwrap(),
        "timestamp,temperature,humidity,pressure,noise,pm1,pm2_5,pm10\n"
    );

    let (status, view) = get_json(&app, "/api/readings").await;
    assert_eq!(status, StatusCode::OK);
    assert!(view["readings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn infinite_value_is_dropped_and_chart_ceiling_stays_finite() {
    let (store, app) = app();
    let mut bad = reading("embsgarden");
    bad["readings"]["pm10"] = json!("inf");

    let (status, _) = post(&app, json!([bad, reading("embsgarden")]).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!store.raw(DatasetId::Automated).await.unwrap().contains("inf"));

    let (status, charts) = get_json(&app, "/api/charts").await;
    assert_eq!(status, StatusCode::OK);
    let pm10 = charts
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["field"] == json!("PM10"))
        .unwrap();
    assert_eq!(pm10["y_range"], json!([0.0, 10.0]));
}
