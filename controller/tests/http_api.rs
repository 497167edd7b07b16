use http_body_util::BodyExt;
use nekoproxy_common::{AgentConfig, AgentStatusResponse};
use nekoproxy_controller::config::Config;
use nekoproxy_controller::http;
use nekoproxy_controller::state::AppState;
use nekoproxy_store::{connect, Store};
use tower::ServiceExt;

async fn test_app() -> axum::Router {
    let pool = connect("sqlite::memory:").await.unwrap();
    let store = Store::from_sqlite_pool(pool);
    let config = Config {
        host: "0.0.0.0".into(),
        port: 8001,
        database_url: "sqlite::memory:".into(),
        heartbeat_timeout_secs: 90,
        stats_retention_days: 30,
        log_level: "info".into(),
        log_format: "pretty".into(),
    };
    http::router(AppState::new(store, config))
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn bring_up_scenario_registers_and_returns_empty_config() {
    let app = test_app().await;

    let register_response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/agents/register")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({"hostname": "a1", "wireguard_ip": "10.0.0.2", "version": "0.1.0"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(register_response.status(), axum::http::StatusCode::OK);
    let status: AgentStatusResponse = body_json(register_response).await;
    assert_eq!(status.id, 1);
    assert_eq!(status.status, "healthy");

    let config_response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/v1/agents/1/config")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(config_response.status(), axum::http::StatusCode::OK);
    let config: AgentConfig = body_json(config_response).await;
    assert_eq!(config.agent_id, 1);
    assert!(config.services.is_empty());
    assert!(config.blocklist.is_empty());
    assert_eq!(config.heartbeat_interval, 30);
}

#[tokio::test]
async fn heartbeat_for_unknown_agent_returns_404() {
    let app = test_app().await;
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/agents/999/heartbeat")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({"active_connections": 0, "cpu_percent": 0.0, "memory_percent": 0.0}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn service_rollout_scenario_advances_config_version() {
    let app = test_app().await;

    let register = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/agents/register")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({"hostname": "a1", "wireguard_ip": "10.0.0.2", "version": "0.1.0"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let _: AgentStatusResponse = body_json(register).await;

    let baseline_config_resp = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/v1/agents/1/config")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let baseline: AgentConfig = body_json(baseline_config_resp).await;

    let create_service = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/services")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({
                        "name": "echo",
                        "listen_port": 7,
                        "protocol": "tcp",
                        "backend_host": "10.1.0.5",
                        "backend_port": 7
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create_service.status(), axum::http::StatusCode::OK);

    let create_assignment = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/assignments")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({"service_id": 1, "agent_id": null}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create_assignment.status(), axum::http::StatusCode::OK);

    let updated_config_resp = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/v1/agents/1/config")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let updated: AgentConfig = body_json(updated_config_resp).await;

    assert!(updated.config_version > baseline.config_version);
    assert_eq!(updated.services.len(), 1);
    assert_eq!(updated.services[0].listen_port, 7);
}

#[tokio::test]
async fn duplicate_service_name_is_reported_as_bad_request() {
    let app = test_app().await;
    let body = serde_json::json!({
        "name": "echo",
        "listen_port": 7,
        "protocol": "tcp",
        "backend_host": "10.1.0.5",
        "backend_port": 7
    })
    .to_string();

    let first = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/services")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), axum::http::StatusCode::OK);

    let second = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/services")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blocklist_entry_is_visible_in_agent_config() {
    let app = test_app().await;

    app.clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/agents/register")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({"hostname": "a1", "wireguard_ip": "10.0.0.2", "version": "0.1.0"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    app.clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/v1/blocklist")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(serde_json::json!({"ip": "198.51.100.9"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let config_resp = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/v1/agents/1/config")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let config: AgentConfig = body_json(config_resp).await;
    assert_eq!(config.blocklist, vec!["198.51.100.9".to_string()]);
}
