//! Integration tests for city creation and onboarding progress over HTTP.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! database and a stub completion provider, then drives the real REST and
//! WebSocket contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use climate_onboarding::config::GenerationConfig;
use climate_onboarding::error::LlmError;
use climate_onboarding::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use climate_onboarding::onboarding::{
    OnboardingOrchestrator, OnboardingRouteState, OnboardingService, onboarding_routes,
};
use climate_onboarding::store::{Database, LibSqlBackend, seed_module_catalog};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub provider: two hotspots and one quick win per module.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // Slow enough that a WebSocket client sees intermediate progress.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let is_quick_win = request
            .system_prompt()
            .is_some_and(|s| s.contains("\"quickWins\""));
        let content = if is_quick_win {
            json!({"quickWins": [
                {"title": "Open cooling centers", "impact": "high", "effort": "low", "co2ReductionTons": 0.5}
            ]})
        } else {
            json!({"hotspots": [
                {"name": "Central Market", "severity": "critical", "latOffset": 0.01, "lngOffset": 0.01},
                {"name": "Industrial Belt", "severity": "bogus"}
            ]})
        };

        Ok(CompletionResponse {
            content: content.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// Start an Axum server on a random port; `llm = None` simulates a missing key.
async fn start_server(llm: Option<Arc<dyn LlmProvider>>) -> u16 {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    seed_module_catalog(db.as_ref()).await.unwrap();

    let orchestrator = OnboardingOrchestrator::new(db.clone(), llm, GenerationConfig::default());
    let service = OnboardingService::new(db.clone(), orchestrator);
    let app = onboarding_routes(OnboardingRouteState { db, service });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    port
}

fn city_body(name: &str) -> Value {
    json!({
        "name": name,
        "country": "Kenya",
        "coordinates": {"lat": -1.2921, "lng": 36.8219},
        "population": 4_400_000,
        "unitPreference": "metric"
    })
}

async fn create_city(port: u16, name: &str) -> (reqwest::StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/api/cities"))
        .json(&city_body(name))
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn get_json(port: u16, path: &str) -> (reqwest::StatusCode, Value) {
    let response = reqwest::get(format!("http://127.0.0.1:{port}{path}"))
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap_or(Value::Null))
}

/// Poll the REST endpoint until the run is terminal.
async fn wait_for_terminal(port: u16, city_id: &str) -> Value {
    loop {
        let (status, run) = get_json(port, &format!("/api/cities/{city_id}/onboarding")).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        if run["status"] == "completed" || run["status"] == "failed" {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn onboarding_completes_and_reports_stats() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server(Some(Arc::new(StubLlm))).await;

        let (status, created) = create_city(port, "Nairobi").await;
        assert_eq!(status, reqwest::StatusCode::ACCEPTED);
        let city_id = created["cityId"].as_str().unwrap().to_string();

        let run = wait_for_terminal(port, &city_id).await;
        assert_eq!(run["status"], "completed");
        assert_eq!(run["progress"], 100);
        assert_eq!(run["id"], created["runId"]);
        for module in run["moduleProgress"].as_array().unwrap() {
            assert_eq!(module["status"], "completed");
            assert_eq!(module["hotspotsCreated"], 2);
            assert_eq!(module["quickWinsCreated"], 1);
        }

        let (status, stats) = get_json(port, &format!("/api/cities/{city_id}/stats")).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(stats["totalHotspots"], 12);
        assert_eq!(stats["hotspotsBySeverity"]["critical"], 6);
        assert_eq!(stats["hotspotsBySeverity"]["medium"], 6);
        assert_eq!(stats["totalQuickWins"], 6);
        assert_eq!(stats["estimatedCo2ReductionTons"], 3.0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn websocket_streams_progress_until_terminal() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server(Some(Arc::new(StubLlm))).await;
        let (_, created) = create_city(port, "Mombasa").await;
        let city_id = created["cityId"].as_str().unwrap();

        let url = format!("ws://127.0.0.1:{port}/api/cities/{city_id}/onboarding/ws");
        let (mut ws, _) = connect_async(&url).await.unwrap();

        let mut snapshots = Vec::new();
        while let Some(msg) = ws.next().await {
            match msg.unwrap() {
                Message::Text(text) => {
                    snapshots.push(serde_json::from_str::<Value>(&text).unwrap());
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        assert!(!snapshots.is_empty());
        let progress: Vec<u64> = snapshots
            .iter()
            .map(|s| s["progress"].as_u64().unwrap())
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");

        let last = snapshots.last().unwrap();
        assert_eq!(last["status"], "completed");
        assert_eq!(last["progress"], 100);
        assert!(snapshots[..snapshots.len() - 1]
            .iter()
            .all(|s| s["progress"].as_u64().unwrap() < 100));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn missing_credential_fails_run() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server(None).await;
        let (status, created) = create_city(port, "Kisumu").await;
        assert_eq!(status, reqwest::StatusCode::ACCEPTED);
        let city_id = created["cityId"].as_str().unwrap();

        let run = wait_for_terminal(port, city_id).await;
        assert_eq!(run["status"], "failed");
        assert!(run["error"].as_str().unwrap().contains("not configured"));
        assert!(run["moduleProgress"]
            .as_array()
            .unwrap()
            .iter()
            .all(|m| m["status"] == "pending"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_city_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let port = start_server(Some(Arc::new(StubLlm))).await;
        let (first, _) = create_city(port, "Nakuru").await;
        assert_eq!(first, reqwest::StatusCode::ACCEPTED);
        let (second, body) = create_city(port, "Nakuru").await;
        assert_eq!(second, reqwest::StatusCode::CONFLICT);
        assert!(body["cityId"].is_string());
    })
    .await
    .expect("test timed out");
}
