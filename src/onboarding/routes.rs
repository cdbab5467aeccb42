//! REST and WebSocket endpoints for city creation and onboarding progress.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::city::model::{City, CityProfile};
use crate::error::DatabaseError;
use crate::store::Database;

use super::orchestrator::OnboardingRequest;
use super::service::OnboardingService;
use super::state::OnboardingRun;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub db: Arc<dyn Database>,
    pub service: Arc<OnboardingService>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    warn!(error = %e, "Request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "climate-onboarding"
    }))
}

/// POST /api/cities
///
/// Creates the city and starts onboarding. 409 if the name+country pair
/// already exists and has a run; an existing city with no run (its first
/// start failed) gets one now.
async fn create_city(
    State(state): State<OnboardingRouteState>,
    Json(mut profile): Json<CityProfile>,
) -> Response {
    profile.name = profile.name.trim().to_string();
    profile.country = profile.country.trim().to_string();
    if profile.name.is_empty() || profile.country.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name and country are required");
    }
    if !profile.coordinates.is_valid() {
        return error_response(StatusCode::BAD_REQUEST, "coordinates are out of range");
    }

    match state
        .db
        .find_city_by_name(&profile.name, &profile.country)
        .await
    {
        Ok(Some(existing)) => {
            return match state.db.get_onboarding_run(existing.id).await {
                Ok(Some(_)) => (
                    StatusCode::CONFLICT,
                    Json(json!({
                        "error": "City already exists",
                        "cityId": existing.id,
                    })),
                )
                    .into_response(),
                Ok(None) => {
                    info!(city_id = %existing.id, "Retrying onboarding for city without a run");
                    start_onboarding(&state, existing).await
                }
                Err(e) => internal_error(e),
            };
        }
        Ok(None) => {}
        Err(e) => return internal_error(e),
    }

    let city = City::new(profile);
    match state.db.insert_city(&city).await {
        Ok(()) => {}
        Err(DatabaseError::Constraint(_)) => {
            return error_response(StatusCode::CONFLICT, "City already exists");
        }
        Err(e) => return internal_error(e),
    }
    start_onboarding(&state, city).await
}

async fn start_onboarding(state: &OnboardingRouteState, city: City) -> Response {
    let request = OnboardingRequest {
        city_id: city.id,
        profile: city.profile,
    };
    match state.service.start(request).await {
        Ok(handle) => {
            info!(city_id = %handle.city_id, run_id = %handle.run_id, "Onboarding started");
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "cityId": handle.city_id,
                    "runId": handle.run_id,
                })),
            )
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// GET /api/cities/{id}/onboarding
async fn get_onboarding(
    State(state): State<OnboardingRouteState>,
    Path(city_id): Path<Uuid>,
) -> Response {
    match state.service.get_run(city_id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No onboarding run for this city"),
        Err(e) => internal_error(e),
    }
}

/// GET /api/cities/{id}/stats
///
/// Zeroed stats for a city whose first run has not finished yet.
async fn get_stats(
    State(state): State<OnboardingRouteState>,
    Path(city_id): Path<Uuid>,
) -> Response {
    match state.db.get_city(city_id).await {
        Ok(Some(city)) => Json(city.stats.unwrap_or_default()).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "City not found"),
        Err(e) => internal_error(e),
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

/// GET /api/cities/{id}/onboarding/ws
async fn onboarding_ws(
    ws: WebSocketUpgrade,
    State(state): State<OnboardingRouteState>,
    Path(city_id): Path<Uuid>,
) -> impl IntoResponse {
    debug!(%city_id, "Onboarding WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state, city_id))
}

/// Send the current snapshot, then every update; close after a terminal one.
async fn handle_socket(mut socket: WebSocket, state: OnboardingRouteState, city_id: Uuid) {
    let Some((snapshot, mut rx)) = state.service.subscribe(city_id).await else {
        // Not started by this process: serve the persisted record once.
        match state.service.get_run(city_id).await {
            Ok(Some(run)) => {
                let _ = send_run(&mut socket, &run).await;
            }
            Ok(None) => {
                let _ = socket
                    .send(Message::Text(
                        json!({"error": "No onboarding run for this city"})
                            .to_string()
                            .into(),
                    ))
                    .await;
            }
            Err(e) => warn!(%city_id, error = %e, "Failed to load onboarding run"),
        }
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    if send_run(&mut socket, &snapshot).await.is_err() || snapshot.is_terminal() {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(run) => {
                        if send_run(&mut socket, &run).await.is_err() {
                            debug!(%city_id, "Client disconnected during send");
                            return;
                        }
                        if run.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        // Snapshots are full state; the next one catches the client up.
                        warn!(%city_id, missed = n, "WS client lagged behind onboarding updates");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        debug!(%city_id, "Onboarding WebSocket client left");
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

async fn send_run(socket: &mut WebSocket, run: &OnboardingRun) -> Result<(), axum::Error> {
    match serde_json::to_string(run) {
        Ok(text) => socket.send(Message::Text(text.into())).await,
        Err(e) => {
            warn!(run_id = %run.id, error = %e, "Failed to serialize onboarding run");
            Ok(())
        }
    }
}

/// Build the city and onboarding routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/cities", post(create_city))
        .route("/api/cities/{id}/onboarding", get(get_onboarding))
        .route("/api/cities/{id}/onboarding/ws", get(onboarding_ws))
        .route("/api/cities/{id}/stats", get(get_stats))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::GenerationConfig;
    use crate::onboarding::OnboardingOrchestrator;
    use crate::store::LibSqlBackend;

    async fn app() -> Router {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let orchestrator = OnboardingOrchestrator::new(db.clone(), None, GenerationConfig::default());
        let service = OnboardingService::new(db.clone(), orchestrator);
        onboarding_routes(OnboardingRouteState { db, service })
    }

    fn create_request(body: serde_json::Value) -> Request<Body> {
        Request::post("/api/cities")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn lima() -> serde_json::Value {
        json!({
            "name": "Lima",
            "country": "Peru",
            "coordinates": {"lat": -12.0464, "lng": -77.0428},
            "population": 9_700_000,
            "unitPreference": "metric"
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn create_city_accepts_then_conflicts() {
        let app = app().await;

        let response = app.clone().oneshot(create_request(lima())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let created = body_json(response).await;
        let city_id = created["cityId"].as_str().unwrap().to_string();
        assert!(created["runId"].is_string());

        let response = app.clone().oneshot(create_request(lima())).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["cityId"], city_id.as_str());

        let response = app
            .oneshot(
                Request::get(format!("/api/cities/{city_id}/onboarding"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let run = body_json(response).await;
        assert_eq!(run["cityId"], city_id.as_str());
        assert_eq!(run["moduleProgress"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn create_city_retries_city_left_without_a_run() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let orchestrator = OnboardingOrchestrator::new(db.clone(), None, GenerationConfig::default());
        let service = OnboardingService::new(db.clone(), orchestrator);
        let app = onboarding_routes(OnboardingRouteState {
            db: db.clone(),
            service,
        });

        // A city row whose first onboarding start never got a run recorded.
        let stranded = City::new(serde_json::from_value::<CityProfile>(lima()).unwrap());
        db.insert_city(&stranded).await.unwrap();

        let response = app.clone().oneshot(create_request(lima())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let created = body_json(response).await;
        assert_eq!(created["cityId"], stranded.id.to_string().as_str());
        let run = db.get_onboarding_run(stranded.id).await.unwrap().unwrap();
        assert_eq!(created["runId"], run.id.to_string().as_str());

        let response = app.oneshot(create_request(lima())).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_city_validates_input() {
        let mut blank = lima();
        blank["name"] = json!("  ");
        let response = app().await.oneshot(create_request(blank)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let mut off_map = lima();
        off_map["coordinates"] = json!({"lat": 120.0, "lng": 0.0});
        let response = app().await.oneshot(create_request(off_map)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_city_is_not_found() {
        let app = app().await;
        let id = Uuid::new_v4();
        for path in [
            format!("/api/cities/{id}/onboarding"),
            format!("/api/cities/{id}/stats"),
        ] {
            let response = app
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn stats_are_zeroed_before_generation() {
        let app = app().await;
        let response = app.clone().oneshot(create_request(lima())).await.unwrap();
        let city_id = body_json(response).await["cityId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::get(format!("/api/cities/{city_id}/stats"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["totalHotspots"], 0);
    }
}
