use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::Hub;
use crate::protocol::Reply;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/api/snapshot", get(api_snapshot))
        .route("/api/schedules", get(api_schedules))
        .route("/api/profiles", get(api_profiles))
        .with_state(hub)
}

async fn api_snapshot(State(hub): State<Hub>) -> impl IntoResponse {
    let st = hub.state.read().await;
    Json(st.snapshot())
}

async fn api_schedules(State(hub): State<Hub>) -> impl IntoResponse {
    Json(hub.scheduler.status().await)
}

async fn api_profiles(State(hub): State<Hub>) -> Result<Json<Reply>, StatusCode> {
    let load = async {
        Ok::<_, anyhow::Error>(Reply::Profiles {
            data: hub.db.load_profiles().await?,
            automation_rules: hub.db.load_automation_rules().await?,
        })
    };
    load.await.map(Json).map_err(|e| {
        error!("GET /api/profiles: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// ---------------------------------------------------------------------------
// WebSocket session
// ---------------------------------------------------------------------------

async fn ws_upgrade(ws: WebSocketUpgrade, State(hub): State<Hub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, hub))
}

/// One connected dashboard.  Gets the current snapshot right away, then
/// every broadcast; its own commands are answered on this socket only.
async fn client_session(mut socket: WebSocket, hub: Hub) {
    let mut broadcasts = hub.subscribe();
    info!("client connected");

    if let Some(snapshot) = hub.snapshot_json().await {
        if socket.send(Message::Text(snapshot.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = hub.dispatch(text.as_str().as_bytes()).await {
                        if socket.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("websocket error: {e}");
                    break;
                }
            },
            outgoing = broadcasts.recv() => match outgoing {
                Ok(msg) => {
                    if socket.send(Message::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "slow client skipped broadcasts");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("client disconnected");
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(hub: Hub, port: u16, cancel: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("listening on http://{addr} (ws at /ws)");

    axum::serve(listener, router(hub))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("web server shutting down");
        })
        .await
        .context("web server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::scheduler::{Day, Schedule, Scheduler};
    use crate::state::ControllerState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use irrigation_sim::CycleConfig;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn hub() -> Hub {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let state = ControllerState::new(CycleConfig::default(), 65.0).shared();
        let scheduler = Scheduler::new(
            state.clone(),
            vec![Schedule {
                id: "m".into(),
                time: "07:00".into(),
                days: vec![Day::Monday],
                duration: 60,
                enabled: true,
            }],
        );
        Hub::new(state, scheduler, db)
    }

    async fn get_json(hub: Hub, uri: &str) -> (StatusCode, Value) {
        let res = router(hub)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn snapshot_route() {
        let (status, json) = get_json(hub().await, "/api/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["isWatering"], false);
        assert_eq!(json["sensors"]["soilMoisture"], 65.0);
    }

    #[tokio::test]
    async fn schedules_route() {
        let (status, json) = get_json(hub().await, "/api/schedules").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["enabled"], false);
        assert_eq!(json["schedules"][0]["time"], "07:00");
    }

    #[tokio::test]
    async fn profiles_route() {
        let (status, json) = get_json(hub().await, "/api/profiles").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["type"], "profiles");
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_route_404() {
        let (status, _) = get_json(hub().await, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
