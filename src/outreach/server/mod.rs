// SPDX-License-Identifier: MIT

//! HTTP surface: operator responses, run control and event streaming

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adk::error::Result;
use crate::outreach::runner::Runner;

pub async fn serve(runner: Runner, port: u16) -> Result<()> {
    let app = router(runner);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(runner: Runner) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/human-input", get(list_human_requests))
        .route("/api/human-input/{request_id}", post(submit_human_response))
        .route("/api/human-input/{request_id}/cancel", post(cancel_human_request))
        .route("/api/runs", post(create_run))
        .route("/api/runs/stream", post(stream_run))
        .route("/api/runs/{run_id}", get(get_run))
        .route("/api/runs/{run_id}/cancel", post(cancel_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(runner)
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_human_requests(State(runner): State<Runner>) -> Json<Value> {
    Json(json!(runner.broker().pending_requests().await))
}

#[derive(Deserialize)]
struct HumanResponseBody {
    response: Option<String>,
    /// Older consumers post the preview link as `url`
    url: Option<String>,
}

async fn submit_human_response(
    State(runner): State<Runner>,
    Path(request_id): Path<String>,
    body: Bytes,
) -> Response {
    let value = match serde_json::from_slice::<HumanResponseBody>(&body) {
        Ok(HumanResponseBody {
            response: Some(v), ..
        })
        | Ok(HumanResponseBody { url: Some(v), .. }) => v,
        Ok(_) => return error(StatusCode::BAD_REQUEST, "body needs 'response' or 'url'"),
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("malformed body: {}", e)),
    };

    if runner.broker().submit_response(&request_id, &value).await {
        Json(json!({ "status": "completed", "request_id": request_id })).into_response()
    } else {
        error(
            StatusCode::NOT_FOUND,
            format!("request {} not found or not pending", request_id),
        )
    }
}

async fn cancel_human_request(
    State(runner): State<Runner>,
    Path(request_id): Path<String>,
) -> Response {
    if runner.broker().cancel_request(&request_id).await {
        Json(json!({ "status": "cancelled", "request_id": request_id })).into_response()
    } else {
        error(
            StatusCode::NOT_FOUND,
            format!("request {} not found or not pending", request_id),
        )
    }
}

#[derive(Deserialize)]
struct RunRequest {
    input: Value,
    label: Option<String>,
}

fn parse_run_request(body: &Bytes) -> std::result::Result<RunRequest, Response> {
    serde_json::from_slice::<RunRequest>(body)
        .map_err(|e| error(StatusCode::BAD_REQUEST, format!("malformed body: {}", e)))
}

async fn create_run(State(runner): State<Runner>, body: Bytes) -> Response {
    let request = match parse_run_request(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match runner.start(request.input, request.label, None).await {
        Ok(handle) => (
            StatusCode::ACCEPTED,
            Json(json!({ "run_id": handle.id(), "label": handle.label() })),
        )
            .into_response(),
        Err(e) => error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn get_run(State(runner): State<Runner>, Path(run_id): Path<String>) -> Response {
    match runner.get(&run_id).await {
        Some(summary) => Json(json!(summary)).into_response(),
        None => error(StatusCode::NOT_FOUND, format!("run {} not found", run_id)),
    }
}

async fn cancel_run(State(runner): State<Runner>, Path(run_id): Path<String>) -> Response {
    if runner.cancel(&run_id).await {
        Json(json!({ "status": "cancelling", "run_id": run_id })).into_response()
    } else {
        error(
            StatusCode::NOT_FOUND,
            format!("run {} not found or already finished", run_id),
        )
    }
}

async fn stream_run(
    State(runner): State<Runner>,
    body: Bytes,
) -> std::result::Result<
    Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>,
    Response,
> {
    let request = parse_run_request(&body)?;

    let (tx, rx) = mpsc::channel(100);
    runner
        .start(request.input, request.label, Some(tx))
        .await
        .map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .json_data(&event)
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
        )
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(1))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::Result as AdkResult;
    use crate::adk::tool::{Tool, ToolContext};
    use crate::outreach::broker::testing::{broker, RecordingChannel};
    use crate::outreach::broker::{dedup_key, CreateOutcome, HumanInteractionBroker};
    use crate::outreach::pipeline::{PipelineBuilder, PipelineLoader};
    use crate::outreach::registry::ToolRegistry;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use once_cell::sync::Lazy;
    use std::sync::Arc;
    use tower::ServiceExt;

    static SCHEMA: Lazy<Value> = Lazy::new(|| json!({"type": "object"}));

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn schema(&self) -> &Value {
            &SCHEMA
        }
        async fn execute(&self, input: Value, _ctx: &mut ToolContext<'_>) -> AdkResult<Value> {
            Ok(input)
        }
    }

    async fn runner() -> (Runner, Arc<HumanInteractionBroker>) {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await;
        let def = PipelineLoader::parse_yaml(
            r#"
name: echo
root:
  kind: tool
  name: echoer
  tool: echo
  args:
    name: "{business_data.name}"
  output_key: echoed
"#,
        )
        .unwrap();
        let pipeline = PipelineBuilder::new(registry).build(def).await.unwrap();
        let broker = Arc::new(broker(Arc::new(RecordingChannel::default())));
        (Runner::new(Arc::new(pipeline), broker.clone()), broker)
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (runner, _) = runner().await;
        let resp = router(runner)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_submit_unknown_request_is_404() {
        let (runner, _) = runner().await;
        let resp = router(runner)
            .oneshot(post("/api/human-input/nope", r#"{"response": "x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_response_is_400() {
        let (runner, broker) = runner().await;
        let CreateOutcome::Created(id) = broker
            .create_request("p", &dedup_key("p", "l"), None)
            .await
        else {
            panic!("expected a new request");
        };

        let app = router(runner);
        let resp = app
            .clone()
            .oneshot(post(&format!("/api/human-input/{}", id), "{not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(post(&format!("/api/human-input/{}", id), r#"{"other": 1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(broker.get(&id).await.unwrap().response.is_none());
    }

    #[tokio::test]
    async fn test_submit_resolves_once() {
        let (runner, broker) = runner().await;
        let CreateOutcome::Created(id) = broker
            .create_request("p", &dedup_key("p", "l"), None)
            .await
        else {
            panic!("expected a new request");
        };
        let app = router(runner);

        let listed = app
            .clone()
            .oneshot(Request::get("/api/human-input").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(listed).await[0]["request_id"], json!(id));

        let uri = format!("/api/human-input/{}", id);
        let resp = app
            .clone()
            .oneshot(post(&uri, r#"{"url": "https://preview.example"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let again = app
            .oneshot(post(&uri, r#"{"response": "late"}"#))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            broker.get(&id).await.unwrap().response.as_deref(),
            Some("https://preview.example")
        );
    }

    #[tokio::test]
    async fn test_run_lifecycle_over_http() {
        let (runner, _) = runner().await;
        let app = router(runner);

        let resp = app
            .clone()
            .oneshot(post(
                "/api/runs",
                r#"{"input": {"business_data": {"name": "Acme"}}, "label": "lead-1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let run_id = body_json(resp).await["run_id"].as_str().unwrap().to_string();

        let mut summary = Value::Null;
        for _ in 0..50 {
            let resp = app
                .clone()
                .oneshot(
                    Request::get(format!("/api/runs/{}", run_id))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            summary = body_json(resp).await;
            if summary["report"].is_object() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(summary["status"], "completed");
        assert_eq!(summary["label"], "lead-1");
        assert_eq!(summary["report"]["state"]["echoed"], json!({"name": "Acme"}));
    }

    #[tokio::test]
    async fn test_stream_ends_with_run_finished() {
        let (runner, _) = runner().await;
        let resp = router(runner)
            .oneshot(post(
                "/api/runs/stream",
                r#"{"input": {"business_data": {"name": "Acme"}}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("\"type\":\"tool_call\""));
        assert!(text.contains("\"type\":\"run_finished\""));
    }

    #[tokio::test]
    async fn test_run_with_non_object_input_is_400() {
        let (runner, _) = runner().await;
        let resp = router(runner)
            .oneshot(post("/api/runs", r#"{"input": [1, 2]}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_run_is_404() {
        let (runner, _) = runner().await;
        let app = router(runner);
        let resp = app
            .clone()
            .oneshot(Request::get("/api/runs/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(post("/api/runs/missing/cancel", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
