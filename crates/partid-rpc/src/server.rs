// crates/partid-rpc/src/server.rs
//
// PartID RPC server using a JSON-RPC-over-gRPC approach.
//
// A single tonic unary service accepts JSON-encoded requests with a `method`
// field that determines which handler is invoked. This avoids proto codegen
// while still serving over tonic's HTTP/1 + HTTP/2 transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use tonic::transport::Server;
use tonic::Status;

use partid_engine::IdentificationEngine;

use crate::handlers;
use crate::middleware::{self, RateLimitConfig, RateLimiter, CLIENT_ID_HEADER};

// ---------------------------------------------------------------------------
// RpcConfig
// ---------------------------------------------------------------------------

/// Configuration for the RPC server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Host to bind to (e.g., "127.0.0.1" or "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50061
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC Envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC-style request envelope.
/// The client sends a method name and a JSON params payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// The RPC method to invoke (e.g., "identify", "job/open").
    pub method: String,
    /// JSON-encoded parameters for the method.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A JSON-RPC-style response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Whether the request succeeded.
    pub success: bool,
    /// The result data (if success).
    pub result: Option<serde_json::Value>,
    /// Error message (if not success).
    pub error: Option<String>,
}

impl JsonRpcResponse {
    fn from_result(result: Result<serde_json::Value, String>) -> Self {
        match result {
            Ok(value) => Self {
                success: true,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                success: false,
                result: None,
                error: Some(err),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// PartIdRpcServer
// ---------------------------------------------------------------------------

/// The RPC server for a PartID node.
///
/// Holds the shared engine and exposes it through a tonic server with
/// JSON-RPC dispatching.
#[derive(Clone)]
pub struct PartIdRpcServer {
    config: RpcConfig,
    engine: Arc<IdentificationEngine>,
    rate_limiter: RateLimiter,
    /// Daemon start time for uptime calculation.
    start_time: Option<Instant>,
}

impl std::fmt::Debug for PartIdRpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartIdRpcServer")
            .field("config", &self.config)
            .finish()
    }
}

impl PartIdRpcServer {
    pub fn new(config: RpcConfig, engine: Arc<IdentificationEngine>) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());
        Self {
            config,
            engine,
            rate_limiter,
            start_time: None,
        }
    }

    /// Set the daemon start time for uptime calculation.
    pub fn with_start_time(mut self, st: Instant) -> Self {
        self.start_time = Some(st);
        self
    }

    fn service(&self) -> PartIdServiceImpl {
        PartIdServiceImpl {
            engine: self.engine.clone(),
            rate_limiter: self.rate_limiter.clone(),
            start_time: self.start_time,
        }
    }

    /// Start the RPC server and serve until the process is terminated.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.start_with_shutdown(std::future::pending::<()>()).await
    }

    /// Start the RPC server and serve until `signal` resolves.
    pub async fn start_with_shutdown<F>(&self, signal: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        tracing::info!("PartID RPC server starting on {}", addr);

        Server::builder()
            .accept_http1(true)
            .add_service(tonic::service::interceptor::InterceptedService::new(
                PartIdJsonRpcServer::new(self.service()),
                middleware::logging_interceptor,
            ))
            .serve_with_shutdown(addr, signal)
            .await?;

        tracing::info!("PartID RPC server stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Shared state behind the tonic wrapper; dispatches JSON-RPC calls to the
/// appropriate handler.
#[derive(Clone)]
struct PartIdServiceImpl {
    engine: Arc<IdentificationEngine>,
    rate_limiter: RateLimiter,
    start_time: Option<Instant>,
}

impl PartIdServiceImpl {
    /// Dispatch a JSON-RPC request to the appropriate handler based on the method name.
    async fn dispatch(&self, client_id: &str, request: JsonRpcRequest) -> JsonRpcResponse {
        if !self.rate_limiter.check_rate_limit(client_id) {
            return JsonRpcResponse::from_result(Err(format!(
                "Rate limited: too many requests from {}",
                client_id
            )));
        }

        let engine = &self.engine;
        let params = request.params;
        let result = match request.method.as_str() {
            // Identification
            "identify" => {
                dispatch_handler(params, |r| handlers::identify::handle_identify(engine, r)).await
            }

            // Feedback / Calibration
            "feedback/submit" => {
                dispatch_handler(params, |r| {
                    handlers::feedback::handle_submit_feedback(engine, r)
                })
                .await
            }
            "weights/state" => {
                dispatch_handler(params, |r| {
                    handlers::feedback::handle_get_weight_state(engine, r)
                })
                .await
            }
            "templates/list" => {
                dispatch_handler(params, |r| handlers::feedback::handle_list_templates(engine, r))
                    .await
            }

            // Catalog
            "catalog/upsert" => {
                dispatch_handler(params, |r| handlers::catalog::handle_upsert_entries(engine, r))
                    .await
            }
            "catalog/remove" => {
                dispatch_handler(params, |r| handlers::catalog::handle_remove_entry(engine, r))
                    .await
            }
            "catalog/stats" => {
                dispatch_handler(params, |r| handlers::catalog::handle_catalog_stats(engine, r))
                    .await
            }
            "catalog/rebuild" => {
                dispatch_handler(params, |r| handlers::catalog::handle_rebuild_index(engine, r))
                    .await
            }
            "catalog/prune" => {
                dispatch_handler(params, |r| handlers::catalog::handle_prune_index(engine, r))
                    .await
            }

            // Jobs
            "job/open" => {
                dispatch_handler(params, |r| handlers::jobs::handle_open_job(engine, r)).await
            }
            "job/close" => {
                dispatch_handler(params, |r| handlers::jobs::handle_close_job(engine, r)).await
            }
            "job/remaining" => {
                dispatch_handler(params, |r| handlers::jobs::handle_remaining(engine, r)).await
            }
            "job/report" => {
                dispatch_handler(params, |r| handlers::jobs::handle_job_report(engine, r)).await
            }

            // Node
            "metrics/get" => {
                dispatch_handler(params, |r| handlers::node::handle_get_metrics(engine, r)).await
            }
            "node/health" => {
                dispatch_handler(params, |r| handlers::node::handle_get_health(engine, r)).await
            }
            "node/info" => {
                let start_time = self.start_time;
                dispatch_handler(params, |r| {
                    handlers::node::handle_get_node_info(engine, r, start_time)
                })
                .await
            }

            _ => Err(format!("Unknown method: {}", request.method)),
        };

        if let Err(err) = &result {
            tracing::debug!(method = %request.method, error = %err, "RPC call failed");
        }
        JsonRpcResponse::from_result(result)
    }
}

/// Generic dispatch helper: deserialize params into a request type,
/// call the handler, and serialize the result to JSON.
///
/// `null` params are treated as `{}` so parameterless methods can omit them.
async fn dispatch_handler<Req, Resp, F, Fut>(
    params: serde_json::Value,
    handler: F,
) -> Result<serde_json::Value, String>
where
    Req: serde::de::DeserializeOwned,
    Resp: serde::Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = Result<Resp, String>>,
{
    let params = if params.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        params
    };
    let request: Req = serde_json::from_value(params)
        .map_err(|e| format!("Failed to deserialize request: {}", e))?;
    let response = handler(request).await?;
    serde_json::to_value(response).map_err(|e| format!("Failed to serialize response: {}", e))
}

// ---------------------------------------------------------------------------
// Tonic Service Wiring
// ---------------------------------------------------------------------------
// One service, one method. The request and response bodies are raw
// JSON-encoded JsonRpcRequest/JsonRpcResponse bytes.

/// The tonic service wrapper: reads the body, decodes the envelope and
/// dispatches.
#[derive(Clone)]
pub struct PartIdJsonRpcServer {
    inner: PartIdServiceImpl,
}

impl std::fmt::Debug for PartIdJsonRpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartIdJsonRpcServer").finish()
    }
}

impl PartIdJsonRpcServer {
    fn new(inner: PartIdServiceImpl) -> Self {
        Self { inner }
    }
}

impl tonic::server::NamedService for PartIdJsonRpcServer {
    const NAME: &'static str = "partid.rpc.PartIdService";
}

impl<B> tower_service::Service<http::Request<B>> for PartIdJsonRpcServer
where
    B: HttpBody + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    B::Data: Send,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future =
        std::pin::Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let client_id = req
                .headers()
                .get(CLIENT_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("anonymous")
                .to_string();

            let body_bytes = match collect_body(req.into_body()).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!("Failed to read request body: {}", e);
                    return Ok(error_response(format!(
                        "Failed to read request body: {}",
                        e
                    )));
                }
            };

            let rpc_request: JsonRpcRequest = match serde_json::from_slice(&body_bytes) {
                Ok(r) => r,
                Err(e) => {
                    return Ok(error_response(format!("Invalid JSON-RPC request: {}", e)));
                }
            };

            let rpc_response = inner.dispatch(&client_id, rpc_request).await;
            let json = serde_json::to_vec(&rpc_response).unwrap_or_default();
            Ok(build_response(json))
        })
    }
}

fn error_response(message: String) -> http::Response<tonic::body::BoxBody> {
    let resp = JsonRpcResponse::from_result(Err(message));
    build_response(serde_json::to_vec(&resp).unwrap_or_default())
}

/// Collect the body of an HTTP request into bytes.
async fn collect_body<B>(body: B) -> Result<Vec<u8>, String>
where
    B: HttpBody + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B::Data: Send,
{
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    loop {
        match std::future::poll_fn(|cx| HttpBody::poll_frame(body.as_mut(), cx)).await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    use bytes::Buf;
                    collected.extend_from_slice(data.chunk());
                }
            }
            Some(Err(e)) => return Err(e.into().to_string()),
            None => break,
        }
    }

    Ok(collected)
}

/// Build an HTTP response with the given JSON body.
fn build_response(json: Vec<u8>) -> http::Response<tonic::body::BoxBody> {
    let body = tonic::body::BoxBody::new(
        http_body_util::Full::new(bytes::Bytes::from(json))
            .map_err(|e| Status::internal(format!("body error: {}", e))),
    );

    let mut response = http::Response::new(body);
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}
