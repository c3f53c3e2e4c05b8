//! Gateway mode: newline-delimited JSON over stdin/stdout
//!
//! Each input line is one request, handled on its own task, so a slow turn never blocks
//! requests for other sessions. Responses are written one per line in completion order;
//! clients correlate them with the optional `request_id` they sent.
//!
//! ```text
//! {"op":"create_session","request_id":1}
//! {"op":"status","id":"<uuid>"}
//! {"op":"chat","id":"<uuid>","message":"hello"}
//! ```

use crate::config::Config;
use crate::conversation::LocalConversationFactory;
use crate::service::ChatService;
use crate::utils::ServiceError;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const MEMORY_WARNING_THRESHOLD_MB: u64 = 200;
const MEMORY_CHECK_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayRequest {
    CreateSession,
    Status {
        id: String,
    },
    Chat {
        #[serde(default)]
        id: Option<String>,
        message: String,
    },
}

#[derive(Debug, PartialEq)]
enum StopReason {
    EndOfInput,
    Signal,
}

/// Handles one request line and returns the response object.
pub async fn handle_line(service: &ChatService, line: &str) -> Value {
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => return error_response("invalid_request", &format!("invalid JSON: {}", e)),
    };
    let request_id = raw.get("request_id").cloned();

    let mut response = match GatewayRequest::deserialize(&raw) {
        Ok(request) => handle_request(service, request).await,
        Err(e) => error_response("invalid_request", &e.to_string()),
    };

    if let (Some(request_id), Some(object)) = (request_id, response.as_object_mut()) {
        object.insert("request_id".to_string(), request_id);
    }
    response
}

async fn handle_request(service: &ChatService, request: GatewayRequest) -> Value {
    let result = match request {
        GatewayRequest::CreateSession => service
            .create_session()
            .await
            .map(|info| json!({ "ok": true, "id": info.id })),
        GatewayRequest::Status { id } => service
            .session_status(&id)
            .await
            .map(|status| json!({ "ok": true, "exists": status.exists })),
        GatewayRequest::Chat { id, message } => service
            .chat(id.as_deref(), &message)
            .await
            .map(|reply| json!({ "ok": true, "id": reply.id, "reply": reply.reply })),
    };

    result.unwrap_or_else(|e| service_error_response(&e))
}

fn service_error_response(e: &ServiceError) -> Value {
    match e.severity() {
        tracing::Level::ERROR => error!(code = e.client_code(), error = %e, "Request failed"),
        tracing::Level::WARN => warn!(code = e.client_code(), error = %e, "Request failed"),
        _ => debug!(code = e.client_code(), error = %e, "Request rejected"),
    }

    let mut response = error_response(e.client_code(), &e.to_string());
    if let (Some(id), Some(object)) = (e.session_id(), response.as_object_mut()) {
        object.insert("id".to_string(), json!(id));
    }
    response
}

fn error_response(code: &str, message: &str) -> Value {
    json!({ "ok": false, "error": { "code": code, "message": message } })
}

/// Reads requests from `input` until end of input or a shutdown signal, writing responses
/// to `output`.
///
/// On end of input, requests already read run to completion. On a signal, the service is
/// drained first, so running turns lose their conversations and queued ones are refused.
/// Either way the wait for outstanding responses is bounded by the request timeout.
pub async fn serve<R, W>(
    service: Arc<ChatService>,
    input: R,
    output: W,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (response_tx, response_rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(write_responses(output, response_rx));

    let mut lines = input.lines();
    let mut pending = JoinSet::new();

    let reason = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, no longer reading requests");
                break StopReason::Signal;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let service = Arc::clone(&service);
                    let response_tx = response_tx.clone();
                    pending.spawn(async move {
                        let response = handle_line(&service, &line).await;
                        if response_tx.send(response.to_string()).await.is_err() {
                            warn!("Response writer closed, dropping response");
                        }
                    });
                }
                Ok(None) => {
                    info!("End of input, no longer reading requests");
                    break StopReason::EndOfInput;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read request line");
                    break StopReason::EndOfInput;
                }
            },
        }

        // Reap finished requests so the set does not grow unbounded
        while pending.try_join_next().is_some() {}
    };

    if reason == StopReason::Signal {
        service.shutdown().await;
    }

    let grace = service
        .dispatcher()
        .timeout()
        .saturating_add(SHUTDOWN_TIMEOUT);
    let outstanding = pending.len();
    if outstanding > 0 {
        debug!(outstanding = outstanding, "Waiting for outstanding requests");
    }
    let drained = tokio::time::timeout(grace, async {
        while pending.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = pending.len(),
            "Outstanding requests did not finish in time, abandoning them"
        );
        pending.abort_all();
    }

    drop(response_tx);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(anyhow::anyhow!("Response writer panicked: {}", e)),
        Err(_) => {
            error!("Response writer did not finish within 5s timeout");
            Ok(())
        }
    }
}

async fn write_responses<W>(mut output: W, mut responses: mpsc::Receiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = responses.recv().await {
        output
            .write_all(line.as_bytes())
            .await
            .context("Failed to write response")?;
        output.write_all(b"\n").await.context("Failed to write response")?;
        output.flush().await.context("Failed to flush response")?;
    }
    output.shutdown().await.ok();
    Ok(())
}

/// Runs the gateway on stdin/stdout until end of input or SIGINT/SIGTERM.
///
/// This function:
/// 1. Builds the chat service from configuration
/// 2. Starts the eviction sweeper and the memory monitor
/// 3. Serves requests until stdin closes or a signal arrives
/// 4. Stops background tasks and drains the service
pub async fn run_gateway(config: &Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_sessions = config.max_sessions,
        ttl_secs = config.ttl_secs,
        "Starting dash-sessions gateway"
    );

    let factory = Arc::new(LocalConversationFactory::new(config.persist));
    let service = Arc::new(ChatService::from_config(config, factory));

    let (sweeper_handle, sweeper_shutdown) =
        service.registry().start_sweeper(config.sweep_interval());
    info!(
        interval_secs = config.sweep_interval_secs,
        "Eviction sweeper started"
    );

    let (memory_handle, memory_shutdown) = start_memory_monitor();

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(wait_for_signal(shutdown_tx));

    info!("Gateway is running. Press Ctrl+C to stop.");

    let served = serve(
        Arc::clone(&service),
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_rx,
    )
    .await;

    info!("Starting graceful shutdown sequence...");

    stop_background_task("sweeper", sweeper_handle, sweeper_shutdown).await;
    stop_background_task("memory monitor", memory_handle, memory_shutdown).await;

    service.shutdown().await;

    info!("Gateway stopped gracefully");
    served
}

async fn wait_for_signal(shutdown_tx: mpsc::Sender<()>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to set up signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
        }
    }
    let _ = shutdown_tx.send(()).await;
}

/// Samples this process's resident memory and warns above the threshold.
fn start_memory_monitor() -> (JoinHandle<()>, mpsc::Sender<()>) {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        use sysinfo::{System, get_current_pid};

        let mut system = System::new_all();
        let current_pid = match get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                error!(
                    "Failed to get current PID for memory monitoring: {}. Memory monitoring disabled.",
                    e
                );
                return;
            }
        };
        let mut interval = tokio::time::interval(Duration::from_secs(MEMORY_CHECK_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    system.refresh_all();
                    if let Some(process) = system.process(current_pid) {
                        let memory_mb = process.memory() / (1024 * 1024);
                        if memory_mb > MEMORY_WARNING_THRESHOLD_MB {
                            warn!(memory_mb = memory_mb, threshold_mb = MEMORY_WARNING_THRESHOLD_MB, "Memory usage exceeds threshold");
                        } else {
                            debug!(memory_mb = memory_mb, "Current memory usage");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Memory monitoring task received shutdown signal");
                    break;
                }
            }
        }
    });

    (handle, shutdown_tx)
}

async fn stop_background_task(name: &str, handle: JoinHandle<()>, shutdown: mpsc::Sender<()>) {
    info!("Signaling {} task to stop...", name);
    let _ = shutdown.send(()).await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(())) => {
            info!("{} task completed gracefully", name);
        }
        Ok(Err(e)) => {
            error!("{} task panicked: {}", name, e);
        }
        Err(_) => {
            error!("{} task did not complete within 5s timeout", name);
        }
    }
}
