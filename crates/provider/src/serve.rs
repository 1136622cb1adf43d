//! JSON-lines host shim.
//!
//! One request object per input line, one response object per output line.
//! Requests run on their own tasks, so responses may come back out of order;
//! the `id` of a request is echoed in its response.

use std::sync::Arc;

use castai_engine::{Diagnostic, DiagnosticSeverity, Dispatcher, Reply, Request};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One input line.
#[derive(Debug, Deserialize)]
struct RequestLine {
    #[serde(default)]
    id: serde_json::Value,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

impl RequestLine {
    fn into_request(self) -> (serde_json::Value, serde_json::Result<Request>) {
        let mut envelope = serde_json::Map::new();
        envelope.insert("method".into(), self.method.into());
        if !self.params.is_null() {
            envelope.insert("params".into(), self.params);
        }
        (self.id, serde_json::from_value(serde_json::Value::Object(envelope)))
    }
}

/// One output line.
#[derive(Debug, Serialize)]
struct ResponseLine {
    id: serde_json::Value,
    #[serde(flatten)]
    reply: Reply,
}

fn invalid_request(message: impl Into<String>) -> Reply {
    Reply {
        result: None,
        diagnostics: vec![Diagnostic {
            severity: DiagnosticSeverity::Error,
            summary: format!("Invalid request: {}", message.into()),
            detail: String::new(),
            attribute_path: None,
            code: Some("castai_provider::invalid_request".into()),
        }],
    }
}

fn parse_line(line: &str) -> (serde_json::Value, Result<Request, Reply>) {
    match serde_json::from_str::<RequestLine>(line) {
        Ok(parsed) => {
            let (id, request) = parsed.into_request();
            (id, request.map_err(|e| invalid_request(e.to_string())))
        }
        Err(e) => (serde_json::Value::Null, Err(invalid_request(e.to_string()))),
    }
}

/// Serves requests until the input closes.
///
/// # Errors
///
/// Returns an error when reading input or writing output fails.
pub async fn serve<R, W>(dispatcher: Arc<Dispatcher>, input: R, output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, rx) = mpsc::unbounded_channel::<ResponseLine>();

    let reader = async move {
        let mut lines = input.lines();
        let mut tasks = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let (id, request) = parse_line(&line);
            match request {
                Ok(request) => {
                    debug!(method = request.method(), "Received request");
                    let dispatcher = Arc::clone(&dispatcher);
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        let reply = dispatcher.dispatch(request).await;
                        // the writer only stops once every sender is gone
                        let _ = tx.send(ResponseLine { id, reply });
                    });
                }
                Err(reply) => {
                    warn!("Rejected malformed request line");
                    let _ = tx.send(ResponseLine { id, reply });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Request task failed");
            }
        }
        info!("Input closed, shutting down");
        Ok::<(), std::io::Error>(())
    };

    let (read, write) = tokio::join!(reader, write_responses(rx, output));
    read?;
    write
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<ResponseLine>, mut output: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(())
}
