//! Client-side RPC plumbing: building a channel to a remote node and
//! invoking `Execute`/`Send`/`Listen` against it.

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::agent::AgentName;
use crate::config::DistributedTlsConfig;
use crate::distributed::proto::agent_service_client::AgentServiceClient;
use crate::distributed::proto::{ExecuteRequest, ListenRequest, SendRequest};
use crate::distributed::tls;
use crate::distributed::TransportError;
use crate::error::CaxtonError;
use crate::message::Message;

/// Builds a lazily-connecting channel to `addr`, configured per
/// `tls_config` and the current `ENVIRONMENT` variable.
///
/// A TLS configuration failure (missing cert files, refused
/// `insecure_skip_verify`) is propagated rather than silently falling back
/// to plaintext.
pub async fn build_channel(
    addr: &str,
    tls_config: &DistributedTlsConfig,
) -> Result<Channel, TransportError> {
    let environment = std::env::var("ENVIRONMENT").ok();
    let endpoint = Endpoint::from_shared(addr.to_string())
        .map_err(|e| TransportError::Backend(e.to_string()))?;

    let endpoint = match tls::configure_client(tls_config, environment.as_deref()).await? {
        Some(client_tls) => endpoint
            .tls_config(client_tls)
            .map_err(|e| TransportError::Tls(e.to_string()))?,
        None => endpoint,
    };

    Ok(endpoint.connect_lazy())
}

fn status_to_error(target: &AgentName, status: Status) -> CaxtonError {
    match status.code() {
        tonic::Code::NotFound => CaxtonError::NotFound(target.to_string()),
        tonic::Code::DeadlineExceeded => {
            CaxtonError::Timeout(format!("remote call to {target} timed out"))
        }
        _ => CaxtonError::Transport(TransportError::Status(status)),
    }
}

/// Invokes the peer's `Execute` RPC for `target`.
pub async fn execute(
    channel: Channel,
    target: &AgentName,
    msg: Message,
    timeout: Duration,
) -> Result<Message, CaxtonError> {
    let mut client = AgentServiceClient::new(channel);

    let mut request = Request::new(ExecuteRequest {
        agent_name: target.to_string(),
        input: Some(msg.into()),
    });
    request.set_timeout(timeout);

    let response = client
        .execute(request)
        .await
        .map_err(|status| status_to_error(target, status))?
        .into_inner();

    let output = response
        .output
        .ok_or_else(|| CaxtonError::Transport(TransportError::Decode("missing output".into())))?;
    Message::try_from(output).map_err(CaxtonError::Transport)
}

/// Invokes the peer's `Send` RPC for `target`.
pub async fn send(channel: Channel, target: &AgentName, msg: Message) -> Result<(), CaxtonError> {
    let mut client = AgentServiceClient::new(channel);

    let response = client
        .send(Request::new(SendRequest {
            agent_name: target.to_string(),
            message: Some(msg.into()),
        }))
        .await
        .map_err(|status| status_to_error(target, status))?
        .into_inner();

    if response.success {
        Ok(())
    } else {
        Err(CaxtonError::Transport(TransportError::Backend(format!(
            "remote send to {target} was not acknowledged"
        ))))
    }
}

/// Opens the peer's `Listen` stream for `source` and fans messages into a
/// locally-buffered channel of `buffer_size`, terminating when the stream
/// closes.
pub async fn listen(
    channel: Channel,
    source: AgentName,
    buffer_size: usize,
) -> Result<tokio::sync::mpsc::Receiver<Message>, CaxtonError> {
    let mut client = AgentServiceClient::new(channel);

    let mut stream = client
        .listen(Request::new(ListenRequest {
            agent_name: source.to_string(),
        }))
        .await
        .map_err(|status| status_to_error(&source, status))?
        .into_inner();

    let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);
    tokio::spawn(async move {
        while let Ok(Some(wire)) = stream.message().await {
            match Message::try_from(wire) {
                Ok(message) => {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(source = %source, error = %err, "dropping malformed remote message");
                }
            }
        }
    });

    Ok(rx)
}
