//! Server side of the distributed runtime: the `AgentService` gRPC
//! implementation plus the listener that serves it.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tonic::{Request, Response, Status};

use crate::agent::AgentName;
use crate::config::DistributedConfig;
use crate::distributed::proto::agent_service_server::{AgentService, AgentServiceServer};
use crate::distributed::proto::{
    ExecuteRequest, ExecuteResponse, ListenRequest, SendRequest, SendResponse, WireMessage,
};
use crate::distributed::{validate_wire_agent_name, TransportError};
use crate::error::CaxtonError;
use crate::message::Message;
use crate::runtime::Runtime;

/// Implements the generated `AgentService` trait over a local `Runtime`.
pub struct AgentServiceImpl {
    runtime: Arc<Runtime>,
}

impl AgentServiceImpl {
    /// Wraps `runtime` for serving.
    #[must_use]
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    fn resolve_name(&self, raw: &str) -> Result<AgentName, Status> {
        validate_wire_agent_name(raw)
            .map_err(|_| Status::invalid_argument(format!("invalid agent name: {raw}")))?;
        AgentName::try_new(raw.to_string())
            .map_err(|_| Status::invalid_argument(format!("invalid agent name: {raw}")))
    }
}

fn error_to_status(err: CaxtonError) -> Status {
    match err {
        CaxtonError::NotFound(msg) => Status::not_found(msg),
        CaxtonError::NotReady(name) => Status::unavailable(format!("{name} is not ready")),
        CaxtonError::Timeout(msg) => Status::deadline_exceeded(msg),
        CaxtonError::InvalidPathComponent(msg) => Status::invalid_argument(msg),
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl AgentService for AgentServiceImpl {
    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        let req = request.into_inner();
        let target = self.resolve_name(&req.agent_name)?;
        let input = req
            .input
            .ok_or_else(|| Status::invalid_argument("missing input"))?;
        let input = Message::try_from(input)
            .map_err(|e: TransportError| Status::invalid_argument(e.to_string()))?;

        let output = self
            .runtime
            .call(&target, input)
            .await
            .map_err(error_to_status)?;

        Ok(Response::new(ExecuteResponse {
            output: Some(output.into()),
        }))
    }

    async fn send(&self, request: Request<SendRequest>) -> Result<Response<SendResponse>, Status> {
        let req = request.into_inner();
        let target = self.resolve_name(&req.agent_name)?;
        let message = req
            .message
            .ok_or_else(|| Status::invalid_argument("missing message"))?;
        let message = Message::try_from(message)
            .map_err(|e: TransportError| Status::invalid_argument(e.to_string()))?;

        match self.runtime.send(&target, message).await {
            Ok(()) => Ok(Response::new(SendResponse { success: true })),
            Err(err) => Err(error_to_status(err)),
        }
    }

    type ListenStream = Pin<Box<dyn Stream<Item = Result<WireMessage, Status>> + Send + 'static>>;

    async fn listen(
        &self,
        request: Request<ListenRequest>,
    ) -> Result<Response<Self::ListenStream>, Status> {
        let req = request.into_inner();
        let source = self.resolve_name(&req.agent_name)?;

        let mut receiver = self.runtime.recv(&source).await.map_err(error_to_status)?;

        let stream = async_stream::stream! {
            while let Some(message) = receiver.recv().await {
                yield Ok(message.into());
            }
        };

        Ok(Response::new(Box::pin(stream) as Self::ListenStream))
    }
}

/// Runs the `AgentService` server on `config.listen_addr` until the process
/// is terminated.
pub async fn serve(runtime: Arc<Runtime>, config: &DistributedConfig) -> Result<(), CaxtonError> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| CaxtonError::Transport(TransportError::Backend(format!("bad listen_addr: {e}"))))?;

    let service = AgentServiceImpl::new(runtime);
    let mut server = tonic::transport::Server::builder();

    if let Some(tls) = super::tls::configure_server(&config.tls)
        .await
        .map_err(CaxtonError::Transport)?
    {
        server = server
            .tls_config(tls)
            .map_err(|e| CaxtonError::Transport(TransportError::Tls(e.to_string())))?;
    }

    tracing::info!(address = %addr, "starting AgentService gRPC server");

    server
        .add_service(AgentServiceServer::new(service))
        .serve(addr)
        .await
        .map_err(|e| CaxtonError::Transport(TransportError::Backend(e.to_string())))?;

    Ok(())
}
