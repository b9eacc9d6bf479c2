use std::net::SocketAddr;

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
};
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use crate::daemon::{
    error::RecorderResult,
    service::RecorderService,
    storage::SessionStore,
};

use super::protocol::{
    ErrorInfo, MAX_REQUEST_BYTES, Method, PROTOCOL_VERSION, Request, Response, parse_request,
};

/// Accepts viewer connections and serves them until cancelled.
pub struct IpcServer<S: SessionStore> {
    listener: TcpListener,
    service: RecorderService<S>,
    shutdown: CancellationToken,
}

impl<S: SessionStore> IpcServer<S> {
    pub async fn bind(
        addr: SocketAddr,
        service: RecorderService<S>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .inspect_err(|e| warn!("Failed to bind {addr}: {e}"))?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            service,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {peer}");
                    let service = self.service.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service, shutdown).await {
                            debug!("Connection with {peer} ended with an error {e:?}");
                        }
                    });
                }
                Err(e) => warn!("Failed to accept connection {e}"),
            }
        }
    }
}

async fn handle_connection<S: SessionStore>(
    stream: TcpStream,
    service: RecorderService<S>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REQUEST_BYTES));

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next() => line,
        };
        let request = match line {
            None => return Ok(()),
            Some(Ok(line)) => parse_request(&line),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let response = Response::error(
                    None,
                    "request_too_large",
                    "request exceeded maximum size",
                );
                write_message(&mut writer, &response).await?;
                return Ok(());
            }
            Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
        };

        let request = match request {
            Ok(request) => request,
            Err(info) => {
                warn!(code = %info.code, message = %info.message, "Failed to read request");
                write_message(&mut writer, &Response::error_with_info(None, info)).await?;
                continue;
            }
        };

        debug!(method = ?request.method, id = ?request.id, "Request received");
        if request.method == Method::Subscribe && request.protocol_version == PROTOCOL_VERSION {
            return stream_events(request, &service, &mut lines, &mut writer, &shutdown).await;
        }

        let response = handle_request(request, &service).await;
        write_message(&mut writer, &response).await?;
    }
}

/// Answers the subscription and forwards events until the viewer hangs up.
async fn stream_events<S: SessionStore, R>(
    request: Request,
    service: &RecorderService<S>,
    lines: &mut FramedRead<R, LinesCodec>,
    writer: &mut OwnedWriteHalf,
    shutdown: &CancellationToken,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut events = service.events();
    write_message(writer, &Response::ok(request.id, json!({ "subscribed": true }))).await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            event = events.next() => match event {
                Some(event) => write_message(writer, &event).await?,
                None => return Ok(()),
            },
            line = lines.next() => match line {
                None | Some(Err(_)) => return Ok(()),
                Some(Ok(_)) => debug!("Ignoring request on a subscribed connection"),
            },
        }
    }
}

pub async fn handle_request<S: SessionStore>(
    request: Request,
    service: &RecorderService<S>,
) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::StartTracking => respond(request.id, service.start().await.map(|_| json!({}))),
        Method::StopTracking => respond(request.id, service.stop().await.map(|_| json!({}))),
        Method::GetSessions => respond(request.id, service.query().await),
        Method::Status => respond(request.id, Ok(service.status().await)),
        Method::Subscribe => Response::error(
            request.id,
            "invalid_request",
            "subscribe must be the first request of a stream",
        ),
    }
}

fn respond<T: Serialize>(id: Option<String>, result: RecorderResult<T>) -> Response {
    match result {
        Ok(data) => match serde_json::to_value(data) {
            Ok(value) => Response::ok(id, value),
            Err(e) => Response::error(id, "internal", format!("failed to encode response: {e}")),
        },
        Err(e) => {
            debug!("Request failed {e}");
            Response::error_with_info(id, ErrorInfo::from(&e))
        }
    }
}

async fn write_message<T: Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> Result<()> {
    let mut buffer = serde_json::to_vec(message)?;
    buffer.push(b'\n');
    writer.write_all(&buffer).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use tempfile::tempdir;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpStream,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            config::RecorderConfig,
            error::RecorderError,
            ipc::client::RecorderClient,
            processing::notify::RecorderEvent,
            service::RecorderService,
            storage::JsonFileStore,
        },
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
        window_api::{ActiveWindowData, MockWindowManager},
    };

    use super::IpcServer;

    async fn spawn_server(dir: &std::path::Path) -> Result<(std::net::SocketAddr, CancellationToken)> {
        let mut manager = MockWindowManager::new();
        manager.expect_get_idle_time().returning(|| Ok(0));
        manager.expect_get_active_window_data().returning(|| {
            Ok(ActiveWindowData {
                app: "doc.txt".into(),
                task: "write".into(),
            })
        });
        let mut config = RecorderConfig::new(dir);
        config.ipc_addr = "127.0.0.1:0".parse()?;
        let store = JsonFileStore::new(config.store_path.clone())?;
        let service =
            RecorderService::from_config(Box::new(manager), store, Arc::new(DefaultClock), &config);

        let shutdown = CancellationToken::new();
        let server = IpcServer::bind(config.ipc_addr, service, shutdown.clone()).await?;
        let addr = server.local_addr()?;
        tokio::spawn(server.run());
        Ok((addr, shutdown))
    }

    async fn wait_for_open_session(client: &mut RecorderClient) -> Result<()> {
        for _ in 0..100 {
            if client.status().await?.open_session.is_some() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::bail!("No session was opened")
    }

    #[tokio::test]
    async fn test_start_stop_query() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let (addr, shutdown) = spawn_server(dir.path()).await?;
        let mut client = RecorderClient::connect(addr).await?;

        client.start_tracking().await?;
        assert!(matches!(
            client.start_tracking().await,
            Err(RecorderError::AlreadyTracking)
        ));
        wait_for_open_session(&mut client).await?;
        client.stop_tracking().await?;
        assert!(matches!(
            client.stop_tracking().await,
            Err(RecorderError::NotTracking)
        ));

        let view = client.get_sessions().await?;
        assert_eq!(view.sessions.len(), 1);
        assert_eq!(view.sessions[0].app, "doc.txt");
        assert_eq!(view.sessions[0].task, "write");

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn test_subscriber_sees_events() -> Result<()> {
        let dir = tempdir()?;
        let (addr, shutdown) = spawn_server(dir.path()).await?;
        let mut events = RecorderClient::connect(addr).await?.subscribe().await?;
        let mut client = RecorderClient::connect(addr).await?;

        client.start_tracking().await?;
        wait_for_open_session(&mut client).await?;
        client.stop_tracking().await?;

        let timeout = Duration::from_secs(5);
        assert_eq!(
            tokio::time::timeout(timeout, events.next()).await??,
            Some(RecorderEvent::TrackingStarted)
        );
        let recorded = tokio::time::timeout(timeout, events.next()).await??;
        assert!(matches!(
            recorded,
            Some(RecorderEvent::SessionRecorded { session }) if &*session.app == "doc.txt"
        ));
        assert_eq!(
            tokio::time::timeout(timeout, events.next()).await??,
            Some(RecorderEvent::TrackingStopped)
        );

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_requests_get_error_responses() -> Result<()> {
        let dir = tempdir()?;
        let (addr, shutdown) = spawn_server(dir.path()).await?;
        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader).lines();

        writer.write_all(b"not json\n").await?;
        let response: serde_json::Value =
            serde_json::from_str(&reader.next_line().await?.unwrap())?;
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["code"], "invalid_request");

        writer
            .write_all(b"{\"protocol_version\":99,\"method\":\"status\",\"id\":\"a\"}\n")
            .await?;
        let response: serde_json::Value =
            serde_json::from_str(&reader.next_line().await?.unwrap())?;
        assert_eq!(response["error"]["code"], "protocol_mismatch");
        assert_eq!(response["id"], "a");

        shutdown.cancel();
        Ok(())
    }
}
