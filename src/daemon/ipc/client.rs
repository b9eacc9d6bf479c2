use std::net::SocketAddr;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::daemon::{
    error::{RecorderError, RecorderResult},
    processing::notify::RecorderEvent,
    service::{RecorderStatus, SessionsView},
};

use super::protocol::{Method, Request, Response};

/// Viewer side of the local connection.
pub struct RecorderClient {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
}

impl RecorderClient {
    pub async fn connect(addr: SocketAddr) -> RecorderResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RecorderError::Ipc(format!("Is the daemon running at {addr}? {e}")))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(reader, LinesCodec::new()),
            writer,
        })
    }

    pub async fn start_tracking(&mut self) -> RecorderResult<()> {
        self.call(Method::StartTracking).await.map(|_| ())
    }

    pub async fn stop_tracking(&mut self) -> RecorderResult<()> {
        self.call(Method::StopTracking).await.map(|_| ())
    }

    pub async fn get_sessions(&mut self) -> RecorderResult<SessionsView> {
        self.call_typed(Method::GetSessions).await
    }

    pub async fn status(&mut self) -> RecorderResult<RecorderStatus> {
        self.call_typed(Method::Status).await
    }

    /// Turns this connection into a stream of recorder events.
    pub async fn subscribe(mut self) -> RecorderResult<EventStream> {
        self.call(Method::Subscribe).await?;
        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }

    async fn call_typed<T: DeserializeOwned>(&mut self, method: Method) -> RecorderResult<T> {
        let data = self.call(method).await?;
        serde_json::from_value(data)
            .map_err(|e| RecorderError::Ipc(format!("Unexpected response to {method:?}: {e}")))
    }

    async fn call(&mut self, method: Method) -> RecorderResult<Value> {
        let mut buffer = serde_json::to_vec(&Request::new(method))
            .map_err(|e| RecorderError::Ipc(e.to_string()))?;
        buffer.push(b'\n');
        self.writer
            .write_all(&buffer)
            .await
            .map_err(|e| RecorderError::Ipc(e.to_string()))?;

        let line = next_line(&mut self.reader).await?.ok_or_else(|| {
            RecorderError::Ipc("Daemon closed the connection before answering".into())
        })?;
        let response: Response = serde_json::from_str(&line)
            .map_err(|e| RecorderError::Ipc(format!("Malformed response: {e}")))?;

        match (response.ok, response.error) {
            (true, _) => Ok(response.data.unwrap_or(Value::Null)),
            (false, Some(error)) => Err(error.into_error()),
            (false, None) => Err(RecorderError::Ipc("Request failed without a reason".into())),
        }
    }
}

/// Events pushed by the daemon after [RecorderClient::subscribe].
pub struct EventStream {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    // Dropping the write half would half-close the connection.
    _writer: OwnedWriteHalf,
}

impl EventStream {
    /// Returns the next event, or `None` when the daemon went away.
    pub async fn next(&mut self) -> RecorderResult<Option<RecorderEvent>> {
        let Some(line) = next_line(&mut self.reader).await? else {
            return Ok(None);
        };
        serde_json::from_str(&line)
            .map(Some)
            .map_err(|e| RecorderError::Ipc(format!("Malformed event: {e}")))
    }
}

async fn next_line(
    reader: &mut FramedRead<OwnedReadHalf, LinesCodec>,
) -> RecorderResult<Option<String>> {
    reader
        .next()
        .await
        .transpose()
        .map_err(|e| RecorderError::Ipc(e.to_string()))
}
