//! Sending and receiving messages over the channel between supervisor and worker.

use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::process::Child;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::debug;

type Reader = Pin<Box<dyn AsyncRead + Send>>;
type Writer = Pin<Box<dyn AsyncWrite + Send>>;

/// Connection carrying length-delimited JSON messages
pub struct Connection {
    reader: FramedRead<Reader, LengthDelimitedCodec>,
    writer: FramedWrite<Writer, LengthDelimitedCodec>,
}

impl Connection {
    /// Returns a new [Connection] over given read and write halves
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let reader: Reader = Box::pin(reader);
        let writer: Writer = Box::pin(writer);
        Connection {
            reader: FramedRead::new(reader, LengthDelimitedCodec::new()),
            writer: FramedWrite::new(writer, LengthDelimitedCodec::new()),
        }
    }

    /// Returns a new [Connection] over given unix stream
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read, write) = stream.into_split();
        Connection::new(read, write)
    }

    /// Returns a pair of [Connection] connected to one another
    pub fn pair() -> std::io::Result<(Connection, Connection)> {
        let (local, remote) = UnixStream::pair()?;
        Ok((Connection::from_stream(local), Connection::from_stream(remote)))
    }

    /// Returns the worker side of a subprocess channel, over stdin and stdout
    pub fn stdio() -> Self {
        Connection::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Returns the supervisor side of a subprocess channel.
    /// Takes the piped stdin and stdout of given child.
    pub fn child(child: &mut Child) -> std::io::Result<Self> {
        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdin is not piped")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdout is not piped")
        })?;
        Ok(Connection::new(stdout, stdin))
    }

    /// Send a message
    pub async fn send<T>(&mut self, msg: &T) -> Result<(), std::io::Error>
    where
        T: Serialize + std::fmt::Debug,
    {
        debug!("send msg={:?}", msg);
        let data = serde_json::to_vec(msg).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Unable to encode to json - {}", e),
            )
        })?;
        let mut buf = BytesMut::with_capacity(data.len());
        buf.put(data.as_slice());
        self.writer.send(buf.freeze()).await
    }

    /// Receive a message. Returns `None` when the remote end is closed.
    pub async fn recv<T>(&mut self) -> Option<Result<T, std::io::Error>>
    where
        T: DeserializeOwned + std::fmt::Debug,
    {
        let bytes = match self.reader.next().await? {
            Ok(bytes) => bytes,
            Err(e) => return Some(Err(e)),
        };

        let msg = match serde_json::from_slice::<T>(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                return Some(Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Unable to decode from json - {}", e),
                )))
            }
        };
        debug!("recv msg={:?}", msg);
        Some(Ok(msg))
    }

    /// Shutdown the write half of the connection
    pub async fn shutdown(mut self) -> Result<(), std::io::Error> {
        debug!("shutdown {:?}", self);
        SinkExt::<Bytes>::close(&mut self.writer).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Connection {{ read_buffer: {}, write_buffer: {} }}",
            self.reader.read_buffer().len(),
            self.writer.write_buffer().len()
        )
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    /// Test that dropping one end of connection results in other end returning `None` on `recv` call
    #[tokio::test]
    async fn drop_remote() {
        let (mut local, remote) = Connection::pair().unwrap();

        drop(remote);

        assert!(
            local.recv::<Ping>().await.is_none(),
            "Dropped connection should return None"
        );
    }

    #[tokio::test]
    async fn send_recv_in_order() {
        let (mut local, mut remote) = Connection::pair().unwrap();

        local.send(&Ping { seq: 1 }).await.unwrap();
        local.send(&Ping { seq: 2 }).await.unwrap();

        assert_eq!(remote.recv::<Ping>().await.unwrap().unwrap(), Ping { seq: 1 });
        assert_eq!(remote.recv::<Ping>().await.unwrap().unwrap(), Ping { seq: 2 });
    }

    #[tokio::test]
    async fn recv_mismatched_message_is_invalid_data() {
        let (mut local, mut remote) = Connection::pair().unwrap();

        local.send(&"not a ping").await.unwrap();

        let err = remote
            .recv::<Ping>()
            .await
            .expect("frame should be received")
            .expect_err("frame should not decode");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn shutdown_closes_remote() {
        let (local, mut remote) = Connection::pair().unwrap();

        local.shutdown().await.unwrap();

        assert!(remote.recv::<Ping>().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_message() {
        let (mut local, mut remote) = Connection::pair().unwrap();

        local.send(&Ping { seq: 7 }).await.unwrap();
        local.shutdown().await.unwrap();

        assert_eq!(remote.recv::<Ping>().await.unwrap().unwrap(), Ping { seq: 7 });
        assert!(remote.recv::<Ping>().await.is_none());
    }
}
