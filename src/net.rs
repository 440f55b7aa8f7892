use std::future::Future;
use std::io::ErrorKind;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::host::Host;

const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// One object stream between two nodes.
///
/// Values are framed as a big-endian u32 length followed by their bincode
/// encoding. Writes on a connection are observed in the order they were
/// issued; the `&mut` receivers keep concurrent use of one connection
/// serialised by construction.
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub async fn connect(host: &Host) -> Result<Connection> {
        let stream = TcpStream::connect((host.address(), host.port())).await?;
        Ok(Connection::new(stream))
    }

    fn new(stream: TcpStream) -> Connection {
        let _ = stream.set_nodelay(true);
        Connection { stream }
    }

    pub async fn write<M: Serialize>(&mut self, message: &M) -> Result<()> {
        let encoded = bincode::serialize(message)?;
        if encoded.len() > MAX_MESSAGE_BYTES {
            return Err(Error::MessageTooLarge(encoded.len()));
        }
        self.stream
            .write_all(&(encoded.len() as u32).to_be_bytes())
            .await?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    pub async fn read<M: DeserializeOwned>(&mut self) -> Result<M> {
        self.read_opt()
            .await?
            .ok_or(Error::Protocol("connection closed mid-exchange"))
    }

    /// Read the next object, or `None` if the remote closed the connection
    /// cleanly at a frame boundary.
    pub async fn read_opt<M: DeserializeOwned>(&mut self) -> Result<Option<M>> {
        let mut len_bytes = [0u8; 4];
        match self.stream.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_MESSAGE_BYTES {
            return Err(Error::MessageTooLarge(len));
        }
        let mut buffer = vec![0u8; len];
        self.stream.read_exact(&mut buffer).await?;
        Ok(Some(bincode::deserialize(&buffer)?))
    }
}

/// A listening TCP endpoint.
///
/// Binding and serving are split so the caller can learn the resolved port
/// (binding port 0 lets the kernel pick one) before connections start being
/// handled. Every accepted connection runs its handler on a worker of its
/// own.
pub struct Channel {
    local: Host,
    listener: Option<TcpListener>,
    worker: Option<JoinHandle<()>>,
}

impl Channel {
    pub async fn bind(host: &Host) -> Result<Channel> {
        let listener = TcpListener::bind((host.address(), host.port())).await?;
        let local = host.with_port(listener.local_addr()?.port());
        Ok(Channel {
            local,
            listener: Some(listener),
            worker: None,
        })
    }

    /// The host this channel is actually bound to.
    pub fn local(&self) -> &Host {
        &self.local
    }

    /// Start accepting connections, handing each to `handler`.
    pub fn serve<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let Some(listener) = self.listener.take() else {
            return;
        };

        self.worker = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!("accepted connection from {remote}");
                        let worker = handler(Connection::new(stream));
                        tokio::spawn(async move {
                            if let Err(e) = worker.await {
                                debug!("connection worker ended: {e}");
                            }
                        });
                    }
                    Err(e) => error!("accept failed: {e}"),
                }
            }
        }));
    }

    /// Stop accepting. Workers already handling a connection run to
    /// completion.
    pub fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.listener = None;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}
