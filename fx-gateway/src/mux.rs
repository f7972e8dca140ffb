//! Single-port protocol demultiplexer.
//!
//! Every accepted connection is classified from its peeked prefix, without
//! consuming any bytes, and handed to either the gRPC server or the HTTP/1
//! server. Classification happens on a task per connection so a slow or
//! idle peer never holds up the accept loop.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{
    UnboundedReceiver, UnboundedSender, unbounded_channel,
};
use tokio_stream::Stream;
use tracing::{debug, error, info, warn};

use crate::error::MuxError;

/// Client connection preface of HTTP/2. gRPC is the only HTTP/2 protocol
/// served on the port, so this is the signature of the RPC branch.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const HTTP1_METHODS: [&[u8]; 9] = [
    b"GET", b"POST", b"PUT", b"DELETE", b"HEAD", b"OPTIONS", b"PATCH",
    b"CONNECT", b"TRACE",
];

// Peeked bytes leave the socket readable, so `readable()` cannot wait for
// more of them. Partial prefixes are re-peeked with a doubling backoff.
const PEEK_BACKOFF_MIN: Duration = Duration::from_millis(1);
const PEEK_BACKOFF_MAX: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Rpc,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Matched(Protocol),
    /// The prefix is still a strict prefix of some signature.
    NeedMore,
    Unmatched,
}

fn prefix_of(prefix: &[u8], signature: impl Iterator<Item = u8>) -> bool {
    prefix.iter().zip(signature).all(|(a, b)| *a == b)
}

/// Classifies the leading bytes of a connection. RPC is tried first.
pub fn classify(prefix: &[u8]) -> Classification {
    if prefix.is_empty() {
        return Classification::NeedMore;
    }
    let rpc_pending = prefix_of(prefix, HTTP2_PREFACE.iter().copied());
    if rpc_pending && prefix.len() >= HTTP2_PREFACE.len() {
        return Classification::Matched(Protocol::Rpc);
    }
    let mut http_pending = false;
    for method in HTTP1_METHODS {
        let signature = method.iter().copied().chain(std::iter::once(b' '));
        if prefix_of(prefix, signature) {
            if prefix.len() > method.len() {
                return Classification::Matched(Protocol::Http);
            }
            http_pending = true;
        }
    }
    if rpc_pending || http_pending {
        Classification::NeedMore
    } else {
        Classification::Unmatched
    }
}

/// Peeks at `stream` until it can be classified or `deadline` expires.
pub async fn sniff(
    stream: &TcpStream,
    deadline: Duration,
) -> Result<Protocol, MuxError> {
    let mut buf = [0u8; HTTP2_PREFACE.len()];
    let mut backoff = PEEK_BACKOFF_MIN;
    let mut seen = 0;
    let peek = async {
        loop {
            let n = stream.peek(&mut buf).await?;
            if n == 0 {
                return Err(MuxError::ClosedBeforeMatch);
            }
            match classify(&buf[..n]) {
                Classification::Matched(p) => return Ok(p),
                Classification::Unmatched => {
                    return Err(MuxError::Unmatched(
                        String::from_utf8_lossy(&buf[..n]).into_owned(),
                    ));
                }
                Classification::NeedMore => {
                    if n > seen {
                        seen = n;
                        backoff = PEEK_BACKOFF_MIN;
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(PEEK_BACKOFF_MAX);
                }
            }
        }
    };
    tokio::time::timeout(deadline, peek)
        .await
        .map_err(|_| MuxError::SniffTimeout)?
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}

/// Owns the listening socket and feeds the two sub-listeners.
pub struct Mux {
    listener: TcpListener,
    read_timeout: Duration,
    rpc_tx: UnboundedSender<TcpStream>,
    http_tx: UnboundedSender<(TcpStream, SocketAddr)>,
}

impl Mux {
    pub fn new(
        listener: TcpListener,
        read_timeout: Duration,
    ) -> Result<(Self, RpcIncoming, HttpListener), MuxError> {
        let local_addr = listener.local_addr()?;
        let (rpc_tx, rpc_rx) = unbounded_channel();
        let (http_tx, http_rx) = unbounded_channel();
        let mux = Self {
            listener,
            read_timeout,
            rpc_tx,
            http_tx,
        };
        Ok((
            mux,
            RpcIncoming { rx: rpc_rx },
            HttpListener {
                rx: http_rx,
                local_addr,
            },
        ))
    }

    /// Accept loop. Returns only on a non-transient accept error.
    pub async fn run(self) -> Result<(), MuxError> {
        info!(
            "demultiplexing connections on {:?}",
            self.listener.local_addr().ok()
        );
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "transient accept error");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(e.into());
                }
            };
            let rpc_tx = self.rpc_tx.clone();
            let http_tx = self.http_tx.clone();
            let deadline = self.read_timeout;
            tokio::spawn(async move {
                match sniff(&stream, deadline).await {
                    Ok(Protocol::Rpc) => {
                        if rpc_tx.send(stream).is_err() {
                            debug!(%peer, "rpc listener gone");
                        }
                    }
                    Ok(Protocol::Http) => {
                        if http_tx.send((stream, peer)).is_err() {
                            debug!(%peer, "http listener gone");
                        }
                    }
                    Err(e @ MuxError::Unmatched(_)) => {
                        warn!(%peer, error = %e, "closing connection")
                    }
                    Err(e) => {
                        debug!(%peer, error = %e, "closing connection")
                    }
                }
            });
        }
    }
}

/// Connections classified as RPC, in the shape tonic's
/// `serve_with_incoming` expects.
pub struct RpcIncoming {
    rx: UnboundedReceiver<TcpStream>,
}

impl Stream for RpcIncoming {
    type Item = Result<TcpStream, std::io::Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|conn| conn.map(Ok))
    }
}

/// Connections classified as HTTP/1, exposed as an axum listener.
pub struct HttpListener {
    rx: UnboundedReceiver<(TcpStream, SocketAddr)>,
    local_addr: SocketAddr,
}

impl axum::serve::Listener for HttpListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.rx.recv().await {
            Some(conn) => conn,
            // the accept loop is gone; the server is being torn down
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> tokio::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn preface_matches_rpc() {
        assert_eq!(
            classify(HTTP2_PREFACE),
            Classification::Matched(Protocol::Rpc)
        );
        assert_eq!(classify(b"PRI * HTTP/2"), Classification::NeedMore);
    }

    #[test]
    fn method_matches_http() {
        assert_eq!(
            classify(b"GET /healthz HTTP/1.1\r\n"),
            Classification::Matched(Protocol::Http)
        );
        assert_eq!(
            classify(b"DELETE "),
            Classification::Matched(Protocol::Http)
        );
        assert_eq!(classify(b"P"), Classification::NeedMore);
        assert_eq!(classify(b"POS"), Classification::NeedMore);
        assert_eq!(classify(b"POST"), Classification::NeedMore);
    }

    #[test]
    fn garbage_is_unmatched() {
        assert_eq!(classify(b"\x16\x03\x01"), Classification::Unmatched);
        assert_eq!(classify(b"GETX"), Classification::Unmatched);
        assert_eq!(classify(b"PRI / HTTP"), Classification::Unmatched);
        assert_eq!(classify(b""), Classification::NeedMore);
    }

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn sniff_waits_for_split_prefix() {
        let (mut client, server) = pair().await;
        client.write_all(&HTTP2_PREFACE[..10]).await.unwrap();
        let task = tokio::spawn(async move {
            sniff(&server, Duration::from_secs(2)).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        client.write_all(&HTTP2_PREFACE[10..]).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), Protocol::Rpc);
    }

    #[tokio::test]
    async fn sniff_follows_a_slow_writer() {
        let (mut client, server) = pair().await;
        let task = tokio::spawn(async move {
            sniff(&server, Duration::from_secs(5)).await
        });
        for byte in HTTP2_PREFACE {
            client.write_all(&[*byte]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(task.await.unwrap().unwrap(), Protocol::Rpc);
    }

    #[tokio::test]
    async fn sniff_times_out_on_idle_peer() {
        let (_client, server) = pair().await;
        let err =
            sniff(&server, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, MuxError::SniffTimeout));
    }

    #[tokio::test]
    async fn sniff_reports_early_close() {
        let (client, server) = pair().await;
        drop(client);
        let err = sniff(&server, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, MuxError::ClosedBeforeMatch));
    }

    #[tokio::test]
    async fn sniff_leaves_bytes_unread() {
        use tokio::io::AsyncReadExt;
        let (mut client, mut server) = pair().await;
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        assert_eq!(
            sniff(&server, Duration::from_secs(1)).await.unwrap(),
            Protocol::Http
        );
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET ");
    }
}
