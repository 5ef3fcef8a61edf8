// Implementation of the SciDB client session protocol.
//
// Each request is a single framed message (1-byte code, u32 payload length,
// payload) answered by a single framed reply on the same connection. The
// session store opens two of these per session so that a cancel request can
// travel while the control connection is blocked inside an execute.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use super::{BackendError, Connection, Connector, QueryId};

// Client-side message codes.
const MSG_HELLO: u8 = b'H';
const MSG_PREPARE: u8 = b'P';
const MSG_EXECUTE: u8 = b'X';
const MSG_COMPLETE: u8 = b'F';
const MSG_QUIT: u8 = b'Q';

// Server-side message codes.
const MSG_OK: u8 = b'K';
const MSG_QUERY_ID: u8 = b'I';
const MSG_DONE: u8 = b'D';
const MSG_AUTH_FAILED: u8 = b'A';
const MSG_ERROR: u8 = b'E';

/// Upper bound on a single reply payload. Backend error texts are a few
/// kilobytes; anything bigger means a desynchronised stream.
const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Factory for [`ScidbConnection`]s.
#[derive(Debug, Clone)]
pub struct ScidbConnector {
    connect_timeout: Duration,
}

impl ScidbConnector {
    pub fn new(connect_timeout: Duration) -> ScidbConnector {
        ScidbConnector { connect_timeout }
    }
}

impl Default for ScidbConnector {
    fn default() -> ScidbConnector {
        ScidbConnector::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl Connector for ScidbConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn Connection>, BackendError> {
        let conn = ScidbConnection::startup(host, port, user, password, self.connect_timeout)
            .await?;
        Ok(Box::new(conn))
    }
}

/// One authenticated connection to a SciDB coordinator.
pub struct ScidbConnection {
    address: String,
    stream: BufStream<TcpStream>,
}

impl ScidbConnection {
    /// Connect, authenticate and return a ready connection.
    pub async fn startup(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> Result<ScidbConnection, BackendError> {
        let address = format!("{host}:{port}");

        let stream =
            match tokio::time::timeout(connect_timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => {
                    return Err(BackendError::Connect(format!("{address}: {err}")));
                }
                Err(_) => {
                    return Err(BackendError::Connect(format!("{address}: connect timeout")));
                }
            };

        if let Err(err) = stream.set_nodelay(true) {
            warn!("Can't set nodelay on SciDB connection to {address}: {err}");
        }

        let mut conn = ScidbConnection {
            address,
            stream: BufStream::new(stream),
        };

        let mut hello = BytesMut::with_capacity(user.len() + password.len() + 4);
        hello.put_u16(user.len() as u16);
        hello.put_slice(user.as_bytes());
        hello.put_u16(password.len() as u16);
        hello.put_slice(password.as_bytes());
        conn.send(MSG_HELLO, &hello).await?;

        match conn.recv().await? {
            (MSG_OK, _) => {
                debug!("Connected to SciDB at {}", conn.address);
                Ok(conn)
            }
            (MSG_AUTH_FAILED, _) => Err(BackendError::Auth),
            (MSG_ERROR, payload) => Err(BackendError::Connect(text_payload(&payload))),
            (code, _) => Err(BackendError::Connect(format!(
                "unexpected startup reply code {code}"
            ))),
        }
    }

    async fn send(&mut self, code: u8, payload: &[u8]) -> Result<(), BackendError> {
        self.stream.write_u8(code).await?;
        self.stream.write_u32(payload.len() as u32).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<(u8, Vec<u8>), BackendError> {
        let code = self.stream.read_u8().await?;
        let len = self.stream.read_u32().await?;
        if len > MAX_MESSAGE_SIZE {
            return Err(BackendError::Query(format!(
                "backend reply of {len} bytes exceeds the message size limit"
            )));
        }
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload).await?;
        Ok((code, payload))
    }

    /// Send one request and map the single reply through `on_reply`,
    /// turning error replies into [`BackendError::Query`].
    async fn round_trip<T>(
        &mut self,
        code: u8,
        payload: &[u8],
        on_reply: impl FnOnce(u8, &[u8]) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        self.send(code, payload).await?;
        match self.recv().await? {
            (MSG_ERROR, reply) => Err(BackendError::Query(text_payload(&reply))),
            (reply_code, reply) => on_reply(reply_code, &reply),
        }
    }
}

#[async_trait]
impl Connection for ScidbConnection {
    async fn prepare(&mut self, text: &str) -> Result<QueryId, BackendError> {
        self.round_trip(MSG_PREPARE, text.as_bytes(), |code, reply| match code {
            MSG_QUERY_ID if reply.len() == 16 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(&reply[..8]);
                let coordinator = u64::from_be_bytes(word);
                word.copy_from_slice(&reply[8..]);
                let query = u64::from_be_bytes(word);
                Ok(QueryId::new(coordinator, query))
            }
            code => Err(BackendError::Query(format!(
                "unexpected prepare reply code {code}"
            ))),
        })
        .await
    }

    async fn execute(&mut self, text: &str, qid: QueryId) -> Result<(), BackendError> {
        let mut payload = BytesMut::with_capacity(16 + text.len());
        payload.put_u64(qid.coordinator);
        payload.put_u64(qid.query);
        payload.put_slice(text.as_bytes());
        self.round_trip(MSG_EXECUTE, &payload, expect_done).await
    }

    async fn complete(&mut self, qid: QueryId) -> Result<(), BackendError> {
        let mut payload = BytesMut::with_capacity(16);
        payload.put_u64(qid.coordinator);
        payload.put_u64(qid.query);
        self.round_trip(MSG_COMPLETE, &payload, expect_done).await
    }

    async fn disconnect(&mut self) -> Result<(), BackendError> {
        // The server closes the socket after Quit; there is no reply to wait
        // for and failures here only matter for logging.
        self.send(MSG_QUIT, &[]).await?;
        self.stream.get_mut().shutdown().await?;
        debug!("Disconnected from SciDB at {}", self.address);
        Ok(())
    }
}

fn expect_done(code: u8, _reply: &[u8]) -> Result<(), BackendError> {
    match code {
        MSG_DONE => Ok(()),
        code => Err(BackendError::Query(format!(
            "unexpected reply code {code}"
        ))),
    }
}

fn text_payload(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}
