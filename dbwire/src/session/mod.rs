//! One TCP connection: handshake, turn loop, liveness state.
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    common::{debug, error_, general, warn_, ByteStr},
    error::{Error, ProtocolError, Result, ServerException as ServerExceptionError},
    signal::{
        self, downcast_ref, encode_message, read_message, write_message, ClientData, ClientHello,
        ClientPing, ClientQuery, Factory, Registry, ServerClose, ServerData, ServerEndOfStream,
        ServerException, ServerHello, ServerPong, ServerProfileInfo, ServerProgress, ServerUnknown,
        Signal,
    },
};

pub mod config;

pub use config::Config;

/// Where a [`Session`] sits in its lifecycle: dialed, handshake complete,
/// idle or in use by a caller, or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Dialed,
    HandshakeComplete,
    Idle,
    InUse,
    Closed,
}

/// Accumulated result of a query/exec/batch turn: column layout plus the
/// comma-joined value blocks received, and any deferred exception.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TurnResult {
    pub columns: Vec<(ByteStr, ByteStr)>,
    pub blocks: Vec<Vec<ByteStr>>,
    pub exception: Option<ServerExceptionError>,
}

enum TurnOutcome {
    EndOfStream,
    Continue,
}

/// One connection after it has been dialed.
///
/// Generic over its transport: production code instantiates
/// `Session<tokio::net::TcpStream>`; tests drive a `Session` over
/// `tokio::io::duplex` halves against a fake in-process server.
#[derive(Debug)]
pub struct Session<IO> {
    io: IO,
    registry: Arc<Registry>,
    factory: Arc<Factory>,
    id: u64,
    state: State,
    bad: bool,
    connected_at: Instant,
    last_used: Instant,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl<IO> Session<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already-connected transport in [`State::Dialed`]. Callers
    /// must run [`Session::handshake`] before any turn.
    pub fn new(io: IO, registry: Arc<Registry>, factory: Arc<Factory>, id: u64) -> Self {
        let now = Instant::now();
        Self {
            io,
            registry,
            factory,
            id,
            state: State::Dialed,
            bad: false,
            connected_at: now,
            last_used: now,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Sets the per-message read/write deadlines: `read_message`/
    /// `write_message` are blocking points whose deadlines derive from the
    /// pool's configured timeouts.
    pub fn with_timeouts(mut self, read_timeout: Duration, write_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self.write_timeout = Some(write_timeout);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_bad(&self) -> bool {
        self.bad
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    fn mark_bad(&mut self) {
        self.bad = true;
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Marks this session handed out to a caller.
    pub fn begin_turn(&mut self) {
        self.state = State::InUse;
    }

    fn end_turn(&mut self) {
        self.state = if self.bad { State::Closed } else { State::Idle };
        self.touch();
    }

    async fn send(&mut self, signal: &dyn Signal) -> Result<()> {
        let message = encode_message(signal);
        match self.write_timeout {
            Some(duration) => tokio::time::timeout(duration, write_message(&mut self.io, &message))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write_message timed out"))??,
            None => write_message(&mut self.io, &message).await?,
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Box<dyn Signal>> {
        let message = match self.read_timeout {
            Some(duration) => tokio::time::timeout(duration, read_message(&mut self.io))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read_message timed out"))??,
            None => read_message(&mut self.io).await?,
        };
        signal::unpack_signal(message, &self.registry, &self.factory)
    }

    /// Handshake: send `ClientHello`, read exactly one message, which must
    /// be `ServerHello`. Any other arrival — including `ServerException` —
    /// is a fatal handshake error; the session is marked bad and must not
    /// be reused.
    pub async fn handshake(&mut self, client_name: impl Into<ByteStr>, protocol_version: u64) -> Result<ServerHello> {
        let hello = ClientHello { client_name: client_name.into(), major: 1, minor: 0, protocol_version };
        let result = self.handshake_inner(hello).await;
        if result.is_err() {
            self.mark_bad();
        }
        result
    }

    async fn handshake_inner(&mut self, hello: ClientHello) -> Result<ServerHello> {
        self.send(&hello).await?;
        let signal = self.recv().await?;
        match downcast_ref::<ServerHello>(signal.as_ref()) {
            Some(server_hello) => {
                let server_hello = server_hello.clone();
                self.state = State::HandshakeComplete;
                self.touch();
                debug!("session {} handshake complete, server={}", self.id, server_hello.server_name);
                Ok(server_hello)
            }
            None => {
                warn_!("session {} handshake failed: expected ServerHello, got type {}", self.id, signal.signal_type());
                Err(ProtocolError::UnexpectedSignal {
                    expected: "ServerHello",
                    found: signal.signal_type(),
                    phase: "handshake",
                }
                .into())
            }
        }
    }

    /// Ping turn: send `ClientPing`, expect `ServerPong` back.
    pub async fn ping(&mut self, timestamp: i64) -> Result<()> {
        self.begin_turn();
        let result = self.ping_inner(timestamp).await;
        if result.is_err() {
            self.mark_bad();
        }
        self.end_turn();
        result
    }

    async fn ping_inner(&mut self, timestamp: i64) -> Result<()> {
        self.send(&ClientPing { timestamp }).await?;
        let signal = self.recv().await?;
        match downcast_ref::<ServerPong>(signal.as_ref()) {
            Some(pong) if pong.timestamp == timestamp => Ok(()),
            Some(_) => Err(ProtocolError::Malformed(general!("pong timestamp does not match request").into()).into()),
            None => Err(ProtocolError::UnexpectedSignal {
                expected: "ServerPong",
                found: signal.signal_type(),
                phase: "ping",
            }
            .into()),
        }
    }

    /// Query turn: accumulate `ServerData` blocks until a
    /// turn-terminating event.
    pub async fn query(&mut self, query: ClientQuery) -> Result<TurnResult> {
        self.begin_turn();
        let result = self.run_turn(&query, true).await;
        if result.is_err() {
            self.mark_bad();
        }
        self.end_turn();
        result
    }

    /// Exec turn: same wire exchange as query, but `ServerData` bodies
    /// are discarded rather than accumulated.
    pub async fn exec(&mut self, query: ClientQuery) -> Result<TurnResult> {
        self.begin_turn();
        let result = self.run_turn(&query, false).await;
        if result.is_err() {
            self.mark_bad();
        }
        self.end_turn();
        result
    }

    /// Batch turn: send the staged rows, then consume until EOS (reading
    /// through any `ServerData`/`ServerProgress`).
    pub async fn batch(&mut self, data: ClientData) -> Result<TurnResult> {
        self.begin_turn();
        let result = self.run_turn(&data, false).await;
        if result.is_err() {
            self.mark_bad();
        }
        self.end_turn();
        result
    }

    async fn run_turn(&mut self, request: &dyn Signal, accumulate: bool) -> Result<TurnResult> {
        self.send(request).await?;
        let mut acc = TurnResult::default();
        loop {
            match self.next_turn_event(&mut acc, accumulate).await? {
                TurnOutcome::EndOfStream => return Ok(acc),
                TurnOutcome::Continue => continue,
            }
        }
    }

    /// Reads and classifies one server message per the turn-terminating
    /// precedence order.
    ///
    /// `ServerException` does not end the turn immediately: per the
    /// documented drain-to-EOS strategy, the first exception is recorded
    /// on `acc` and reading continues until `ServerEndOfStream`, so the
    /// stream stays synchronized for the turns that follow on the same
    /// session.
    async fn next_turn_event(&mut self, acc: &mut TurnResult, accumulate: bool) -> Result<TurnOutcome> {
        let signal = self.recv().await?;

        if downcast_ref::<ServerEndOfStream>(signal.as_ref()).is_some() {
            return Ok(TurnOutcome::EndOfStream);
        }
        if let Some(exception) = downcast_ref::<ServerException>(signal.as_ref()) {
            if acc.exception.is_none() {
                acc.exception = Some(ServerExceptionError {
                    code: exception.code.to_string(),
                    message: exception.message.to_string(),
                    stack: exception.stack.to_string(),
                });
            }
            return Ok(TurnOutcome::Continue);
        }
        if let Some(close) = downcast_ref::<ServerClose>(signal.as_ref()) {
            self.mark_bad();
            error_!("session {} received ServerClose mid-turn: {}", self.id, close.reason);
            return Err(Error::ServerClosed(close.reason.to_string()));
        }
        if let Some(data) = downcast_ref::<ServerData>(signal.as_ref()) {
            if accumulate {
                if acc.columns.is_empty() {
                    acc.columns = data.columns.clone();
                } else {
                    for column in &data.columns {
                        if !acc.columns.iter().any(|(name, _)| *name == column.0) {
                            acc.columns.push(column.clone());
                        }
                    }
                }
                acc.blocks.push(data.column_values.clone());
            }
            return Ok(TurnOutcome::Continue);
        }
        if downcast_ref::<ServerProgress>(signal.as_ref()).is_some()
            || downcast_ref::<ServerProfileInfo>(signal.as_ref()).is_some()
            || downcast_ref::<ServerUnknown>(signal.as_ref()).is_some()
        {
            return Ok(TurnOutcome::Continue);
        }

        Err(ProtocolError::UnexpectedSignal {
            expected: "a turn-terminating or accumulating server signal",
            found: signal.signal_type(),
            phase: "turn",
        }
        .into())
    }

    /// Non-blocking check for data arriving while idle — a `ServerClose`
    /// the server sent between turns, which the pool must discard before
    /// handing the session back out. Returns `Ok(true)` if the session is
    /// still usable, `Ok(false)` if something arrived (or the peer closed
    /// outright) and the session is now bad.
    pub async fn check_idle(&mut self) -> Result<bool> {
        use std::future::poll_fn;
        use std::pin::Pin;
        use std::task::Poll;

        if self.bad {
            return Ok(false);
        }

        let mut probe = [0u8; 1];
        let mut buf = tokio::io::ReadBuf::new(&mut probe);
        let polled = poll_fn(|cx| match Pin::new(&mut self.io).poll_read(cx, &mut buf) {
            Poll::Ready(result) => Poll::Ready(Some(result)),
            Poll::Pending => Poll::Ready(None),
        })
        .await;

        match polled {
            None => Ok(true),
            Some(Ok(())) => {
                warn_!("session {} had unread bytes while idle, discarding", self.id);
                self.mark_bad();
                Ok(false)
            }
            Some(Err(_)) => {
                self.mark_bad();
                Ok(false)
            }
        }
    }

    /// Closes the transport. Idempotent.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        debug!("session {} closing", self.id);
        self.state = State::Closed;
        self.io.shutdown().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signal::{install_default, ServerData as ServerDataSignal};
    use tokio::io::{duplex, DuplexStream};

    fn catalog() -> (Arc<Registry>, Arc<Factory>) {
        let mut registry = Registry::new();
        let mut factory = Factory::new();
        install_default(&mut registry, &mut factory).unwrap();
        (Arc::new(registry), Arc::new(factory))
    }

    async fn server_send(server: &mut DuplexStream, signal: &dyn Signal) {
        let message = encode_message(signal);
        write_message(server, &message).await.unwrap();
    }

    #[tokio::test]
    async fn read_timeout_marks_session_bad() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1)
            .with_timeouts(Duration::from_millis(20), Duration::from_secs(5));

        let server = tokio::spawn(async move {
            let _hello = read_message(&mut server_io).await.unwrap();
            // Never replies: the client's read_timeout must fire.
            server_io
        });

        let err = session.handshake("dbwire", 1).await.unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::TimedOut));
        assert!(session.is_bad());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_succeeds_on_server_hello() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1);

        let server = tokio::spawn(async move {
            let _hello = read_message(&mut server_io).await.unwrap();
            server_send(&mut server_io, &ServerHello { server_name: "dbserver".into(), ..Default::default() }).await;
            server_io
        });

        let server_hello = session.handshake("dbwire", 1).await.unwrap();
        assert_eq!(server_hello.server_name, "dbserver");
        assert_eq!(session.state(), State::HandshakeComplete);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_marks_bad_on_unexpected_reply() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1);

        let server = tokio::spawn(async move {
            let _hello = read_message(&mut server_io).await.unwrap();
            server_send(&mut server_io, &ServerException { code: "x".into(), message: "y".into(), stack: "".into() }).await;
        });

        assert!(session.handshake("dbwire", 1).await.is_err());
        assert!(session.is_bad());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn ping_turn_round_trips_timestamp() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1);

        let server = tokio::spawn(async move {
            let message = read_message(&mut server_io).await.unwrap();
            let ping = crate::signal::ClientPing::default();
            let _ = ping;
            server_send(&mut server_io, &ServerPong { timestamp: 42 }).await;
            message
        });

        session.ping(42).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn query_turn_accumulates_blocks_until_eos() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1);

        let server = tokio::spawn(async move {
            let _query = read_message(&mut server_io).await.unwrap();
            server_send(
                &mut server_io,
                &ServerDataSignal {
                    columns: vec![("id".into(), "UInt32".into()), ("name".into(), "String".into())],
                    block_marker: 0,
                    row_count: 3,
                    column_values: vec!["1,2,3".into(), "a,b,c".into()],
                },
            )
            .await;
            server_send(&mut server_io, &ServerEndOfStream).await;
        });

        let result = session.query(ClientQuery { query: "SELECT id,name FROM t".into(), ..Default::default() }).await.unwrap();
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.blocks.len(), 1);
        assert!(result.exception.is_none());
        assert_eq!(session.state(), State::Idle);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_exception_is_deferred_and_drained_to_eos() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1);

        let server = tokio::spawn(async move {
            let _query = read_message(&mut server_io).await.unwrap();
            server_send(
                &mut server_io,
                &ServerException { code: "query.table_not_found".into(), message: "Table 'missing' does not exist".into(), stack: "".into() },
            )
            .await;
            server_send(&mut server_io, &ServerEndOfStream).await;
        });

        let result = session.query(ClientQuery { query: "SELECT * FROM missing".into(), ..Default::default() }).await.unwrap();
        assert_eq!(result.exception.as_ref().unwrap().code, "query.table_not_found");
        assert!(!session.is_bad());
        assert_eq!(session.state(), State::Idle);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_close_mid_turn_marks_session_bad() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1);

        let server = tokio::spawn(async move {
            let _query = read_message(&mut server_io).await.unwrap();
            server_send(&mut server_io, &ServerClose { reason: "idle timeout".into() }).await;
        });

        let err = session.query(ClientQuery::default()).await.unwrap_err();
        assert!(matches!(err, Error::ServerClosed(reason) if reason == "idle timeout"));
        assert!(session.is_bad());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn batch_turn_sends_client_data_and_waits_for_eos() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1);

        let server = tokio::spawn(async move {
            let message = read_message(&mut server_io).await.unwrap();
            assert_eq!(message.signal_type, crate::signal::types::CLIENT_DATA);
            server_send(&mut server_io, &ServerEndOfStream).await;
        });

        let data = ClientData {
            table_name: "users".into(),
            columns: vec!["id".into(), "name".into()],
            rows: vec![vec!["1".into(), "Alice".into()]],
        };
        let result = session.batch(data).await.unwrap();
        assert!(result.exception.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_reserved_signal_is_skipped_mid_turn() {
        let (client_io, mut server_io) = duplex(4096);
        let (registry, factory) = catalog();
        let mut session = Session::new(client_io, registry, factory, 1);

        let server = tokio::spawn(async move {
            let _query = read_message(&mut server_io).await.unwrap();
            let message = crate::signal::Message { signal_type: 110, payload: bytes::Bytes::from_static(b"future") };
            write_message(&mut server_io, &message).await.unwrap();
            server_send(&mut server_io, &ServerEndOfStream).await;
        });

        let result = session.query(ClientQuery::default()).await.unwrap();
        assert!(result.exception.is_none());
        server.await.unwrap();
    }
}
