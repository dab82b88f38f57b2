//! The RPC dispatch layer: WebSocket admission, framed request decoding,
//! and name-resolution across the ordered executor list.
//!
//! Each decoded call is dispatched as its own task so a slow handler never
//! stalls the receive loop; results go back to the originating connection
//! only, while pushes fan out through the [`ConnectionRegistry`].

use crate::registry::{ConnId, ConnectionRegistry};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use netplay_core::{codec, PlayResult, RpcMessage, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// A collaborator exposing a named set of remotely invokable capabilities.
pub trait Executor: Send + Sync {
    /// Whether this executor exposes a capability of the given name.
    fn exposes(&self, fun: &str) -> bool;

    /// Invoke a capability with positional arguments. `Ok(Some(value))`
    /// becomes a response frame to the caller; `Ok(None)` is silence.
    fn call(
        self: Arc<Self>,
        fun: &str,
        args: Vec<Value>,
    ) -> BoxFuture<'static, PlayResult<Option<Value>>>;
}

/// One WebSocket endpoint serving all GUI clients.
pub struct PlaySocket {
    registry: Arc<ConnectionRegistry>,
    /// Ordered executor list; first exposing a name wins.
    executors: Mutex<Vec<Arc<dyn Executor>>>,
    token: String,
}

impl PlaySocket {
    pub fn new(registry: Arc<ConnectionRegistry>, token: String) -> Arc<Self> {
        Arc::new(Self {
            registry,
            executors: Mutex::new(Vec::new()),
            token,
        })
    }

    /// Append an executor. Registration order is resolution priority, so an
    /// earlier executor may intentionally shadow a later one's capability.
    pub fn add_executor(&self, executor: Arc<dyn Executor>) {
        self.executors.lock().unwrap().push(executor);
    }

    /// Bind and serve forever.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> PlayResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| netplay_core::PlayError::Transport(format!("bind failed: {e}")))?;
        info!(addr = %addr, "listening");
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> PlayResult<()> {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let socket = self.clone();
                    tokio::spawn(async move {
                        socket.handle_conn(stream, remote).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    }

    /// Full lifecycle of one client connection.
    async fn handle_conn(self: Arc<Self>, stream: TcpStream, remote: SocketAddr) {
        let expected = self.token.clone();
        let callback = move |request: &Request, response: Response| {
            check_auth(request, &expected)
                .map(|()| response)
                .map_err(reject)
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                info!(remote = %remote, error = %e, "rejected connection");
                return;
            }
        };
        let (conn_id, mut outbound) = self.registry.register();
        info!(remote = %remote, clients = self.registry.count(), "accepted connection");
        let (mut sink, mut source) = ws_stream.split();

        // Writer task: the single owner of this connection's sink. Every
        // producer (handlers, the pty multiplex thread) goes through the
        // registry channel instead of touching the transport.
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if sink.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
        });

        // Receive loop: decode in receipt order, dispatch concurrently.
        while let Some(incoming) = source.next().await {
            match incoming {
                Ok(Message::Binary(data)) => match codec::decode::<RpcMessage>(&data) {
                    Ok(msg) => self.clone().dispatch(conn_id, msg),
                    Err(e) => warn!(conn = conn_id, error = %e, "undecodable frame"),
                },
                Ok(Message::Close(_)) => {
                    debug!(remote = %remote, "peer closed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(remote = %remote, error = %e, "connection error");
                    break;
                }
            }
        }

        self.registry.unregister(conn_id);
        writer.abort();
        info!(remote = %remote, "connection closed");
    }

    /// Resolve a function name against the executor list in registration
    /// order; first match wins.
    fn resolve(&self, fun: &str) -> Option<Arc<dyn Executor>> {
        self.executors
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.exposes(fun))
            .cloned()
    }

    /// Route one call to its executor on a fresh task.
    fn dispatch(self: Arc<Self>, conn_id: ConnId, msg: RpcMessage) {
        let Some(executor) = self.resolve(&msg.fun) else {
            error!(fun = %msg.fun, "function not found");
            return;
        };

        let registry = self.registry.clone();
        let fun = msg.fun;
        let args = msg.args.unwrap_or_default();
        tokio::spawn(async move {
            match executor.call(&fun, args).await {
                Ok(Some(result)) => {
                    registry.send_msg(conn_id, &RpcMessage::push(&fun, result));
                }
                Ok(None) => {}
                // Contained here: the caller observes silence, the log
                // records which kind of failure it was.
                Err(e) => warn!(fun = %fun, error = %e, "call failed"),
            }
        });
    }

    /// The URL a browser opens to reach this server.
    pub fn gui_url(&self, gui_base: &str, public_host: &str, port: u16) -> String {
        let ws_url = format!("ws://{public_host}:{port}");
        format!(
            "{gui_base}/?minindn={}&auth={}",
            percent_encode(&ws_url),
            self.token
        )
    }
}

fn check_auth(request: &Request, expected: &str) -> PlayResult<()> {
    let presented = request
        .uri()
        .query()
        .and_then(|q| query_param(q, "auth"))
        .ok_or_else(|| netplay_core::PlayError::AuthFailed("missing auth token".into()))?;
    if presented != expected {
        return Err(netplay_core::PlayError::AuthFailed("invalid auth token".into()));
    }
    Ok(())
}

fn reject(error: netplay_core::PlayError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let mut pieces = pair.splitn(2, '=');
        let name = pieces.next().unwrap_or_default();
        let value = pieces.next().unwrap_or_default();
        if name == key {
            Some(value)
        } else {
            None
        }
    })
}

/// Minimal percent-encoding for embedding a ws:// URL in a query string.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use netplay_core::funcs;

    struct FixedExecutor {
        name: &'static str,
        reply: Option<&'static str>,
    }

    impl Executor for FixedExecutor {
        fn exposes(&self, fun: &str) -> bool {
            fun == self.name
        }

        fn call(
            self: Arc<Self>,
            _fun: &str,
            _args: Vec<Value>,
        ) -> BoxFuture<'static, PlayResult<Option<Value>>> {
            Box::pin(async move { Ok(self.reply.map(|r| Value::Text(r.to_string()))) })
        }
    }

    struct FailingExecutor;

    impl Executor for FailingExecutor {
        fn exposes(&self, fun: &str) -> bool {
            fun == "boom"
        }

        fn call(
            self: Arc<Self>,
            _fun: &str,
            _args: Vec<Value>,
        ) -> BoxFuture<'static, PlayResult<Option<Value>>> {
            Box::pin(async { Err(netplay_core::PlayError::Other("kaput".into())) })
        }
    }

    fn test_socket() -> (Arc<PlaySocket>, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let socket = PlaySocket::new(registry.clone(), "secret-token".into());
        (socket, registry)
    }

    #[tokio::test]
    async fn resolution_is_first_match_in_registration_order() {
        let (socket, _) = test_socket();
        socket.add_executor(Arc::new(FixedExecutor {
            name: "f",
            reply: Some("first"),
        }));
        socket.add_executor(Arc::new(FixedExecutor {
            name: "f",
            reply: Some("second"),
        }));

        let resolved = socket.resolve("f").expect("f resolves");
        let reply = resolved.call("f", vec![]).await.unwrap();
        assert_eq!(reply.unwrap().as_text(), Some("first"));
    }

    #[test]
    fn later_executor_wins_when_earlier_does_not_expose() {
        let (socket, _) = test_socket();
        socket.add_executor(Arc::new(FixedExecutor {
            name: "g",
            reply: None,
        }));
        socket.add_executor(Arc::new(FixedExecutor {
            name: "f",
            reply: Some("hit"),
        }));

        assert!(socket.resolve("f").is_some());
        assert!(socket.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn unknown_function_and_failures_do_not_crash() {
        let (socket, registry) = test_socket();
        socket.add_executor(Arc::new(FailingExecutor));
        let (conn, mut rx) = registry.register();

        socket
            .clone()
            .dispatch(conn, RpcMessage::call("nope", vec![]));
        socket.clone().dispatch(conn, RpcMessage::call("boom", vec![]));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Neither the unknown function nor the failing handler produced a
        // reply frame.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn result_goes_to_originating_connection_only() {
        let (socket, registry) = test_socket();
        socket.add_executor(Arc::new(FixedExecutor {
            name: "f",
            reply: Some("ok"),
        }));
        let (caller, mut caller_rx) = registry.register();
        let (_other, mut other_rx) = registry.register();

        socket.clone().dispatch(caller, RpcMessage::call("f", vec![]));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let frame = caller_rx.try_recv().expect("caller got a response");
        let msg: RpcMessage = codec::decode(&frame).unwrap();
        assert_eq!(msg.fun, "f");
        assert_eq!(msg.result.unwrap().as_text(), Some("ok"));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn end_to_end_auth_and_call() {
        let (socket, _registry) = test_socket();
        socket.add_executor(Arc::new(FixedExecutor {
            name: funcs::GET_TOPO,
            reply: Some("topo"),
        }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(socket.clone().serve(listener));

        // Wrong token: handshake is refused before any message exchange.
        let bad = tokio_tungstenite::connect_async(format!("ws://{addr}/?auth=wrong")).await;
        assert!(bad.is_err());

        // Missing token: refused as well.
        let missing = tokio_tungstenite::connect_async(format!("ws://{addr}/")).await;
        assert!(missing.is_err());

        // Correct token: request/response round trip.
        let (mut ws, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/?auth=secret-token"))
                .await
                .expect("handshake succeeds");
        let call = codec::encode(&RpcMessage::call(funcs::GET_TOPO, vec![])).unwrap();
        ws.send(Message::Binary(call.into())).await.unwrap();

        let reply = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .expect("reply before timeout")
            .expect("stream open")
            .expect("no transport error");
        let Message::Binary(data) = reply else {
            panic!("expected binary frame");
        };
        let msg: RpcMessage = codec::decode(&data).unwrap();
        assert_eq!(msg.fun, funcs::GET_TOPO);
        assert_eq!(msg.result.unwrap().as_text(), Some("topo"));
    }

    type Client =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

    async fn next_msg(ws: &mut Client) -> RpcMessage {
        loop {
            let frame = tokio::time::timeout(std::time::Duration::from_secs(10), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("transport error");
            if let Message::Binary(data) = frame {
                return codec::decode(&data).unwrap();
            }
        }
    }

    fn result_field(msg: &RpcMessage, key: &str) -> Option<Value> {
        msg.result
            .as_ref()?
            .as_map()?
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v.clone())
    }

    #[tokio::test]
    async fn terminal_flow_end_to_end() {
        use crate::exec::TermExecutor;
        use crate::logsink::UiLogSink;
        use crate::net::{EmuNet, LocalNet};
        use crate::session::PtyManager;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let net: Arc<dyn EmuNet> = Arc::new(LocalNet::new(
            dir.path().join("hosts"),
            dir.path().to_path_buf(),
        ));
        net.add_host("h1").unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let manager = PtyManager::new(registry.clone(), Duration::from_millis(20), 4096);
        manager.start();

        let socket = PlaySocket::new(registry.clone(), "tok".into());
        socket.add_executor(Arc::new(TermExecutor::new(
            net,
            manager.clone(),
            registry.clone(),
            UiLogSink::new(),
            16000,
        )));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(socket.clone().serve(listener));

        let url = format!("ws://{addr}/?auth=tok");
        let (mut client_a, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut client_b, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        // A opens a terminal on h1 and gets the generated id plus an empty
        // replay snapshot.
        let call = codec::encode(&RpcMessage::call(
            funcs::OPEN_TERMINAL,
            vec![Value::Text("h1".into())],
        ))
        .unwrap();
        client_a.send(Message::Binary(call.into())).await.unwrap();

        let term_id = loop {
            let msg = next_msg(&mut client_a).await;
            if msg.fun == funcs::OPEN_TERMINAL {
                let buf = result_field(&msg, "buf").unwrap();
                assert!(buf.as_bytes().unwrap().is_empty());
                break result_field(&msg, "id").unwrap().as_text().unwrap().to_string();
            }
        };
        assert!(term_id.starts_with("h1"));

        // A types a command; the shell's output comes back as pty_out
        // pushes. Searching for the expansion result avoids matching the
        // echoed input line.
        let input = codec::encode(&RpcMessage::call(
            funcs::PTY_IN,
            vec![
                Value::Text(term_id.clone()),
                Value::Bytes(b"echo E2E_$((40+2))\n".to_vec()),
            ],
        ))
        .unwrap();
        client_a.send(Message::Binary(input.into())).await.unwrap();

        let mut output: Vec<u8> = Vec::new();
        while !output.windows(6).any(|w| w == b"E2E_42") {
            let msg = next_msg(&mut client_a).await;
            if msg.fun == funcs::PTY_OUT && msg.id.as_deref() == Some(term_id.as_str()) {
                output.extend(msg.result.unwrap().as_bytes().unwrap());
            }
        }

        // A ends the shell and disconnects; the exit is detected
        // asynchronously and close_term reaches the remaining client.
        let exit = codec::encode(&RpcMessage::call(
            funcs::PTY_IN,
            vec![Value::Text(term_id.clone()), Value::Bytes(b"exit\n".to_vec())],
        ))
        .unwrap();
        client_a.send(Message::Binary(exit.into())).await.unwrap();
        drop(client_a);

        loop {
            let msg = next_msg(&mut client_b).await;
            if msg.fun == funcs::CLOSE_TERMINAL && msg.id.as_deref() == Some(term_id.as_str()) {
                break;
            }
        }
        assert!(manager.get(&term_id).is_none());
    }

    #[test]
    fn query_param_extracts_value() {
        assert_eq!(query_param("auth=abc&x=1", "auth"), Some("abc"));
        assert_eq!(query_param("x=1&auth=abc", "auth"), Some("abc"));
        assert_eq!(query_param("x=1", "auth"), None);
    }

    #[test]
    fn gui_url_embeds_encoded_ws_url() {
        let (socket, _) = test_socket();
        let url = socket.gui_url("https://play.example", "127.0.0.1", 8765);
        assert_eq!(
            url,
            "https://play.example/?minindn=ws%3A%2F%2F127.0.0.1%3A8765&auth=secret-token"
        );
    }
}
