// In-memory RESP server used by the unit tests.
use bytes::BytesMut;
use parking_lot::Mutex as SyncMutex;
use respmux_transport::StreamConn;
use respmux_wire::{PubSubMessage, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex, split};
use tokio::sync::mpsc;

use crate::{CloseObserver, PubSubConfig, PubSubConn};

pub(crate) type DuplexConn = StreamConn<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    // Answer like a real server.
    Auto,
    // One error reply per command.
    Reject(String),
    // Record the command, answer nothing.
    Silent,
}

enum Action {
    Send(Value),
    Disconnect,
}

pub(crate) struct FakeServer {
    commands: mpsc::UnboundedReceiver<Vec<String>>,
    control: mpsc::UnboundedSender<Action>,
    reply: Arc<SyncMutex<Reply>>,
}

impl FakeServer {
    pub(crate) fn spawn(config: &PubSubConfig) -> (DuplexConn, FakeServer) {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = split(client);
        let conn = StreamConn::new(reader, writer, config.transport_config());
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        let reply = Arc::new(SyncMutex::new(Reply::Auto));
        tokio::spawn(serve(server, reply.clone(), commands_tx, control_rx));
        (
            conn,
            FakeServer {
                commands,
                control,
                reply,
            },
        )
    }

    pub(crate) fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    pub(crate) async fn next_command(&mut self) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(1), self.commands.recv())
            .await
            .expect("command timeout")
            .expect("server stopped")
    }

    pub(crate) fn try_command(&mut self) -> Option<Vec<String>> {
        self.commands.try_recv().ok()
    }

    pub(crate) fn send(&self, value: Value) {
        self.control.send(Action::Send(value)).expect("server alive");
    }

    pub(crate) fn publish(&self, message: &PubSubMessage) {
        self.send(message.to_value().expect("encode push"));
    }

    pub(crate) fn disconnect(&self) {
        let _ = self.control.send(Action::Disconnect);
    }
}

pub(crate) fn quiet_config() -> PubSubConfig {
    PubSubConfig {
        keepalive_interval: Duration::ZERO,
        read_timeout: Duration::ZERO,
        ..PubSubConfig::default()
    }
}

pub(crate) fn connect(config: &PubSubConfig) -> (PubSubConn, FakeServer) {
    let (conn, server) = FakeServer::spawn(config);
    (PubSubConn::new(conn, config), server)
}

pub(crate) fn connect_observed(config: &PubSubConfig) -> (PubSubConn, CloseObserver, FakeServer) {
    let (conn, server) = FakeServer::spawn(config);
    let (pubsub, observer) = PubSubConn::with_close_observer(conn, config);
    (pubsub, observer, server)
}

async fn serve(
    stream: DuplexStream,
    reply: Arc<SyncMutex<Reply>>,
    commands: mpsc::UnboundedSender<Vec<String>>,
    mut control: mpsc::UnboundedReceiver<Action>,
) {
    let (mut reader, mut writer) = split(stream);
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        tokio::select! {
            action = control.recv() => match action {
                Some(Action::Send(value)) => {
                    if writer.write_all(&value.to_bytes()).await.is_err() {
                        return;
                    }
                }
                Some(Action::Disconnect) | None => return,
            },
            read = reader.read_buf(&mut buf) => {
                if !matches!(read, Ok(n) if n > 0) {
                    return;
                }
                while let Ok(Some(value)) = Value::decode(&mut buf) {
                    let command = words(&value);
                    let mode = reply.lock().clone();
                    let replies = match mode {
                        Reply::Auto => auto_replies(&command),
                        Reply::Reject(message) => vec![Value::Error(message)],
                        Reply::Silent => Vec::new(),
                    };
                    let _ = commands.send(command);
                    for value in replies {
                        if writer.write_all(&value.to_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn words(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_bytes)
            .map(|word| String::from_utf8_lossy(&word).into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

fn auto_replies(command: &[String]) -> Vec<Value> {
    let Some(name) = command.first().map(|name| name.to_ascii_lowercase()) else {
        return Vec::new();
    };
    match name.as_str() {
        "ping" => vec![Value::Array(vec![Value::bulk("pong"), Value::bulk("")])],
        "subscribe" | "unsubscribe" | "psubscribe" | "punsubscribe" => command[1..]
            .iter()
            .enumerate()
            .map(|(index, key)| {
                Value::Array(vec![
                    Value::bulk(name.clone()),
                    Value::bulk(key.clone()),
                    Value::Integer(index as i64 + 1),
                ])
            })
            .collect(),
        _ => vec![Value::Error(format!("ERR unknown command '{name}'"))],
    }
}
