// Minimal RESP server over TCP for integration tests.
use bytes::BytesMut;
use respmux_wire::Value;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub enum Action {
    Send(Value),
    Disconnect,
}

pub struct TcpFakeServer {
    pub addr: SocketAddr,
    pub commands: mpsc::UnboundedReceiver<Vec<String>>,
    pub control: mpsc::UnboundedSender<Action>,
}

impl TcpFakeServer {
    pub async fn start() -> TcpFakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (control, mut control_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let (mut reader, mut writer) = socket.into_split();
            let mut buf = BytesMut::with_capacity(4096);
            loop {
                tokio::select! {
                    action = control_rx.recv() => match action {
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
                            for reply in replies(&command) {
                                if writer.write_all(&reply.to_bytes()).await.is_err() {
                                    return;
                                }
                            }
                            let _ = commands_tx.send(command);
                        }
                    }
                }
            }
        });
        TcpFakeServer {
            addr,
            commands,
            control,
        }
    }

    pub fn publish(&self, channel: &str, payload: &str) {
        let value = Value::Array(vec![
            Value::bulk("message"),
            Value::bulk(channel.to_string()),
            Value::bulk(payload.to_string()),
        ]);
        let _ = self.control.send(Action::Send(value));
    }

    pub fn disconnect(&self) {
        let _ = self.control.send(Action::Disconnect);
    }

    pub async fn next_command(&mut self) -> Vec<String> {
        tokio::time::timeout(std::time::Duration::from_secs(2), self.commands.recv())
            .await
            .expect("command timeout")
            .expect("server stopped")
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

fn replies(command: &[String]) -> Vec<Value> {
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
