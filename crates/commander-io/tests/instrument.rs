//! End-to-end tests of a commander talking to simulated instruments.

use std::sync::Arc;
use std::time::Duration;

use commander_io::{
    Commander, CommanderError, CommanderSchema, ParameterRegistry, ParameterValue, Response,
    TransportError,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};

/// Device behaviour: reply bytes for one received command line.
type Responder = fn(&str) -> Option<&'static str>;

fn cryostat(line: &str) -> Option<&'static str> {
    match line {
        "KRDG? A" => Some("+292.286E+0K\r\n"),
        "KRDG? B" => Some("ERR12\r\n"),
        "LIST" => Some("\r\nA=4.2;B=77.5;\r\n"),
        "*IDN?" => Some("garbage\r\n"),
        _ => None,
    }
}

/// Short replies without any terminator.
fn terse(line: &str) -> Option<&'static str> {
    match line {
        "KRDG? A" => Some("+4.20K"),
        _ => None,
    }
}

/// Serve one stream connection; commands are newline terminated.
async fn spawn_stream_device(respond: Responder) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(reply) = respond(line.trim()) {
                if write.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });
    port
}

async fn spawn_datagram_device(respond: Responder) -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let line = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            if let Some(reply) = respond(&line) {
                let _ = socket.send_to(reply.as_bytes(), peer).await;
            }
        }
    });
    port
}

fn cryostat_schema(connection: Value) -> CommanderSchema {
    let schema = json!({
        "name": "cryostat",
        "connectionProperties": connection,
        "parameters": {
            "temp": { "type": "double", "range": "[0,500]", "description": "Kelvin" },
            "channel": { "type": "char", "range": "A,B" }
        },
        "commands": {
            "getTemp": {
                "commandTemplate": "KRDG? (channel)",
                "responseTemplate": "(temp)K",
                "failurePattern": "ERR(\\d+)"
            },
            "setPoint": { "commandTemplate": "SETP (channel),(temp)" },
            "list": { "commandTemplate": "LIST", "responseTemplate": "(channel)=(temp);" },
            "identify": { "commandTemplate": "*IDN?", "responseTemplate": "MODEL (token)" },
            "ping": { "commandTemplate": "PING", "responseTemplate": "(token)" }
        }
    });
    CommanderSchema::from_json_str(&schema.to_string()).unwrap()
}

fn build(connection: Value) -> Commander {
    Commander::from_schema(
        cryostat_schema(connection),
        Arc::new(ParameterRegistry::builtin()),
    )
    .unwrap()
}

async fn stream_commander(respond: Responder, extra: Value) -> Commander {
    let port = spawn_stream_device(respond).await;
    let mut connection = json!({
        "type": "stream",
        "host": "127.0.0.1",
        "port": port,
        "timeout": 500,
        "commandTerminator": "\n"
    });
    if let (Some(target), Some(extra)) = (connection.as_object_mut(), extra.as_object()) {
        target.extend(extra.clone());
    }
    let mut commander = build(connection);
    commander.connect().await.unwrap();
    commander
}

#[tokio::test]
async fn test_stream_scalar_reply() {
    let mut commander =
        stream_commander(cryostat, json!({ "responseTerminator": "\r\n" })).await;

    let response = commander
        .submit("getTemp", &[ParameterValue::Char('A')])
        .await
        .unwrap();
    assert_eq!(response, Response::Value(ParameterValue::Double(292.286)));

    commander.disconnect().await.unwrap();
    assert!(!commander.is_connected());
}

#[tokio::test]
async fn test_stream_device_failure() {
    let mut commander =
        stream_commander(cryostat, json!({ "responseTerminator": "\r\n" })).await;

    let response = commander.submit_line("getTemp", "B").await.unwrap();
    assert_eq!(
        response,
        Response::Row(vec![
            ParameterValue::String("ERROR".into()),
            ParameterValue::String("12".into()),
        ])
    );
    assert!(response.is_failure(commander.failure_marker()));
}

#[tokio::test]
async fn test_stream_rows_after_spurious_terminator() {
    let mut commander =
        stream_commander(cryostat, json!({ "responseTerminator": "\r\n" })).await;

    // a command without reply must not disturb the next request
    let none = commander.submit_line("setPoint", "A, 300").await.unwrap();
    assert!(none.is_none());

    let response = commander.submit_strings::<&str>("list", &[]).await.unwrap();
    assert_eq!(
        response,
        Response::Rows(vec![
            vec![ParameterValue::Char('A'), ParameterValue::Double(4.2)],
            vec![ParameterValue::Char('B'), ParameterValue::Double(77.5)],
        ])
    );
}

#[tokio::test]
async fn test_stream_no_match() {
    let mut commander =
        stream_commander(cryostat, json!({ "responseTerminator": "\r\n" })).await;

    let err = commander
        .submit_strings::<&str>("identify", &[])
        .await
        .unwrap_err();
    match err {
        CommanderError::NoMatch { command, response } => {
            assert_eq!(command, "identify");
            assert_eq!(response, "garbage");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_silent_device_times_out() {
    let mut commander =
        stream_commander(cryostat, json!({ "responseTerminator": "\r\n" })).await;

    let err = commander
        .submit_strings::<&str>("ping", &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommanderError::Transport(TransportError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_stream_fixed_length_reply() {
    let mut commander = stream_commander(terse, json!({ "responseLength": 6 })).await;

    let response = commander.submit_line("getTemp", "A").await.unwrap();
    assert_eq!(response, Response::Value(ParameterValue::Double(4.2)));
}

#[tokio::test]
async fn test_stream_reply_until_quiet() {
    let mut commander = stream_commander(terse, json!({ "timeout": 2000 })).await;

    // the reply ends when the line goes quiet, well before the timeout
    let started = std::time::Instant::now();
    let response = commander.submit_line("getTemp", "A").await.unwrap();
    assert_eq!(response, Response::Value(ParameterValue::Double(4.2)));
    assert!(started.elapsed() < Duration::from_millis(1500));

    let response = commander.submit_line("getTemp", "A").await.unwrap();
    assert_eq!(response, Response::Value(ParameterValue::Double(4.2)));
}

#[tokio::test]
async fn test_rejected_argument_sends_nothing() {
    let mut commander =
        stream_commander(cryostat, json!({ "responseTerminator": "\r\n" })).await;

    let err = commander.submit_line("getTemp", "C").await.unwrap_err();
    assert!(matches!(err, CommanderError::InvalidParameter(_)));

    // the connection is still usable
    let response = commander.submit_line("getTemp", "A").await.unwrap();
    assert_eq!(response, Response::Value(ParameterValue::Double(292.286)));
}

#[tokio::test]
async fn test_submit_requires_connection() {
    let mut commander = build(json!({ "type": "stream", "host": "127.0.0.1", "port": 9 }));

    let err = commander.submit_line("getTemp", "A").await.unwrap_err();
    assert!(matches!(err, CommanderError::NotConnected(_)));
}

#[tokio::test]
async fn test_datagram_request() {
    let port = spawn_datagram_device(cryostat).await;
    let mut commander = build(json!({
        "type": "datagram",
        "host": "127.0.0.1",
        "port": port,
        "timeout": 500,
        "commandTerminator": "\n"
    }));
    commander.connect().await.unwrap();

    let response = commander.submit_line("getTemp", "A").await.unwrap();
    assert_eq!(response, Response::Value(ParameterValue::Double(292.286)));

    let err = commander
        .submit_strings::<&str>("ping", &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommanderError::Transport(TransportError::EmptyResponse { .. })
    ));

    commander.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_schema_file_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("cryostat.json");
    let commander = build(json!({ "type": "stream", "host": "127.0.0.1", "port": 9 }));
    commander.to_schema().save_json_file(&path).unwrap();

    let reloaded = Commander::from_json_file(&path).unwrap();
    assert_eq!(reloaded.name(), "cryostat");
    assert_eq!(
        reloaded.commands().keys().collect::<Vec<_>>(),
        commander.commands().keys().collect::<Vec<_>>()
    );
    assert_eq!(reloaded.to_schema(), commander.to_schema());
}
