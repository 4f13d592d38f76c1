//! Terminal node against a scripted host on loopback

use cdef_config::CommsConfig;
use cdef_terminal::TerminalNode;
use codec::{Message, SessionConnect, SessionConnectResponse};
use dispatcher::Dispatcher;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const WAIT: Duration = Duration::from_secs(5);

fn config_for(port: u16) -> CommsConfig {
    CommsConfig::from_toml_str(&format!(
        r#"
[[connections]]
id = "host"
host = "127.0.0.1"
port = {port}
reconnect_delay_ms = 100

[[sessions]]
connection_id = "host"
terminal_number = 9

[sessions.to]
descriptor_type = 1
sales_location = 0
address_type = 3
unique_address = 1

[sessions.from]
descriptor_type = 2
sales_location = 0
address_type = 5
unique_address = 42
"#
    ))
    .unwrap()
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut length = [0u8; 4];
    stream.read_exact(&mut length).await.unwrap();
    let mut frame = length.to_vec();
    frame.resize(4 + u32::from_le_bytes(length) as usize, 0);
    stream.read_exact(&mut frame[4..]).await.unwrap();
    frame
}

async fn accept(listener: &TcpListener) -> TcpStream {
    tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("terminal never dialled")
        .unwrap()
        .0
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test]
async fn test_node_connects_session_and_redials() {
    let host = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(host.local_addr().unwrap().port());

    let dispatcher = Dispatcher::new();
    let loop_task = dispatcher.spawn();
    let node = TerminalNode::build(&config, &dispatcher).unwrap();
    assert_eq!(node.sessions().len(), 1);
    node.start().unwrap();

    let mut stream = accept(&host).await;
    let request = tokio::time::timeout(WAIT, read_frame(&mut stream)).await.unwrap();
    let connect = Message::<SessionConnect>::decode(&request).unwrap();
    assert_eq!(connect.body().unwrap().terminal_number, 9);

    let mut to = connect.header.from;
    to.set_sales_location(5);
    let response = Message::response(SessionConnectResponse::accepted())
        .addressed(to, connect.header.to)
        .encode()
        .unwrap();
    stream.write_all(&response).await.unwrap();

    let session = node.sessions()[0].clone();
    eventually(|| session.is_established()).await;
    assert_eq!(session.sales_location(), 5);

    // host goes away; the node dials again and restarts the handshake
    drop(stream);
    eventually(|| !session.is_established()).await;
    let mut stream = accept(&host).await;
    let request = tokio::time::timeout(WAIT, read_frame(&mut stream)).await.unwrap();
    assert!(Message::<SessionConnect>::decode(&request).is_ok());
    assert!(node.connections().all(|c| c.is_connected()));

    node.shutdown();
    tokio::time::timeout(WAIT, loop_task).await.unwrap().unwrap();
}

#[test]
fn test_sample_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/terminal.toml");
    let config = CommsConfig::load(&path).unwrap();
    assert_eq!(config.connections.len(), 1);
    assert_eq!(config.sessions_for("host-primary").count(), 1);
    assert_eq!(config.sessions[0].device_type, 0x52);
    assert!(config.listener.is_none());
}
