use super::test_helpers::*;
use super::*;
use crate::error::Error;
use std::sync::Arc;


#[tokio::test]
async fn test_ping_posts_to_agent_ping() {
    let guest = FakeGuest::new();
    let conn = guest.connect(4);

    conn.ping().await.unwrap();

    let calls = guest.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, reqwest::Method::POST);
    assert_eq!(calls[0].path, "nodes/pve1/qemu/100/agent/ping");
}

#[tokio::test]
async fn test_closed_connection_rejects_ping() {
    let guest = FakeGuest::new();
    let conn = guest.connect(4);

    conn.close();
    assert!(conn.is_closed());

    let result = conn.ping().await;
    assert!(matches!(result, Err(Error::Cancelled { pid: None })));
    assert!(guest.calls().is_empty());
}

#[tokio::test]
async fn test_cancellation_token_closes_connection() {
    let guest = FakeGuest::new();
    let conn = guest.connect(4);

    conn.cancellation_token().cancel();
    assert!(conn.is_closed());
}

#[test]
fn test_with_parts_validates_config() {
    let mut config = test_config(0);
    config.transfer.buffer_size = 0;

    let result = Connection::with_parts(config, FakeGuest::new(), Arc::new(ScriptEncoder));
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[test]
fn test_debug_hides_client() {
    let guest = FakeGuest::new();
    let conn = guest.connect(4);
    let debug = format!("{conn:?}");
    assert!(debug.contains("pve1"));
    assert!(debug.contains("script"));
    assert!(debug.contains("closed: false"));
}

#[tokio::test]
async fn test_read_chunk_fills_buffer_across_short_reads() {
    let data = b"abcdefghij".to_vec();
    let (mut client, mut server) = tokio::io::duplex(3);
    let writer = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        server.write_all(&data).await.unwrap();
    });

    let mut buf = [0u8; 8];
    let n = read_chunk(&mut client, &mut buf).await.unwrap();
    assert_eq!(n, 8);
    assert_eq!(&buf, b"abcdefgh");

    writer.await.unwrap();
    let n = read_chunk(&mut client, &mut buf).await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(&buf[..2], b"ij");
}

#[tokio::test(start_paused = true)]
async fn test_commands_wait_for_running_processes() {
    let guest = FakeGuest::new().with_running_polls(2);
    let conn = guest.connect(4);

    let out = conn.exec_command("echo\thello", None).await.unwrap();
    assert_eq!(out.stdout_text(), "hello");

    let polls = guest
        .calls()
        .iter()
        .filter(|c| c.method == reqwest::Method::GET)
        .count();
    assert_eq!(polls, 3);
}

#[test]
fn test_new_picks_encoder_for_dialect() {
    let conn = Connection::new(test_config(4)).unwrap();
    assert_eq!(conn.encoder().name(), "powershell");
    assert_eq!(conn.buffer_size(), 4);
    assert_eq!(conn.target().to_string(), "pve1/100");

    let mut config = test_config(4);
    config.shell = crate::config::ShellDialect::Posix;
    let conn = Connection::new(config).unwrap();
    assert_eq!(conn.encoder().name(), "posix");
}
