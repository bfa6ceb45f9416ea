use std::{io, sync::Arc, time::Duration};

use labeq_rs::{
    bus::mock::{MockConnector, MockHandle, MockSession},
    connection::{ConnectionManager, ConnectionSpec, ConnectionStatus},
    error::Error,
    protocol::{Reply, ReplyKind, ScpiProtocol},
};
use tokio::time::Instant;

const RES: &str = "TCPIP0::10.0.142.7::INSTR";

async fn connected(session: MockSession, timeout: Duration) -> (ScpiProtocol, MockHandle) {
    let handle = session.handle();
    let spec = RES
        .parse::<ConnectionSpec>()
        .unwrap()
        .with_timeout(timeout)
        .with_delay(Duration::ZERO);
    let connector = MockConnector::new().with_session(RES, session);
    let mut proto = ScpiProtocol::new(ConnectionManager::with_connector(spec, Arc::new(connector)));
    proto.connect().await.unwrap();
    (proto, handle)
}

#[tokio::test]
async fn numeric_reply_is_parsed() {
    let (mut proto, handle) =
        connected(MockSession::new("dmm").reply("+5.00E+00"), Duration::from_secs(1)).await;

    assert_eq!(proto.query_f64(":MEAS:VOLT? CH1").await.unwrap(), 5.0);
    assert_eq!(handle.written(), vec![":MEAS:VOLT? CH1\n"]);
    assert_eq!(proto.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn malformed_numeric_reply_leaves_status_alone() {
    let (mut proto, _handle) = connected(
        MockSession::new("dmm").reply("OVERLOAD?").reply("1.5"),
        Duration::from_secs(1),
    )
    .await;

    let err = proto.query_f64("READ?").await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "{err}");
    assert_eq!(proto.status(), ConnectionStatus::Connected);

    /* The bad line was consumed whole, the next exchange lines up */
    assert_eq!(proto.query_f64("READ?").await.unwrap(), 1.5);
}

#[tokio::test]
async fn commands_while_disconnected_never_reach_the_bus() {
    let (mut proto, handle) = connected(MockSession::new("psu"), Duration::from_secs(1)).await;
    proto.disconnect().await.unwrap();

    assert!(matches!(proto.send("*CLS").await, Err(Error::NotConnected(_))));
    assert!(matches!(
        proto.query("*IDN?", ReplyKind::Text).await,
        Err(Error::NotConnected(_))
    ));
    assert_eq!(handle.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_instrument_times_out_at_the_budget() {
    let (mut proto, handle) =
        connected(MockSession::new("scope").silent(), Duration::from_millis(750)).await;

    let start = Instant::now();
    let err = proto.query_text("*IDN?").await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, Error::Timeout(_)), "{err}");
    assert!(elapsed >= Duration::from_millis(750) && elapsed < Duration::from_millis(800));
    assert_eq!(proto.status(), ConnectionStatus::Error);
    assert_eq!(handle.write_count(), 1);

    /* Poisoned until reconnected */
    assert!(matches!(proto.send("*CLS").await, Err(Error::NotConnected(_))));
    assert_eq!(handle.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_write_times_out() {
    let (mut proto, _handle) =
        connected(MockSession::new("psu").stall_writes(), Duration::from_millis(200)).await;

    assert!(matches!(proto.send("*RST").await, Err(Error::Timeout(_))));
    assert_eq!(proto.status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn rejected_write_is_a_write_error() {
    let (mut proto, _handle) = connected(
        MockSession::new("psu").fail_writes(io::ErrorKind::BrokenPipe),
        Duration::from_secs(1),
    )
    .await;

    assert!(matches!(proto.send("*RST").await, Err(Error::Write(_))));
    assert_eq!(proto.status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn read_failure_is_an_io_error() {
    let (mut proto, _handle) = connected(
        MockSession::new("psu").fail_read(io::ErrorKind::ConnectionReset),
        Duration::from_secs(1),
    )
    .await;

    assert!(matches!(proto.query_text("*IDN?").await, Err(Error::Io(_))));
    assert_eq!(proto.status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn definite_block_reply() {
    let mut reply = b"#210".to_vec();
    reply.extend([0u8, 1, 2, 3, 10, 13, 255, 254, 253, 252]);
    reply.push(b'\n');
    let (mut proto, _handle) =
        connected(MockSession::new("scope").reply_bytes(reply), Duration::from_secs(1)).await;

    let data = proto.query_block("CURVE?").await.unwrap();
    assert_eq!(data, vec![0, 1, 2, 3, 10, 13, 255, 254, 253, 252]);
    assert_eq!(proto.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn indefinite_block_reply() {
    let (mut proto, _handle) = connected(
        MockSession::new("scope").reply_bytes(b"#0abc\n".to_vec()),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(proto.query("CURVE?", ReplyKind::Block).await.unwrap(), Reply::Block(b"abc".to_vec()));
}

#[tokio::test]
async fn block_longer_than_declared_is_a_parse_error() {
    let (mut proto, _handle) = connected(
        MockSession::new("scope").reply_bytes(b"#13abcdef\n".to_vec()),
        Duration::from_secs(1),
    )
    .await;

    assert!(matches!(proto.query_block("CURVE?").await, Err(Error::Parse(_))));
}

#[tokio::test(start_paused = true)]
async fn block_shorter_than_declared_times_out() {
    let (mut proto, _handle) = connected(
        MockSession::new("scope").reply_bytes(b"#15ab".to_vec()),
        Duration::from_millis(300),
    )
    .await;

    assert!(matches!(proto.query_block("CURVE?").await, Err(Error::Timeout(_))));
    assert_eq!(proto.status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn error_string_instead_of_block_is_discarded_whole() {
    let (mut proto, _handle) = connected(
        MockSession::new("scope")
            .reply("-113,\"Undefined header\"")
            .reply("1")
            .reply("1.5"),
        Duration::from_secs(1),
    )
    .await;

    let err = proto.query_block("CURVE?").await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "{err}");
    assert_eq!(proto.status(), ConnectionStatus::Connected);

    /* Two byte reply, the terminator is already in the header read */
    assert!(matches!(proto.query_block("CURVE?").await, Err(Error::Parse(_))));

    assert_eq!(proto.query_f64("READ?").await.unwrap(), 1.5);
}

#[tokio::test]
async fn garbled_block_length_is_discarded_whole() {
    let (mut proto, _handle) = connected(
        MockSession::new("scope").reply_bytes(b"#2x9abc\n".to_vec()).reply("1.5"),
        Duration::from_secs(1),
    )
    .await;

    assert!(matches!(proto.query_block("CURVE?").await, Err(Error::Parse(_))));
    assert_eq!(proto.status(), ConnectionStatus::Connected);
    assert_eq!(proto.query_f64("READ?").await.unwrap(), 1.5);
}

#[tokio::test]
async fn oversized_block_is_refused_before_reading_it() {
    let (mut proto, handle) = connected(
        MockSession::new("scope").reply("#9999999999"),
        Duration::from_secs(1),
    )
    .await;

    let err = proto.query_block("CURVE?").await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "{err}");
    /* No way to find the end of a block that was never read */
    assert_eq!(proto.status(), ConnectionStatus::Error);
    assert_eq!(handle.write_count(), 1);
}

#[tokio::test]
async fn block_limit_is_configurable() {
    let mut reply = b"#210".to_vec();
    reply.extend([7u8; 10]);
    reply.push(b'\n');
    let spec = RES
        .parse::<ConnectionSpec>()
        .unwrap()
        .with_max_block_len(8)
        .with_delay(Duration::ZERO);
    let connector =
        MockConnector::new().with_session(RES, MockSession::new("scope").reply_bytes(reply));
    let mut proto = ScpiProtocol::new(ConnectionManager::with_connector(spec, Arc::new(connector)));
    proto.connect().await.unwrap();

    assert!(matches!(proto.query_block("CURVE?").await, Err(Error::Parse(_))));
}

#[tokio::test]
async fn eoi_terminated_block_needs_no_trailing_newline() {
    let session = MockSession::new("scope")
        .reply_bytes(b"#14\n\rab".to_vec())
        .reply("1.5");
    let spec = RES
        .parse::<ConnectionSpec>()
        .unwrap()
        .with_block_terminator(false)
        .with_delay(Duration::ZERO);
    let connector = MockConnector::new().with_session(RES, session);
    let mut proto = ScpiProtocol::new(ConnectionManager::with_connector(spec, Arc::new(connector)));
    proto.connect().await.unwrap();

    assert_eq!(proto.query_block("CURVE?").await.unwrap(), b"\n\rab");
    assert_eq!(proto.status(), ConnectionStatus::Connected);
    assert_eq!(proto.query_f64("READ?").await.unwrap(), 1.5);
}

#[tokio::test]
async fn custom_terminators() {
    let session = MockSession::new("serial").reply_bytes(b"KEITHLEY INSTRUMENTS INC.,MODEL 2100,1,1\r".to_vec());
    let handle = session.handle();
    let spec = "ASRL3::INSTR"
        .parse::<ConnectionSpec>()
        .unwrap()
        .with_terminator("\r\n")
        .with_read_terminator(b'\r')
        .with_delay(Duration::ZERO);
    let connector = MockConnector::new().with_session("ASRL3::INSTR", session);
    let mut proto = ScpiProtocol::new(ConnectionManager::with_connector(spec, Arc::new(connector)));
    proto.connect().await.unwrap();

    let info = proto.identify().await.unwrap();
    assert_eq!(info.model, "MODEL 2100");
    assert_eq!(handle.written(), vec!["*IDN?\r\n"]);
}
