//! Integration Tests for the Modbus device simulator
//!
//! These tests run a real server on an ephemeral port and talk to it with raw
//! TCP streams and with the polling client.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use modbus_devsim::config::SlaveConfig;
use modbus_devsim::utils::logging::init_test_logger;
use modbus_devsim::*;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

fn server_config(refresh: Option<RefresherConfig>) -> ModbusTcpServerConfig {
    ModbusTcpServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        refresh,
        ..Default::default()
    }
}

async fn start_server(table: Arc<SlaveTable>, events: EventLogger) -> ModbusTcpServer {
    init_test_logger();
    let mut server = ModbusTcpServer::with_config(server_config(None), table)
        .unwrap()
        .with_events(events);
    server.start().await.unwrap();
    server
}

/// The stock simulator table: slaves 1-3 sharing one aliased block of 10
fn default_table() -> Arc<SlaveTable> {
    Arc::new(SlaveConfig::default().build_table())
}

async fn connect(server: &ModbusTcpServer) -> TcpStream {
    TcpStream::connect(server.local_addr().unwrap()).await.unwrap()
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut frame = vec![0u8; 6];
    timeout(IO_TIMEOUT, stream.read_exact(&mut frame)).await.unwrap().unwrap();
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    frame.resize(6 + length, 0);
    timeout(IO_TIMEOUT, stream.read_exact(&mut frame[6..])).await.unwrap().unwrap();
    frame
}

async fn transact(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    read_frame(stream).await
}

/// Build a read request frame
fn read_request(tid: u16, unit: u8, function: u8, address: u16, quantity: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(12);
    frame.extend_from_slice(&tid.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 6, unit, function]);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&quantity.to_be_bytes());
    frame
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = timeout(IO_TIMEOUT, stream.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0, "connection still open");
}

fn collecting_logger() -> (EventLogger, Arc<Mutex<Vec<ServerEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let logger = EventLogger::new(
        Box::new(move |event: &ServerEvent| sink.lock().unwrap().push(event.clone())),
        LogLevel::Debug,
    );
    (logger, seen)
}

#[tokio::test]
async fn test_read_holding_registers() {
    let table = default_table();
    table
        .get(1)
        .unwrap()
        .write(BankKind::HoldingRegisters, 0, &[0x000A, 0x0102, 0xFFFF])
        .unwrap();
    let mut server = start_server(table, EventLogger::disabled()).await;
    let mut stream = connect(&server).await;

    let response = transact(&mut stream, &read_request(0x0001, 1, 0x03, 0, 3)).await;
    assert_eq!(
        response,
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x03, 0x06, 0x00, 0x0A, 0x01, 0x02, 0xFF, 0xFF]
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_refreshed_values_are_served() {
    let table = default_table();
    let mut refresher = PeriodicRefresher::new(&table, RefresherConfig::default())
        .unwrap()
        .with_seed(2024)
        .with_events(EventLogger::disabled());
    let mut server = start_server(table.clone(), EventLogger::disabled()).await;
    let mut stream = connect(&server).await;

    let response = transact(&mut stream, &read_request(1, 1, 0x04, 0, 10)).await;
    assert_eq!(&response[6..9], &[0x01, 0x04, 20]);
    assert!(response[9..].iter().all(|&b| b == 0));

    let values = refresher.tick();
    for unit in [1u8, 2, 3] {
        let response = transact(&mut stream, &read_request(2, unit, 0x04, 0, 10)).await;
        assert_eq!(response[8], 20);
        let served: Vec<u16> = response[9..]
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(served, values);
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_background_refresher_changes_values() {
    init_test_logger();
    let table = default_table();
    let config = RefresherConfig { period: Duration::from_millis(10), ..Default::default() };
    let mut server = ModbusTcpServer::with_config(server_config(Some(config)), table)
        .unwrap()
        .with_refresher_seed(7)
        .with_events(EventLogger::disabled());
    server.start().await.unwrap();

    let addr = server.local_addr().unwrap().to_string();
    let mut client = ModbusTcpClient::from_address(&addr, IO_TIMEOUT).await.unwrap();

    sleep(Duration::from_millis(50)).await;
    let first = client.read_04(2, 0, 10).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    let second = client.read_04(2, 0, 10).await.unwrap();

    assert!(first.iter().chain(second.iter()).all(|&v| v <= 1000));
    assert_ne!(first, second);

    client.close().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_slave() {
    let mut server = start_server(default_table(), EventLogger::disabled()).await;
    let mut stream = connect(&server).await;

    let response = transact(&mut stream, &read_request(0x0042, 9, 0x03, 0, 1)).await;
    assert_eq!(response, vec![0x00, 0x42, 0x00, 0x00, 0x00, 0x03, 0x09, 0x83, 0x0B]);

    // The connection stays usable
    let response = transact(&mut stream, &read_request(0x0043, 1, 0x03, 0, 1)).await;
    assert_eq!(&response[6..8], &[0x01, 0x03]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_illegal_functions() {
    let mut server = start_server(default_table(), EventLogger::disabled()).await;
    let mut stream = connect(&server).await;

    // Write single register
    let response = transact(&mut stream, &read_request(1, 1, 0x06, 0, 1)).await;
    assert_eq!(&response[6..], &[0x01, 0x86, 0x01]);

    // Read coils
    let response = transact(&mut stream, &read_request(2, 1, 0x01, 0, 1)).await;
    assert_eq!(&response[6..], &[0x01, 0x81, 0x01]);

    // Unknown code with an arbitrary payload
    let response = transact(&mut stream, &[0, 3, 0, 0, 0, 3, 1, 0x2B, 0x0E]).await;
    assert_eq!(&response[6..], &[0x01, 0xAB, 0x01]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_illegal_quantity_and_address() {
    let mut server = start_server(default_table(), EventLogger::disabled()).await;
    let mut stream = connect(&server).await;

    let response = transact(&mut stream, &read_request(1, 1, 0x03, 0, 0)).await;
    assert_eq!(&response[6..], &[0x01, 0x83, 0x03]);

    let response = transact(&mut stream, &read_request(2, 1, 0x04, 0, 126)).await;
    assert_eq!(&response[6..], &[0x01, 0x84, 0x03]);

    let response = transact(&mut stream, &read_request(3, 1, 0x03, 5, 6)).await;
    assert_eq!(&response[6..], &[0x01, 0x83, 0x02]);

    let response = transact(&mut stream, &read_request(4, 1, 0x04, 10, 1)).await;
    assert_eq!(&response[6..], &[0x01, 0x84, 0x02]);

    assert_eq!(server.get_stats().exception_responses, 4);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let mut server = start_server(default_table(), EventLogger::disabled()).await;

    let mut stream = connect(&server).await;
    stream.write_all(&[0, 1, 0, 1, 0, 6, 1, 3, 0, 0, 0, 1]).await.unwrap();
    assert_closed(&mut stream).await;

    let mut stream = connect(&server).await;
    stream.write_all(&[0, 1, 0, 0, 0x01, 0x00, 1, 3]).await.unwrap();
    assert_closed(&mut stream).await;

    assert_eq!(server.get_stats().malformed_frames, 2);

    // Other clients are unaffected
    let mut stream = connect(&server).await;
    let response = transact(&mut stream, &read_request(1, 1, 0x03, 0, 1)).await;
    assert_eq!(&response[6..8], &[0x01, 0x03]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_split_and_pipelined_frames() {
    let mut server = start_server(default_table(), EventLogger::disabled()).await;
    let mut stream = connect(&server).await;

    let request = read_request(7, 1, 0x03, 0, 2);
    stream.write_all(&request[..5]).await.unwrap();
    stream.flush().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    stream.write_all(&request[5..]).await.unwrap();
    let response = read_frame(&mut stream).await;
    assert_eq!(&response[..2], &[0, 7]);

    let mut pipelined = read_request(10, 1, 0x03, 0, 1);
    pipelined.extend(read_request(11, 9, 0x03, 0, 1));
    pipelined.extend(read_request(12, 2, 0x04, 0, 1));
    stream.write_all(&pipelined).await.unwrap();

    let first = read_frame(&mut stream).await;
    let second = read_frame(&mut stream).await;
    let third = read_frame(&mut stream).await;
    assert_eq!(&first[..2], &[0, 10]);
    assert_eq!(&second[..2], &[0, 11]);
    assert_eq!(&second[7..], &[0x83, 0x0B]);
    assert_eq!(&third[..2], &[0, 12]);
    assert_eq!(third[7], 0x04);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_slave_modes() {
    let isolated = SlaveConfig { mode: SlaveMode::Isolated, ..Default::default() };
    let table = Arc::new(isolated.build_table());
    table.get(1).unwrap().write(BankKind::HoldingRegisters, 0, &[11]).unwrap();
    let mut server = start_server(table, EventLogger::disabled()).await;
    let addr = server.local_addr().unwrap().to_string();
    let mut client = ModbusTcpClient::from_address(&addr, IO_TIMEOUT).await.unwrap();

    assert_eq!(client.read_03(1, 0, 1).await.unwrap(), vec![11]);
    assert_eq!(client.read_03(2, 0, 1).await.unwrap(), vec![0]);
    server.stop().await.unwrap();

    let single = SlaveConfig { mode: SlaveMode::Single, ..Default::default() };
    let mut server = start_server(Arc::new(single.build_table()), EventLogger::disabled()).await;
    let addr = server.local_addr().unwrap().to_string();
    let mut client = ModbusTcpClient::from_address(&addr, IO_TIMEOUT).await.unwrap();

    assert_eq!(client.read_04(0, 0, 2).await.unwrap(), vec![0, 0]);
    assert_eq!(client.read_04(200, 0, 2).await.unwrap(), vec![0, 0]);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_polling() {
    let table = default_table();
    table
        .get(1)
        .unwrap()
        .write(BankKind::InputRegisters, 0, &(0..10).map(|v| v * 100).collect::<Vec<_>>())
        .unwrap();
    let mut server = start_server(table, EventLogger::disabled()).await;
    let addr = server.local_addr().unwrap().to_string();
    let mut client = ModbusTcpClient::from_address(&addr, IO_TIMEOUT).await.unwrap();

    let values = poll_once(&mut client, 1, DataType::InputRegisters, 2, 3).await.unwrap();
    assert_eq!(values, vec![200, 300, 400]);

    // Aliased banks: holding registers show the same block
    let values = poll_once(&mut client, 3, DataType::HoldingRegisters, 0, 2).await.unwrap();
    assert_eq!(values, vec![0, 100]);

    match client.read_01(1, 0, 1).await {
        Err(ModbusError::Exception { function, code, .. }) => {
            assert_eq!(function, 0x01);
            assert_eq!(code, 0x01);
        }
        other => panic!("expected exception, got {:?}", other),
    }

    match client.read_03(4, 0, 1).await {
        Err(ModbusError::Exception { code, .. }) => assert_eq!(code, 0x0B),
        other => panic!("expected exception, got {:?}", other),
    }

    // Exceptions do not break the session
    assert!(client.is_connected());
    assert_eq!(client.read_04(2, 9, 1).await.unwrap(), vec![900]);

    let stats = client.get_stats();
    assert_eq!(stats.requests_sent, 5);
    assert_eq!(stats.responses_received, 3);
    assert_eq!(stats.errors, 2);

    client.close().await.unwrap();
    assert!(!client.is_connected());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_clients() {
    let mut server = start_server(default_table(), EventLogger::disabled()).await;
    let addr = server.local_addr().unwrap().to_string();

    let mut handles = Vec::new();
    for unit in 1..=3u8 {
        let addr = addr.clone();
        handles.push(tokio::spawn(async move {
            let mut client = ModbusTcpClient::from_address(&addr, IO_TIMEOUT).await.unwrap();
            for _ in 0..20 {
                assert_eq!(client.read_03(unit, 0, 10).await.unwrap().len(), 10);
            }
            client.close().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = server.get_stats();
    assert_eq!(stats.connections_count, 3);
    assert_eq!(stats.total_requests, 60);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_events_are_reported() {
    let (events, seen) = collecting_logger();
    let mut server = start_server(default_table(), events).await;

    let mut stream = connect(&server).await;
    transact(&mut stream, &read_request(5, 1, 0x03, 0, 1)).await;
    transact(&mut stream, &read_request(6, 8, 0x03, 0, 1)).await;
    drop(stream);

    let closed = |events: &[ServerEvent]| {
        events.iter().any(|e| matches!(e, ServerEvent::ConnectionClosed { .. }))
    };
    for _ in 0..100 {
        if closed(seen.lock().unwrap().as_slice()) {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    let seen = seen.lock().unwrap();
    assert!(matches!(seen.first(), Some(ServerEvent::ConnectionOpened { .. })));
    assert_eq!(
        seen.iter().filter(|e| matches!(e, ServerEvent::FrameDecoded { .. })).count(),
        2
    );
    assert!(seen.iter().any(|e| matches!(
        e,
        ServerEvent::ExceptionRaised { transaction_id: 6, unit_id: 8, function: 0x03, .. }
    )));
    assert!(closed(seen.as_slice()));
    drop(seen);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_connections() {
    let mut server = start_server(default_table(), EventLogger::disabled()).await;
    let addr = server.local_addr().unwrap();
    let mut stream = connect(&server).await;
    transact(&mut stream, &read_request(1, 1, 0x03, 0, 1)).await;

    server.stop().await.unwrap();
    assert!(!server.is_running());
    assert_closed(&mut stream).await;
    assert!(TcpStream::connect(addr).await.is_err());
}
