use color_eyre::eyre::{Result, eyre};
use http::StatusCode;
use http_echo::common::{TestServer, spawn_test_server};
use http_echo::http::HeaderList;
use http_echo::{EchoError, EchoServerTrait, FixedEnvironment, HttpConfig, HttpEchoClient, HttpEchoServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

async fn start(config: HttpConfig) -> Result<TestServer> {
    let env = FixedEnvironment::new()
        .with_hostname("integration-host")
        .with_var("POD_NAME", "echo-0")
        .with_var("POD_NAMESPACE", "default");
    Ok(spawn_test_server(config, Arc::new(env)).await?)
}

async fn get_report(server: &TestServer, method: &str, target: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<String> {
    let mut client = HttpEchoClient::connect(server.addr).await?;
    let response = client.request(method, target, headers, body).await?;
    if response.status != StatusCode::OK {
        return Err(eyre!("unexpected status {}", response.status));
    }
    Ok(response.text().into_owned())
}

#[tokio::test]
async fn test_get_with_repeated_query_parameter() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let report = get_report(&server, "GET", "/test?a=1&a=2", &[("User-Agent", "curl/8.0")], b"").await?;

    assert!(report.starts_with("=== REQUEST SUMMARY ===\nTimestamp: "));
    assert!(report.contains("Method: GET | Protocol: HTTP/1.1 | Host: localhost\n"));
    assert!(report.contains("User Agent: curl/8.0\n"));
    assert!(report.contains("Path: /test\n"));
    assert!(report.contains("Query Parameters:\n  a = 1\n  a = 2\n"));
    assert!(report.contains("Body: (empty)\n"));
    assert!(report.contains("Combined Form Data (GET + POST):\n  a = 1\n  a = 2\n"));
    assert!(!report.contains("POST Form Data Only:"));
    assert!(!report.contains("Real Client IP:"));
    assert!(report.contains("=== REQUEST COMPLETED ===\nProcessing Time: "));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_form_post() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let report = get_report(
        &server,
        "POST",
        "/submit",
        &[("Content-Type", "application/x-www-form-urlencoded")],
        b"x=5&y=hello",
    )
    .await?;

    assert!(report.contains("* Content-Type   : application/x-www-form-urlencoded\n"));
    assert!(report.contains("* Content-Length : 11\n"));
    assert!(report.contains("Content-Length: 11 bytes\n"));
    assert!(report.contains("Body Content:\nx=5&y=hello\n\nParsed as form data:\n  x = 5\n  y = hello\n"));
    assert!(report.contains("Combined Form Data (GET + POST):\n  x = 5\n  y = hello\n"));
    assert!(report.contains("POST Form Data Only:\n  x = 5\n  y = hello\n"));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_json_post_is_pretty_printed() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let report = get_report(
        &server,
        "POST",
        "/api",
        &[("Content-Type", "application/json")],
        br#"{"b":[1,2],"a":1}"#,
    )
    .await?;

    assert!(report.contains("Body Content:\n{\n  \"a\": 1,\n  \"b\": [\n    1,\n    2\n  ]\n}\n"));
    assert!(!report.contains("Parsed as form data:"));
    assert!(report.contains("Form Data: (none)\n"));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_forwarded_client_address() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let report = get_report(&server, "GET", "/", &[("X-Forwarded-For", "10.0.0.1, 10.0.0.2")], b"").await?;

    assert!(report.contains("Remote Address: 127.0.0.1:"));
    assert!(report.contains("Real Client IP: 10.0.0.1\n"));

    let report = get_report(&server, "GET", "/", &[("X-Real-IP", "172.16.0.9")], b"").await?;
    assert!(report.contains("Real Client IP: 172.16.0.9\n"));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_all_headers_listed_verbatim() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let report = get_report(
        &server,
        "GET",
        "/",
        &[("X-Custom-Header", "some value"), ("X-Dup", "one"), ("X-Dup", "two")],
        b"",
    )
    .await?;

    assert!(report.contains("All Headers:\n  Host                : localhost\n"));
    assert!(report.contains("  X-Custom-Header     : some value\n"));
    assert!(report.contains("  X-Dup               : one\n  X-Dup               : two\n"));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_server_information_section() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let report = get_report(&server, "GET", "/", &[], b"").await?;

    assert!(report.contains("=== SERVER INFORMATION ===\nServer Hostname: integration-host\n"));
    assert!(report.contains(&format!("Server Version: http-echo/{}\n", env!("CARGO_PKG_VERSION"))));
    assert!(report.contains("POD_NAME: echo-0\nPOD_NAMESPACE: default\n"));
    assert!(!report.contains("CONTAINER_NAME:"));
    assert!(report.contains("Request Start Time: "));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_keep_alive_serves_sequential_requests() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    for i in 0..5 {
        let response = client.request("GET", &format!("/seq/{i}"), &[], b"").await?;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.text().contains(&format!("Path: /seq/{i}\n")));
        assert_eq!(response.header("Connection"), None);
    }

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_chunked_request_body() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    let response = client
        .send_raw(
            b"POST /chunked HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await?;
    let report = response.text();

    assert_eq!(response.status, StatusCode::OK);
    assert!(report.contains("Content-Length: unknown\n"));
    assert!(report.contains("Body Content:\nhello world\n"));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_clients() -> Result<()> {
    let server = start(HttpConfig::default()).await?;

    let mut handles = Vec::new();
    for i in 0..20 {
        let addr = server.addr;
        handles.push(tokio::spawn(async move {
            let mut client = HttpEchoClient::connect(addr).await?;
            let response = client.request("PUT", &format!("/client/{i}"), &[], b"payload").await?;
            Ok::<_, EchoError>((i, response))
        }));
    }

    for handle in handles {
        let (i, response) = handle.await??;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.text().contains(&format!("Path: /client/{i}\n")));
    }

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_connection_close_header_is_honored() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;

    let response = client.request("GET", "/", &[("Connection", "close")], b"").await?;
    assert_eq!(response.header("Connection"), Some("close"));

    let second = client.request("GET", "/", &[], b"").await;
    assert!(second.is_err());

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_run_reports_listen_failure() -> Result<()> {
    let occupied = TcpListener::bind("127.0.0.1:0").await?;
    let addr = occupied.local_addr()?;

    let server = HttpEchoServer::new(HttpConfig {
        bind_addr: addr,
        ..Default::default()
    });
    match server.run().await {
        Err(EchoError::Listen { addr: failed, .. }) => assert_eq!(failed, addr),
        other => return Err(eyre!("expected listen error, got {other:?}")),
    }
    Ok(())
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() -> Result<()> {
    let server = HttpEchoServer::new(HttpConfig {
        bind_addr: "127.0.0.1:0".parse()?,
        ..Default::default()
    });
    let shutdown = server.shutdown_signal();
    // Cancelling before the server starts must not be lost.
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), server.run()).await??;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_idle_keep_alive_connections() -> Result<()> {
    let server = start(HttpConfig::default()).await?;
    let mut client = HttpEchoClient::connect(server.addr).await?;
    client.request("GET", "/", &[], b"").await?;

    tokio::time::timeout(Duration::from_secs(5), server.stop()).await??;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_aborts_stuck_connections_after_grace_period() -> Result<()> {
    let config = HttpConfig {
        read_timeout: Duration::from_secs(30),
        shutdown_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let server = start(config).await?;

    let mut stream = TcpStream::connect(server.addr).await?;
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 100\r\n\r\npartial")
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    match server.stop().await {
        Err(EchoError::Shutdown(reason)) => assert!(reason.contains("1 connection(s)")),
        other => return Err(eyre!("expected shutdown error, got {other:?}")),
    }
    Ok(())
}

#[test]
fn test_header_list_preserves_arrival_order() {
    let headers: HeaderList = [("B", "2"), ("a", "1"), ("b", "3")].into_iter().collect();
    let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["B", "a", "b"]);
    assert_eq!(headers.get_all("b").collect::<Vec<_>>(), ["2", "3"]);
}
