//! End-to-end tests against a minimal in-process mock FTP server.
//!
//! Grounded on the teacher's `tests/proxy_tests.rs` style (standalone
//! `#[tokio::test]` functions, no shared harness crate) generalized to
//! drive a real `TcpListener` instead of an in-memory service, since
//! the thing under test here is wire-level framing and passive-mode
//! negotiation rather than a service struct's internal bookkeeping.

use ftp_tunnel_client::error::FtpErrorKind;
use ftp_tunnel_client::{FtpClient, FtpConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn read_cmd(reader: &mut (impl AsyncBufReadExt + Unpin)) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line.trim_end().to_string()
}

/// Runs the connect()/login sequence every test below needs, then
/// hands control to `after_login` for the scenario-specific tail.
async fn run_mock_control(
    mut control: TcpStream,
    login_ok: bool,
    after_login: impl FnOnce(TcpStream) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
) {
    control.write_all(b"220 mock ftp ready\r\n").await.unwrap();
    let (read_half, mut write_half) = control.into_split();
    let mut reader = BufReader::new(read_half);

    let user_line = read_cmd(&mut reader).await;
    assert!(user_line.starts_with("USER "));
    write_half.write_all(b"331 password please\r\n").await.unwrap();

    let pass_line = read_cmd(&mut reader).await;
    assert!(pass_line.starts_with("PASS "));
    if !login_ok {
        write_half.write_all(b"530 login incorrect\r\n").await.unwrap();
        return;
    }
    write_half.write_all(b"230 logged in\r\n").await.unwrap();

    let feat_line = read_cmd(&mut reader).await;
    assert_eq!(feat_line, "FEAT");
    write_half
        .write_all(b"211-Features:\r\n SIZE\r\n211 End\r\n")
        .await
        .unwrap();

    let syst_line = read_cmd(&mut reader).await;
    assert_eq!(syst_line, "SYST");
    write_half.write_all(b"215 UNIX Type: L8\r\n").await.unwrap();

    let type_line = read_cmd(&mut reader).await;
    assert_eq!(type_line, "TYPE I");
    write_half.write_all(b"200 Type set to I\r\n").await.unwrap();

    let stru_line = read_cmd(&mut reader).await;
    assert_eq!(stru_line, "STRU F");
    write_half.write_all(b"200 Structure set to F\r\n").await.unwrap();

    let pwd_line = read_cmd(&mut reader).await;
    assert_eq!(pwd_line, "PWD");
    write_half
        .write_all(b"257 \"/\" is current directory\r\n")
        .await
        .unwrap();

    let control = reader.into_inner().unsplit(write_half).unwrap();
    after_login(control).await;
}

async fn pasv_reply_for(listener: &TcpListener) -> String {
    let port = listener.local_addr().unwrap().port();
    format!("227 Entering Passive Mode (127,0,0,1,{},{})\r\n", port / 256, port % 256)
}

#[tokio::test]
async fn list_round_trips_through_pasv_and_resolves_on_226() {
    init_logging();
    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = control_listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (control, _) = control_listener.accept().await.unwrap();
        run_mock_control(control, true, |control| {
            Box::pin(async move {
                let data_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let (read_half, mut write_half) = control.into_split();
                let mut reader = BufReader::new(read_half);

                let pasv_line = read_cmd(&mut reader).await;
                assert_eq!(pasv_line, "PASV");
                write_half.write_all(pasv_reply_for(&data_listener).await.as_bytes()).await.unwrap();

                let (mut data_sock, _) = data_listener.accept().await.unwrap();

                let list_line = read_cmd(&mut reader).await;
                assert_eq!(list_line, "LIST");
                write_half.write_all(b"150 Opening data connection\r\n").await.unwrap();

                data_sock
                    .write_all(b"-rw-r--r--   1 user group  4 Jan  1 12:00 a.txt\r\n")
                    .await
                    .unwrap();
                data_sock.shutdown().await.unwrap();

                write_half.write_all(b"226 Transfer complete\r\n").await.unwrap();
            })
        }))
        .await;
    });

    let config = FtpConfig::builder()
        .host("127.0.0.1")
        .port(control_port)
        .user("tester")
        .password("pw")
        .timeout_ms(5_000)
        .build()
        .unwrap();

    let mut client = FtpClient::connect(config).await.unwrap();
    assert_eq!(client.pwd(), "/");

    let entries = client.list(None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "a.txt");
    assert_eq!(entries[0].size, 4);

    server.await.unwrap();
}

#[tokio::test]
async fn download_races_data_eof_against_control_response() {
    init_logging();
    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = control_listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (control, _) = control_listener.accept().await.unwrap();
        run_mock_control(control, true, |control| {
            Box::pin(async move {
                let data_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let (read_half, mut write_half) = control.into_split();
                let mut reader = BufReader::new(read_half);

                let pasv_line = read_cmd(&mut reader).await;
                assert_eq!(pasv_line, "PASV");
                write_half.write_all(pasv_reply_for(&data_listener).await.as_bytes()).await.unwrap();

                let (mut data_sock, _) = data_listener.accept().await.unwrap();

                let retr_line = read_cmd(&mut reader).await;
                assert_eq!(retr_line, "RETR payload.bin");
                write_half.write_all(b"150 Opening data connection\r\n").await.unwrap();

                data_sock.write_all(&[0xABu8; 2048]).await.unwrap();
                data_sock.shutdown().await.unwrap();

                write_half.write_all(b"226 Transfer complete\r\n").await.unwrap();
            })
        }))
        .await;
    });

    let config = FtpConfig::builder()
        .host("127.0.0.1")
        .port(control_port)
        .user("tester")
        .password("pw")
        .timeout_ms(5_000)
        .build()
        .unwrap();

    let mut client = FtpClient::connect(config).await.unwrap();
    let mut sink = Vec::new();
    let bytes = client.download("payload.bin", &mut sink, 0).await.unwrap();
    assert_eq!(bytes, 2048);
    assert_eq!(sink.len(), 2048);
    assert!(sink.iter().all(|&b| b == 0xAB));

    server.await.unwrap();
}

#[tokio::test]
async fn bad_credentials_surface_as_auth_failed() {
    init_logging();
    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = control_listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (control, _) = control_listener.accept().await.unwrap();
        run_mock_control(control, false, |_control| Box::pin(async move {})).await;
    });

    let config = FtpConfig::builder()
        .host("127.0.0.1")
        .port(control_port)
        .user("tester")
        .password("wrong")
        .timeout_ms(5_000)
        .build()
        .unwrap();

    let err = FtpClient::connect(config).await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::AuthFailed);

    server.await.unwrap();
}
