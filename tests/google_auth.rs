//! Google token exchange against a local one-shot HTTP server

use firebase_bridge::config::{self, ConfigSource};
use firebase_bridge::{
    AuthProvider, ConnectionConfig, ConnectionManager, FirestoreStore, GoogleAuthProvider, Phase,
    ProviderError, ServiceAccountCredential, Settings,
};
use secrecy::ExposeSecret;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const TEST_KEY: &str = include_str!("fixtures/service_account_key.pem");

fn pairs() -> Vec<(&'static str, String)> {
    vec![
        (config::PROJECT_ID, "trading-bot".to_string()),
        (config::PRIVATE_KEY_ID, "key-1".to_string()),
        // as it would appear in a .env file
        (config::PRIVATE_KEY, TEST_KEY.replace('\n', "\\n")),
        (
            config::CLIENT_EMAIL,
            "bot@trading-bot.iam.gserviceaccount.com".to_string(),
        ),
        (config::CLIENT_ID, "1098765432".to_string()),
        (
            config::CLIENT_X509_CERT_URL,
            "https://www.googleapis.com/robot/v1/metadata/x509/bot".to_string(),
        ),
    ]
}

fn credential() -> ServiceAccountCredential {
    let config = ConnectionConfig::load(&ConfigSource::from_pairs(pairs())).unwrap();
    ServiceAccountCredential::from_config(&config).unwrap()
}

fn http() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Accept one request, answer with `status` and `body`, return the raw request.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let (url, handle) = serve_sequence(vec![(status, body)]).await;
    let handle = tokio::spawn(async move { handle.await.unwrap().remove(0) });
    (url, handle)
}

/// Answer one request per entry, in order, and return the raw requests.
async fn serve_sequence(
    responses: Vec<(&'static str, &'static str)>,
) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        requests
    });

    (format!("http://{addr}/token"), handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn successful_exchange_yields_session() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"access_token":"ya29.live","expires_in":3599,"token_type":"Bearer"}"#,
    )
    .await;
    let provider = GoogleAuthProvider::new(http()).with_token_uri(url);

    let session = provider.authenticate(&credential()).await.unwrap();
    assert_eq!(session.project_id, "trading-bot");
    assert_eq!(session.access_token().expose_secret(), "ya29.live");
    assert!(!session.is_expired());

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /token"));
    assert!(request.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"));
    assert!(request.contains("assertion="));
}

#[tokio::test]
async fn client_error_is_rejection_with_description() {
    let (url, _server) = serve_once(
        "400 Bad Request",
        r#"{"error":"invalid_grant","error_description":"Invalid JWT Signature."}"#,
    )
    .await;
    let provider = GoogleAuthProvider::new(http()).with_token_uri(url);

    let err = provider.authenticate(&credential()).await.unwrap_err();
    assert_eq!(err, ProviderError::Rejected("Invalid JWT Signature.".into()));
}

#[tokio::test]
async fn server_error_is_transport_failure() {
    let (url, _server) = serve_once("503 Service Unavailable", "{}").await;
    let provider = GoogleAuthProvider::new(http()).with_token_uri(url);

    let err = provider.authenticate(&credential()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport(_)), "{err}");
}

#[tokio::test]
async fn garbage_body_is_other_failure() {
    let (url, _server) = serve_once("200 OK", "not json").await;
    let provider = GoogleAuthProvider::new(http()).with_token_uri(url);

    let err = provider.authenticate(&credential()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Other(_)), "{err}");
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = GoogleAuthProvider::new(http()).with_token_uri(format!("http://{addr}/token"));
    let err = provider.authenticate(&credential()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport(_)), "{err}");
}

#[tokio::test]
async fn manager_connects_end_to_end() {
    let (url, _server) = serve_once(
        "200 OK",
        r#"{"access_token":"ya29.e2e","expires_in":3600,"token_type":"Bearer"}"#,
    )
    .await;
    let http = http();
    let manager = ConnectionManager::new(
        ConfigSource::from_pairs(pairs()),
        Settings::default(),
        GoogleAuthProvider::new(http.clone()).with_token_uri(url),
        FirestoreStore::new(http, "(default)"),
    );

    let client = manager.connection().await.unwrap();
    assert_eq!(
        client.base_url(),
        "https://firestore.googleapis.com/v1/projects/trading-bot/databases/(default)/documents"
    );
    let session = client.session().await.unwrap();
    assert_eq!(session.access_token().expose_secret(), "ya29.e2e");
}

#[tokio::test]
async fn short_lived_token_is_replaced_on_next_request() {
    let (url, server) = serve_sequence(vec![
        (
            "200 OK",
            r#"{"access_token":"ya29.first","expires_in":5,"token_type":"Bearer"}"#,
        ),
        (
            "200 OK",
            r#"{"access_token":"ya29.second","expires_in":3600,"token_type":"Bearer"}"#,
        ),
    ])
    .await;
    let http = http();
    let manager = ConnectionManager::new(
        ConfigSource::from_pairs(pairs()),
        Settings::default(),
        GoogleAuthProvider::new(http.clone()).with_token_uri(url),
        FirestoreStore::new(http, "(default)"),
    );

    let client = manager.connection().await.unwrap();
    let request = client
        .request(reqwest::Method::GET, "trades")
        .await
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(
        request.headers()["authorization"].to_str().unwrap(),
        "Bearer ya29.second"
    );

    // the refreshed token is long-lived, so it is reused
    let again = client.session().await.unwrap();
    assert_eq!(again.access_token().expose_secret(), "ya29.second");

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.starts_with("POST /token")));
}

#[tokio::test]
async fn manager_reports_rejection_as_authentication_phase() {
    let (url, _server) = serve_once(
        "401 Unauthorized",
        r#"{"error":"unauthorized_client"}"#,
    )
    .await;
    let http = http();
    let manager = ConnectionManager::new(
        ConfigSource::from_pairs(pairs()),
        Settings::default(),
        GoogleAuthProvider::new(http.clone()).with_token_uri(url),
        FirestoreStore::new(http, "(default)"),
    );

    let err = manager.initialize().await.unwrap_err();
    assert_eq!(err.phase(), Phase::Authentication);
    assert!(err.cause().contains("unauthorized_client"));
}
