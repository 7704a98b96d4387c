//! Session handshake through a running gateway.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use ktserve::auth::{self, SessionRpc, SessionStore};
use ktserve::cipher::derive_key;
use ktserve::config::{ServerConfig, StoreConfig};
use ktserve::gateway::{self, Gateway, GatewayState};
use ktserve::runner::NativeRunner;
use ktserve::transport;
use ktserve::value::Value;

const STOP: &str = "bye";
const APP: &str = "ledger";

async fn start(tmp: &TempDir) -> (u16, Arc<Gateway>) {
    let store_config = StoreConfig {
        home: tmp.path().join("home"),
        expiration_secs: 600,
        ..StoreConfig::default()
    };
    let store = Arc::new(SessionStore::initialize(&store_config).unwrap());
    store.put_user("eva", "pw-eva", "2").unwrap();

    let server_config = ServerConfig {
        root: tmp.path().to_path_buf(),
        stop_code: STOP.into(),
        timeout_ms: 5_000,
        app_name: APP.into(),
        ..ServerConfig::default()
    };
    let gateway = Arc::new(Gateway::new(
        server_config,
        Arc::new(SessionRpc::new(store, APP)),
        Arc::new(NativeRunner),
    ));
    let listener = transport::listen(0).await.unwrap();
    let port = listener.local_addr().port();
    let gw = Arc::clone(&gateway);
    tokio::spawn(async move { gw.serve(listener).await });
    while gateway.state() != GatewayState::Listening {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    (port, gateway)
}

async fn call(port: u16, payload: &str) -> String {
    let mut conn = transport::dial(&format!("127.0.0.1:{port}"), 5_000)
        .await
        .unwrap();
    conn.write(payload.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    loop {
        let chunk = conn.read(1_000_000).await.unwrap();
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    String::from_utf8(out).unwrap()
}

fn app_key() -> String {
    derive_key(APP, auth::KEY_LEN)
}

fn field(v: &Value, k: &str) -> String {
    v.get(k).unwrap().as_str().unwrap().to_string()
}

async fn authenticate(port: u16, user: &str, pass: &str) -> Value {
    let rq = auth::response(
        &app_key(),
        Value::object([
            ("rq", Value::from("authentication")),
            ("key", Value::from("client-request-key")),
            ("user", Value::from(user)),
            ("pass", Value::from(pass)),
            ("withExpiration", Value::Bool(true)),
        ]),
    );
    let rp = call(port, &format!(":{rq}")).await;
    auth::decode_response("client-request-key", &rp).unwrap()
}

#[tokio::test]
async fn full_session_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let (port, _gateway) = start(&tmp).await;

    let auth_rp = authenticate(port, "eva", "pw-eva").await;
    let session_id = field(&auth_rp, "sessionId");
    let com_key = field(&auth_rp, "key");
    assert_eq!(field(&auth_rp, "level"), "2");

    let connect = auth::response(
        &app_key(),
        Value::object([
            ("rq", Value::from("connect")),
            ("sessionId", Value::from(session_id.as_str())),
        ]),
    );
    let rp = call(port, &format!(":{connect}")).await;
    let rp = auth::decode_response(&com_key, &rp).unwrap();
    assert_eq!(field(&rp, "user"), "eva");
    let con_key = field(&rp, "conKey");

    let logout = auth::response(&com_key, Value::object([("rq", Value::from("logout"))]));
    let rp = call(port, &format!("{session_id}:{con_key}:{logout}")).await;
    assert_eq!(
        auth::decode_response(&com_key, &rp).unwrap(),
        Value::empty_object()
    );

    let rp = call(port, &format!("{session_id}:{logout}")).await;
    assert_eq!(rp, auth::expired_response());

    gateway::stop(port, STOP).await.unwrap();
}

#[tokio::test]
async fn wrong_password_gets_empty_fields() {
    let tmp = TempDir::new().unwrap();
    let (port, _gateway) = start(&tmp).await;

    let rp = authenticate(port, "eva", "nope").await;
    for k in ["sessionId", "key", "conKey", "level"] {
        assert_eq!(field(&rp, k), "");
    }
    gateway::stop(port, STOP).await.unwrap();
}

#[tokio::test]
async fn connect_without_session_id_is_answered_and_server_keeps_running() {
    let tmp = TempDir::new().unwrap();
    let (port, gateway) = start(&tmp).await;

    let rq = auth::response(&app_key(), Value::object([("rq", Value::from("connect"))]));
    let rp = call(port, &format!(":{rq}")).await;
    let rp = auth::decode_response(auth::NO_SESSION_KEY, &rp).unwrap();
    assert_eq!(field(&rp, "error"), "Bad request");

    assert_eq!(gateway.state(), GatewayState::Listening);
    let auth_rp = authenticate(port, "eva", "pw-eva").await;
    assert_eq!(field(&auth_rp, "level"), "2");
    gateway::stop(port, STOP).await.unwrap();
}

#[tokio::test]
async fn concurrent_logins_all_survive() {
    let tmp = TempDir::new().unwrap();
    let (port, _gateway) = start(&tmp).await;

    let a = tokio::spawn(async move { authenticate(port, "eva", "pw-eva").await });
    let b = tokio::spawn(async move {
        authenticate(port, "admin", ktserve::config::DEFAULT_KEY_SEED).await
    });
    let a = a.await.unwrap();
    let b = b.await.unwrap();
    assert_ne!(field(&a, "sessionId"), field(&b, "sessionId"));
    assert_eq!(field(&b, "level"), "0");

    let store = SessionStore::initialize(&StoreConfig {
        home: tmp.path().join("home"),
        ..StoreConfig::default()
    })
    .unwrap();
    for rp in [&a, &b] {
        let key = store.get_com_key(&field(rp, "sessionId"), "").unwrap();
        assert_eq!(key, Some(field(rp, "key")));
    }
    gateway::stop(port, STOP).await.unwrap();
}
