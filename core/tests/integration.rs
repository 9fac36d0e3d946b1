//! End-to-end broker tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives a `RequestBroker`
//! backed by the real `UreqTransport` over HTTP. Callbacks report through a
//! channel so each test can wait for delivery with a bound.

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use broker_core::adapter::decode_object;
use broker_core::{
    BrokerConfig, CookieJar, Issued, MemorySink, Payload, RequestBroker, SessionEtag, UreqTransport,
    NETWORK_ERROR_JSON,
};
use serde_json::json;

fn start_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

struct Harness {
    broker: RequestBroker,
    sink: Arc<MemorySink>,
    etag: Arc<SessionEtag>,
    config: BrokerConfig,
}

fn harness(addr: SocketAddr, timeout_secs: u64) -> Harness {
    let config = BrokerConfig {
        server_url: format!("http://{addr}/"),
        timeout_secs,
        ..BrokerConfig::default()
    };
    let sink = Arc::new(MemorySink::new());
    let etag = Arc::new(SessionEtag::new());
    let broker = RequestBroker::new(
        Arc::new(UreqTransport::new(&config)),
        Arc::new(CookieJar::new()),
        etag.clone(),
        sink.clone(),
    );
    Harness {
        broker,
        sink,
        etag,
        config,
    }
}

impl Harness {
    fn url(&self, path: &str) -> String {
        self.config.endpoint(path).unwrap()
    }

    fn get(&self, path: &str) -> (String, u16) {
        let (tx, rx) = mpsc::channel();
        self.broker
            .issue_get(&self.url(path), move |body, status| tx.send((body, status)).unwrap())
            .unwrap();
        wait(&rx)
    }

    fn post(&self, path: &str, payload: serde_json::Value, bypass: bool) -> (String, u16) {
        let payload: Payload = payload.as_object().cloned().unwrap();
        let (tx, rx) = mpsc::channel();
        self.broker
            .issue_post(
                &self.url(path),
                &payload,
                move |body, status| tx.send((body, status)).unwrap(),
                bypass,
            )
            .unwrap();
        wait(&rx)
    }
}

fn wait(rx: &Receiver<(String, u16)>) -> (String, u16) {
    rx.recv_timeout(Duration::from_secs(10)).expect("callback was not delivered")
}

#[test]
fn get_returns_backend_body() {
    let h = harness(start_server(), 5);
    let (body, status) = h.get("ping");
    assert_eq!(status, 200);
    assert_eq!(decode_object(&body).unwrap()["success"], true);
    assert_eq!(h.broker.in_flight(), 0);
}

#[test]
fn server_error_is_normalized_and_logged() {
    let h = harness(start_server(), 5);
    let (body, status) = h.get("status/500");
    assert_eq!(status, 500);
    assert_eq!(body, NETWORK_ERROR_JSON);

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 500);
    assert!(records[0].body.as_deref().unwrap().contains("status 500"));
    assert!(records[0].url.ends_with("/status/500"));
}

#[test]
fn not_found_keeps_its_status() {
    let h = harness(start_server(), 5);
    let (body, status) = h.get("no/such/route");
    assert_eq!((body.as_str(), status), (NETWORK_ERROR_JSON, 404));
}

#[test]
fn login_cookie_is_kept_for_later_requests() {
    let h = harness(start_server(), 5);
    let (_, status) = h.post("login", json!({"user": "ada"}), true);
    assert_eq!(status, 200);

    let cookie = h.broker.session_cookie("127.0.0.1", "session").expect("session cookie stored");
    assert!(!cookie.value.is_empty());

    let (body, status) = h.get("whoami");
    assert_eq!(status, 200);
    assert_eq!(decode_object(&body).unwrap()["user"], "ada");
}

#[test]
fn form_values_with_reserved_characters_arrive_intact() {
    let h = harness(start_server(), 5);
    let note = "a&b=c d+e";
    let (body, status) = h.post("echo", json!({"note": note, "count": 3}), true);
    assert_eq!(status, 200);
    let doc = decode_object(&body).unwrap();
    assert_eq!(doc["fields"]["note"], note);
    assert_eq!(doc["fields"]["count"], "3");
}

#[test]
fn stale_validation_token_is_rejected_by_backend() {
    let h = harness(start_server(), 5);

    let (body, status) = h.post("save", json!({"coins": 5}), false);
    assert_eq!(status, 200);
    let etag = decode_object(&body).unwrap()["etag"].as_str().unwrap().to_string();
    h.etag.set(etag);

    let (_, status) = h.post("save", json!({"coins": 6}), false);
    assert_eq!(status, 200);

    // The token still names the first revision.
    let (body, status) = h.post("save", json!({"coins": 7}), false);
    assert_eq!((body.as_str(), status), (NETWORK_ERROR_JSON, 412));

    // Bypassing validation sends no If-Match at all.
    let (_, status) = h.post("save", json!({"coins": 7}), true);
    assert_eq!(status, 412);
}

#[test]
fn transport_timeout_is_request_timeout() {
    let h = harness(start_server(), 1);
    let (body, status) = h.get("slow/3000");
    assert_eq!((body.as_str(), status), (NETWORK_ERROR_JSON, 408));
    assert!(h.sink.records().is_empty());
}

#[test]
fn unreachable_backend_is_request_timeout() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let h = harness(addr, 2);
    let (body, status) = h.get("ping");
    assert_eq!((body.as_str(), status), (NETWORK_ERROR_JSON, 408));
}

#[test]
fn short_circuit_answers_without_the_backend() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let h = harness(addr, 2);
    h.broker.set_short_circuit();

    let (tx, rx) = mpsc::channel();
    let issued = h
        .broker
        .issue_get(&h.url("ping"), move |body, status| tx.send((body, status)).unwrap())
        .unwrap();
    assert_eq!(issued, Issued::ShortCircuited);
    assert_eq!(rx.try_recv().unwrap(), (NETWORK_ERROR_JSON.to_string(), 503));
    assert_eq!(h.broker.in_flight(), 0);
}

#[test]
fn concurrent_requests_are_delivered_to_their_own_callbacks() {
    const N: usize = 16;
    let h = harness(start_server(), 10);
    let (tx, rx) = mpsc::channel();
    for i in 0..N {
        let tx = tx.clone();
        let payload = json!({"i": i}).as_object().cloned().unwrap();
        h.broker
            .issue_post(
                &h.url("echo"),
                &payload,
                move |body, status| tx.send((i, body, status)).unwrap(),
                true,
            )
            .unwrap();
    }
    drop(tx);

    let mut delivered = 0;
    while let Ok((i, body, status)) = rx.recv_timeout(Duration::from_secs(10)) {
        assert_eq!(status, 200);
        assert_eq!(decode_object(&body).unwrap()["fields"]["i"], i.to_string());
        delivered += 1;
    }
    assert_eq!(delivered, N);
    assert_eq!(h.broker.in_flight(), 0);
}
