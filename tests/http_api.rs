//! End-to-end tests against the HTTP API on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use standing_circle::model::AccessMode;
use standing_circle::store::MemoryStore;
use standing_circle::zone::Zone;
use standing_circle::{CircleRepository, HttpServer, RepositoryConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

async fn start_server() -> (Arc<CircleRepository>, SocketAddr) {
    let store = Arc::new(MemoryStore::new());
    let repo = Arc::new(CircleRepository::new(store, RepositoryConfig::default()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(HttpServer::new(
        Arc::clone(&repo),
        addr,
        format!("http://{addr}"),
    ));
    tokio::spawn(server.serve(listener));

    (repo, addr)
}

/// One request over a fresh connection. Returns status, Location header,
/// and the body parsed as JSON (Null when the body is empty).
async fn request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Option<String>, Value) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let payload = body.map(|b| b.to_string()).unwrap_or_default();
    let req = Request::builder()
        .method(method)
        .uri(path)
        .header("host", addr.to_string())
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .unwrap();

    let resp = sender.send_request(req).await.unwrap();
    let status = resp.status();
    let location = resp
        .headers()
        .get("location")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let parsed = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, location, parsed)
}

async fn next_feed_message(
    ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("feed went silent")
        .expect("feed closed")
        .expect("feed errored");
    match frame {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    }
}

fn last_path_segment(url: &str) -> String {
    url.rsplit('/').next().unwrap().to_string()
}

#[tokio::test]
async fn unknown_token_redirects_instead_of_dead_ending() {
    let (_repo, addr) = start_server().await;

    let (status, location, _) = request(addr, "GET", "/circle/view-doesnotexist", None).await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/"));
}

#[tokio::test]
async fn root_provisions_a_circle_and_redirects_to_its_edit_url() {
    let (repo, addr) = start_server().await;

    let (status, location, _) = request(addr, "GET", "/", None).await;

    assert_eq!(status, StatusCode::SEE_OTHER);
    let location = location.unwrap();
    let prefix = format!("http://{addr}/circle/edit-");
    assert!(location.starts_with(&prefix), "unexpected redirect {location}");

    // The URL it hands out must resolve to a real editable circle
    let token = last_path_segment(&location);
    let (circle, mode) = repo.get_by_token(&token).await.unwrap().unwrap();
    assert_eq!(mode, AccessMode::Edit);
    assert_eq!(circle.current_position.zone, Zone::Edge);
}

#[tokio::test]
async fn view_token_mutations_answer_applied_false_except_letters() {
    let (repo, addr) = start_server().await;

    let (status, _, created) = request(addr, "POST", "/circle", None).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    let view_token = last_path_segment(created["view_url"].as_str().unwrap());

    let (status, _, reply) = request(
        addr,
        "PUT",
        &format!("/circle/{view_token}/position"),
        Some(json!({ "x": 50.0, "y": 50.0, "note": "nudge" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["applied"], Value::Bool(false));

    let (status, _, reply) = request(
        addr,
        "POST",
        &format!("/circle/{view_token}/wishlist"),
        Some(json!({ "text": "a new mug" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["applied"], Value::Bool(false));

    let circle = repo.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(circle.position_history.len(), 1);
    assert!(circle.birthday_list.is_empty());

    // Letters are the one mutation open to both token roles
    let (status, _, reply) = request(
        addr,
        "POST",
        &format!("/circle/{view_token}/letters"),
        Some(json!({ "author": "recipient", "content": "thinking of you" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["applied"], Value::Bool(true));

    let circle = repo.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(circle.letters.len(), 1);
}

#[tokio::test]
async fn edit_token_position_update_applies() {
    let (repo, addr) = start_server().await;
    let circle = repo.create().await.unwrap();

    let (status, _, reply) = request(
        addr,
        "PUT",
        &format!("/circle/{}/position", circle.edit_token),
        Some(json!({ "x": 50.0, "y": 50.0, "note": "back in" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["applied"], Value::Bool(true));

    let latest = repo.get_by_id(&circle.id).await.unwrap().unwrap();
    assert_eq!(latest.current_position.zone, Zone::Center);
    assert_eq!(latest.position_history.len(), 2);
}

#[tokio::test]
async fn feed_sends_full_state_then_pushes_not_heartbeats() {
    let (repo, addr) = start_server().await;
    let circle = repo.create().await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let url = format!("ws://{addr}/circle/{}/ws", circle.edit_token);
    let (mut ws, _resp) = tokio_tungstenite::client_async(url, stream).await.unwrap();

    let first = next_feed_message(&mut ws).await;
    assert_eq!(first["type"], "circle");
    assert_eq!(first["mode"], "edit");
    assert_eq!(first["circle"]["id"].as_str(), Some(circle.id.as_str()));

    repo.update_position(&circle.id, 10.0, 10.0, Some("pushed".to_string()))
        .await
        .unwrap();

    // The write must arrive as the very next frame: no heartbeat slips in
    // between the initial state and the first push
    let second = next_feed_message(&mut ws).await;
    assert_eq!(second["type"], "circle");
    assert_eq!(
        second["circle"]["current_position"]["note"].as_str(),
        Some("pushed")
    );
}
