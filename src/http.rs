//! HTTP API for the circle service
//!
//! Two logical routes from the product plus per-collection mutations:
//!
//! - `GET /` - always provisions a new circle and redirects to its edit URL
//! - `POST /circle` - provision, returning share URLs as JSON
//! - `GET /circle/{token}` - resolve a capability token (unknown tokens
//!   redirect back to provisioning; a shared link must never look dead)
//! - `GET /circle/{token}/ws` - live feed (WebSocket upgrade)
//! - `PUT /circle/{token}/position` - commit a marker position
//! - `POST/DELETE /circle/{token}/wishlist[/{id}[/toggle]]`
//! - `POST /circle/{token}/letters` - allowed for both token roles
//! - `POST/DELETE /circle/{token}/conditions[/{id}[/toggle]]`
//!
//! Mutations answer `{"applied": bool}`; a view token calling an edit-only
//! operation resolves as `applied: false` with 200, not an error.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::CircleError;
use crate::model::{AccessMode, Author};
use crate::repo::CircleRepository;
use crate::response;
use crate::ws;

/// HTTP server state
pub struct HttpServer {
    repo: Arc<CircleRepository>,
    bind_addr: SocketAddr,
    /// Origin used when deriving share URLs.
    public_origin: String,
}

#[derive(Debug, Deserialize)]
struct PositionBody {
    x: f64,
    y: f64,
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    text: String,
}

#[derive(Debug, Deserialize)]
struct LetterBody {
    author: Author,
    content: String,
    title: Option<String>,
}

impl HttpServer {
    pub fn new(repo: Arc<CircleRepository>, bind_addr: SocketAddr, public_origin: String) -> Self {
        Self {
            repo,
            bind_addr,
            public_origin,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), CircleError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener; tests bind an ephemeral port.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), CircleError> {
        info!(addr = %listener.local_addr()?, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let segments: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let segs: Vec<&str> = segments.iter().map(String::as_str).collect();

        let result = match (method, segs.as_slice()) {
            (Method::GET, ["health"]) => Ok(response::ok(&json!({ "status": "ok" }))),

            // Root route: always provision, never show an empty page
            (Method::GET, []) => self.handle_provision_redirect().await,

            (Method::POST, ["circle"]) => self.handle_provision().await,

            (Method::GET, ["circle", token]) => self.handle_resolve(token).await,

            (Method::GET, ["circle", token, "ws"]) => {
                return self.handle_feed(req, token).await;
            }

            (Method::PUT, ["circle", token, "position"]) => {
                let token = token.to_string();
                let body = read_body(req).await?;
                self.handle_position(&token, &body).await
            }

            (Method::POST, ["circle", token, "wishlist"]) => {
                let token = token.to_string();
                let body = read_body(req).await?;
                self.handle_add_text(&token, &body, Collection::Wishlist).await
            }
            (Method::DELETE, ["circle", token, "wishlist", item_id]) => {
                self.handle_remove(token, item_id, Collection::Wishlist).await
            }
            (Method::POST, ["circle", token, "wishlist", item_id, "toggle"]) => {
                self.handle_toggle(token, item_id, Collection::Wishlist).await
            }

            (Method::POST, ["circle", token, "letters"]) => {
                let token = token.to_string();
                let body = read_body(req).await?;
                self.handle_add_letter(&token, &body).await
            }

            (Method::POST, ["circle", token, "conditions"]) => {
                let token = token.to_string();
                let body = read_body(req).await?;
                self.handle_add_text(&token, &body, Collection::Conditions).await
            }
            (Method::DELETE, ["circle", token, "conditions", condition_id]) => {
                self.handle_remove(token, condition_id, Collection::Conditions)
                    .await
            }
            (Method::POST, ["circle", token, "conditions", condition_id, "toggle"]) => {
                self.handle_toggle(token, condition_id, Collection::Conditions)
                    .await
            }

            (_, ["circle", ..]) => Ok(response::method_not_allowed()),
            _ => Ok(response::not_found("No such route")),
        };

        match result {
            Ok(resp) => Ok(resp),
            Err(e) => {
                warn!(error = %e, path = %path, "Request failed");
                Ok(error_response(&e))
            }
        }
    }

    async fn handle_provision_redirect(&self) -> Result<Response<Full<Bytes>>, CircleError> {
        let circle = self.repo.create().await?;
        let urls = CircleRepository::share_urls(&circle, &self.public_origin);
        Ok(response::see_other(&urls.edit_url))
    }

    async fn handle_provision(&self) -> Result<Response<Full<Bytes>>, CircleError> {
        let circle = self.repo.create().await?;
        let urls = CircleRepository::share_urls(&circle, &self.public_origin);
        Ok(response::created(&json!({
            "id": circle.id,
            "edit_url": urls.edit_url,
            "view_url": urls.view_url,
        })))
    }

    async fn handle_resolve(&self, token: &str) -> Result<Response<Full<Bytes>>, CircleError> {
        match self.repo.get_by_token(token).await? {
            Some((circle, mode)) => {
                let share_urls = match mode {
                    AccessMode::Edit => {
                        Some(CircleRepository::share_urls(&circle, &self.public_origin))
                    }
                    AccessMode::View => None,
                };
                Ok(response::ok(&json!({
                    "mode": mode,
                    "circle": circle,
                    "share_urls": share_urls,
                })))
            }
            // Unknown token: redirect to provisioning, never a dead link
            None => Ok(response::see_other("/")),
        }
    }

    async fn handle_feed(
        &self,
        req: Request<Incoming>,
        token: &str,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        if !ws::is_websocket_upgrade(&req) {
            return Ok(response::bad_request("Expected WebSocket upgrade"));
        }

        match self.repo.get_by_token(token).await {
            Ok(Some((circle, mode))) => {
                Ok(ws::handle_feed_upgrade(req, self.repo.clone(), circle, mode))
            }
            Ok(None) => Ok(response::not_found("Unknown token")),
            Err(e) => {
                warn!(error = %e, "Token lookup failed for feed");
                Ok(error_response(&e))
            }
        }
    }

    async fn handle_position(
        &self,
        token: &str,
        body: &[u8],
    ) -> Result<Response<Full<Bytes>>, CircleError> {
        let position: PositionBody = match serde_json::from_slice(body) {
            Ok(p) => p,
            Err(e) => return Ok(response::bad_request(&e.to_string())),
        };

        let Some((circle, mode)) = self.repo.get_by_token(token).await? else {
            return Ok(response::not_found("Unknown token"));
        };
        if mode != AccessMode::Edit {
            return Ok(applied(false));
        }

        self.repo
            .update_position(&circle.id, position.x, position.y, position.note)
            .await?;
        Ok(applied(true))
    }

    async fn handle_add_text(
        &self,
        token: &str,
        body: &[u8],
        collection: Collection,
    ) -> Result<Response<Full<Bytes>>, CircleError> {
        let text: TextBody = match serde_json::from_slice(body) {
            Ok(t) => t,
            Err(e) => return Ok(response::bad_request(&e.to_string())),
        };

        let Some((circle, mode)) = self.repo.get_by_token(token).await? else {
            return Ok(response::not_found("Unknown token"));
        };
        if mode != AccessMode::Edit {
            return Ok(applied(false));
        }

        match collection {
            Collection::Wishlist => self.repo.add_birthday_item(&circle.id, text.text).await?,
            Collection::Conditions => self.repo.add_condition(&circle.id, text.text).await?,
        };
        Ok(applied(true))
    }

    async fn handle_remove(
        &self,
        token: &str,
        entry_id: &str,
        collection: Collection,
    ) -> Result<Response<Full<Bytes>>, CircleError> {
        let Some((circle, mode)) = self.repo.get_by_token(token).await? else {
            return Ok(response::not_found("Unknown token"));
        };
        if mode != AccessMode::Edit {
            return Ok(applied(false));
        }

        match collection {
            Collection::Wishlist => self.repo.remove_birthday_item(&circle.id, entry_id).await?,
            Collection::Conditions => self.repo.remove_condition(&circle.id, entry_id).await?,
        };
        Ok(applied(true))
    }

    async fn handle_toggle(
        &self,
        token: &str,
        entry_id: &str,
        collection: Collection,
    ) -> Result<Response<Full<Bytes>>, CircleError> {
        let Some((circle, mode)) = self.repo.get_by_token(token).await? else {
            return Ok(response::not_found("Unknown token"));
        };
        if mode != AccessMode::Edit {
            return Ok(applied(false));
        }

        match collection {
            Collection::Wishlist => self.repo.toggle_birthday_item(&circle.id, entry_id).await?,
            Collection::Conditions => self.repo.toggle_condition(&circle.id, entry_id).await?,
        };
        Ok(applied(true))
    }

    async fn handle_add_letter(
        &self,
        token: &str,
        body: &[u8],
    ) -> Result<Response<Full<Bytes>>, CircleError> {
        let letter: LetterBody = match serde_json::from_slice(body) {
            Ok(l) => l,
            Err(e) => return Ok(response::bad_request(&e.to_string())),
        };

        // Both token roles may leave a letter
        let Some((circle, _mode)) = self.repo.get_by_token(token).await? else {
            return Ok(response::not_found("Unknown token"));
        };

        self.repo
            .add_letter(&circle.id, letter.author, letter.content, letter.title)
            .await?;
        Ok(applied(true))
    }
}

#[derive(Debug, Clone, Copy)]
enum Collection {
    Wishlist,
    Conditions,
}

fn applied(applied: bool) -> Response<Full<Bytes>> {
    response::ok(&json!({ "applied": applied }))
}

fn error_response(e: &CircleError) -> Response<Full<Bytes>> {
    match e {
        CircleError::NotFound(_) => response::not_found(&e.to_string()),
        _ => response::internal_error(&e.to_string()),
    }
}

async fn read_body(req: Request<Incoming>) -> Result<Vec<u8>, hyper::Error> {
    Ok(req.collect().await?.to_bytes().to_vec())
}
