//! The HTTP entry point: routes `GET`/`POST` requests under `req_path`
//! to the polling or WebSocket transport, as a [`tower::Service`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Method, Request, Response, StatusCode};
use hyper::Body;
use tower::Service;

use crate::engine::EngineIo;
use crate::errors::Error;
use crate::handler::EngineIoHandler;
use crate::sid::Sid;
use crate::transport::{polling, ws, TransportType};

/// A `tower::Service<http::Request<hyper::Body>>` that serves the
/// Engine.IO protocol at `config.req_path`.
pub struct EngineIoService<H: EngineIoHandler> {
    engine: Arc<EngineIo<H>>,
}

impl<H: EngineIoHandler> Clone for EngineIoService<H> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<H: EngineIoHandler> EngineIoService<H> {
    pub fn new(engine: Arc<EngineIo<H>>) -> Self {
        Self { engine }
    }

    fn matches_path(&self, path: &str) -> bool {
        path.trim_end_matches('/') == self.engine.config.req_path.trim_end_matches('/')
    }
}

impl<H: EngineIoHandler> Service<Request<Body>> for EngineIoService<H> {
    type Response = Response<Body>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let engine = self.engine.clone();
        if !self.matches_path(req.uri().path()) {
            return Box::pin(async move {
                Ok(error_response(StatusCode::NOT_FOUND, "not found"))
            });
        }
        Box::pin(async move { Ok(route(engine, req).await) })
    }
}

async fn route<H: EngineIoHandler>(engine: Arc<EngineIo<H>>, req: Request<Body>) -> Response<Body> {
    let query = parse_query(req.uri().query().unwrap_or(""));

    if query.get("EIO").map(String::as_str) != Some("4") {
        return error_response(StatusCode::BAD_REQUEST, "unsupported or missing EIO version");
    }
    let Some(transport) = query.get("transport").and_then(|t| TransportType::from_query_str(t)) else {
        return error_response(StatusCode::BAD_REQUEST, "unsupported or missing transport");
    };
    let sid = match query.get("sid") {
        Some(s) => match s.parse::<Sid>() {
            Ok(sid) => Some(sid),
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "malformed sid"),
        },
        None => None,
    };

    let result = match (req.method(), transport, sid) {
        (&Method::GET, TransportType::Polling, None) => polling::open_req(engine).await,
        (&Method::GET, TransportType::Polling, Some(sid)) => polling::polling_req(engine, sid).await,
        (&Method::POST, TransportType::Polling, Some(sid)) => polling::post_req(engine, sid, req).await,
        (&Method::GET, TransportType::Websocket, sid) => ws::new_req(engine, sid, req),
        _ => Err(Error::MethodNotAllowed),
    };

    match result {
        Ok(response) => response,
        Err(e) => error_response(e.status_code(), &e.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=UTF-8")
        .body(Body::from(message.to_string()))
        .expect("static response parts are always valid")
}

/// Minimal `application/x-www-form-urlencoded`-style query string parser.
/// Values are percent-decoded; keys are not (the protocol's own keys and
/// values never require it beyond what's handled here).
fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.to_string();
            let value = percent_decode(parts.next().unwrap_or(""));
            Some((key, value))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_decodes_percent_and_plus() {
        let q = parse_query("EIO=4&transport=polling&name=a%20b+c");
        assert_eq!(q.get("EIO").unwrap(), "4");
        assert_eq!(q.get("transport").unwrap(), "polling");
        assert_eq!(q.get("name").unwrap(), "a b c");
    }

    #[test]
    fn parse_query_handles_empty_string() {
        assert!(parse_query("").is_empty());
    }
}
