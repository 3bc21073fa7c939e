//! Local HTTP server for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;

use tiny_http::{Header, Response, Server};

pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn html(body: &str) -> Self {
        Reply {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn status(status: u16) -> Self {
        Reply {
            status,
            content_type: "text/plain",
            body: Vec::new(),
        }
    }
}

pub struct TestServer {
    pub base: String,
    hits: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    /// Paths requested so far, in order.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    pub fn clear_hits(&self) {
        self.hits.lock().unwrap().clear();
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Serve `handler` on an ephemeral 127.0.0.1 port from a background thread.
pub fn serve<F>(handler: F) -> TestServer
where
    F: Fn(&str) -> Reply + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&hits);
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let path = request.url().to_string();
            recorded.lock().unwrap().push(path.clone());
            let reply = handler(&path);
            let header = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()).unwrap();
            let response = Response::from_data(reply.body)
                .with_status_code(reply.status)
                .with_header(header);
            let _ = request.respond(response);
        }
    });
    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        hits,
    }
}
