//! Minimal HTTP/1.1 server for exercising the network paths in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

type Routes = HashMap<String, (u16, Vec<u8>)>;

pub struct TestServer {
    base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    last: Arc<Mutex<Option<String>>>,
}

impl TestServer {
    /// Serve fixed `(path, status, body)` routes; anything else is a 404.
    pub async fn start(routes: Vec<(&str, u16, Vec<u8>)>) -> TestServer {
        let routes: Arc<Routes> = Arc::new(
            routes
                .into_iter()
                .map(|(p, s, b)| (p.to_string(), (s, b)))
                .collect(),
        );
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let last = Arc::new(Mutex::new(None));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let (hits_srv, last_srv) = (Arc::clone(&hits), Arc::clone(&last));
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&hits_srv);
                let last = Arc::clone(&last_srv);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = sock.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&buf).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;
                    *last.lock().unwrap() = Some(request);

                    let (status, body) = routes
                        .get(&path)
                        .cloned()
                        .unwrap_or((404, b"not found".to_vec()));
                    let head = format!(
                        "HTTP/1.1 {} OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = sock.write_all(head.as_bytes()).await;
                    let _ = sock.write_all(&body).await;
                    let _ = sock.shutdown().await;
                });
            }
        });

        TestServer { base, hits, last }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn last_request(&self) -> Option<String> {
        self.last.lock().unwrap().clone()
    }
}
