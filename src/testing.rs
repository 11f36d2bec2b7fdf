use axum::Router;
use reqwest::{Client, Url};
use tempfile::TempDir;
use tokio::net::TcpListener;

use crate::server::{Faults, build_app};

/// Serves `app` on an ephemeral local port and returns its base URL.
pub(crate) async fn start_mock_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{}/", addr)).unwrap()
}

/// A file written to a temporary directory and served by [`build_app`].
pub(crate) struct ServedFile {
    pub url: Url,
    _dir: TempDir,
}

pub(crate) async fn serve_bytes(name: &str, contents: &[u8], faults: Faults) -> ServedFile {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();

    let base = start_mock_server(build_app(name, &path, faults)).await;
    ServedFile {
        url: base.join(name).unwrap(),
        _dir: dir,
    }
}

/// A client that never routes loopback traffic through an environment proxy.
pub(crate) fn client() -> Client {
    Client::builder().no_proxy().build().unwrap()
}
