use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::{
    Router,
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use rand::Rng;
use tokio::net::TcpListener;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Misbehaviour injected in front of the file, to exercise a downloader's error paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Delay before every response.
    pub delay: Duration,
    /// Percentage (0-100) of GET requests answered with `500 Internal Server Error`.
    pub failure_probability: u8,
}

impl Faults {
    fn roll_failure(&self) -> bool {
        match self.failure_probability {
            0 => false,
            p if p >= 100 => true,
            p => rand::rng().random_range(0..100u8) < p,
        }
    }
}

async fn inject_faults(State(faults): State<Faults>, request: Request, next: Next) -> Response {
    if !faults.delay.is_zero() {
        tokio::time::sleep(faults.delay).await;
    }

    if request.method() == Method::GET && faults.roll_failure() {
        warn!(uri = %request.uri(), "injecting failure");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    next.run(request).await
}

/// Router serving the file at `path` as `/<name>`.
///
/// `ServeFile` answers HEAD, advertises `Accept-Ranges: bytes` and handles single
/// byte ranges (206) and unsatisfiable ones (416).
pub fn build_app(name: &str, path: impl AsRef<Path>, faults: Faults) -> Router {
    Router::new()
        .route_service(&format!("/{}", name), ServeFile::new(path.as_ref()))
        .layer(middleware::from_fn_with_state(faults, inject_faults))
        .layer(TraceLayer::new_for_http())
}

pub struct ServeArgs {
    pub file: PathBuf,
    pub address: String,
    pub port: u16,
    pub faults: Faults,
}

pub async fn startup(args: ServeArgs) -> std::io::Result<()> {
    let name = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} does not name a file", args.file.display()),
            )
        })?;
    let len = tokio::fs::metadata(&args.file).await?.len();

    let app = build_app(&name, &args.file, args.faults);

    let addr = format!("{}:{}", args.address, args.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        bytes = len,
        delay = %humantime::format_duration(args.faults.delay),
        failure_probability = args.faults.failure_probability,
        "serving http://{}/{}",
        listener.local_addr()?,
        name
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
