use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use subtle::ConstantTimeEq;
use tokio::sync::oneshot;
use warp::http::{HeaderValue, Response, StatusCode};
use warp::hyper::Body;
use warp::{Filter, Rejection, Reply};

use router_registry::Registry;

use crate::varz::SharedVarz;

#[derive(Clone)]
struct BasicAuthCredentials {
    user: String,
    pass: String,
}

impl BasicAuthCredentials {
    fn required(&self) -> bool {
        !self.user.is_empty() || !self.pass.is_empty()
    }

    /// Constant-time credential check, mirroring the original router's
    /// "both empty disables auth" behavior for the diagnostic listener.
    fn authenticates(&self, header: Option<&str>) -> bool {
        if !self.required() {
            return true;
        }
        let Some(header) = header else { return false };
        let Some((scheme, param)) = header.split_once(' ') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }
        let Ok(decoded) = BASE64.decode(param.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, pass)) = decoded.split_once(':') else {
            return false;
        };
        bool::from(user.as_bytes().ct_eq(self.user.as_bytes()))
            && bool::from(pass.as_bytes().ct_eq(self.pass.as_bytes()))
    }
}

/// The `/varz`, `/healthz`, `/routes` HTTP listener, guarded by HTTP Basic
/// authentication when `status.user`/`status.pass` are configured.
pub struct Diagnostics {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Diagnostics {
    pub async fn start(
        bind_addr: SocketAddr,
        registry: Arc<Registry>,
        varz: SharedVarz,
        started_at: Instant,
        user: String,
        pass: String,
    ) -> Result<Self, std::io::Error> {
        let creds = Arc::new(BasicAuthCredentials { user, pass });

        let healthz = warp::path("healthz")
            .and(warp::get())
            .and(with_auth(creds.clone()))
            .map(|| warp::reply::with_status("ok", StatusCode::OK));

        let varz_route = {
            let registry = registry.clone();
            let varz = varz.clone();
            warp::path("varz")
                .and(warp::get())
                .and(with_auth(creds.clone()))
                .map(move || warp::reply::json(&varz.snapshot(&registry, started_at)))
        };

        let routes_route = {
            let registry = registry.clone();
            warp::path("routes")
                .and(warp::get())
                .and(with_auth(creds))
                .map(move || {
                    let snapshot = registry.snapshot();
                    warp::reply::json(&snapshot.to_routes_json())
                })
        };

        let app = healthz
            .or(varz_route)
            .or(routes_route)
            .recover(handle_unauthorized);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (_addr, server) = warp::serve(app).try_bind_with_graceful_shutdown(bind_addr, async {
            let _ = shutdown_rx.await;
        })?;

        let handle = tokio::spawn(server);

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stops accepting new diagnostic connections. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[derive(Debug)]
struct Unauthorized;
impl warp::reject::Reject for Unauthorized {}

fn with_auth(
    creds: Arc<BasicAuthCredentials>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let creds = creds.clone();
            async move {
                if creds.authenticates(header.as_deref()) {
                    Ok(())
                } else {
                    Err(warp::reject::custom(Unauthorized))
                }
            }
        })
        .untuple_one()
}

async fn handle_unauthorized(err: Rejection) -> Result<impl Reply, Infallible> {
    if err.find::<Unauthorized>().is_some() {
        let mut response = Response::new(Body::from("401 Unauthorized"));
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        response.headers_mut().insert(
            warp::http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"router\""),
        );
        return Ok(response);
    }
    let mut response = Response::new(Body::from("Not Found"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    Ok(response)
}
