use std::convert::Infallible;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri as HyperUri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use router_core::Uri;
use router_registry::Registry;
use tracing::warn;

use crate::access_log::{response_time_ms, AccessLogRecord, AccessLogger};
use crate::varz::SharedVarz;

pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn empty_body() -> ResponseBody {
    Full::new(Bytes::new())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn dynamic_body(text: String) -> ResponseBody {
    Full::new(Bytes::from(text))
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn dynamic_bytes(bytes: Bytes) -> ResponseBody {
    Full::new(bytes).map_err(|never: Infallible| match never {}).boxed()
}

#[derive(Debug, thiserror::Error)]
enum ForwardError {
    #[error("endpoint address did not form a valid request uri")]
    InvalidEndpointUri,
    #[error("endpoint timed out")]
    Timeout,
    #[error("transport error talking to endpoint")]
    Transport(#[source] hyper_util::client::legacy::Error),
    #[error("failed reading endpoint response body")]
    ResponseBody(#[source] hyper::Error),
}

/// Matches the inbound host to a pool, picks an endpoint, forwards the
/// request, and copies the response back, with one retry on a
/// transport-level failure.
pub struct Dispatcher {
    registry: Arc<Registry>,
    varz: SharedVarz,
    access_log: AccessLogger,
    client: Client<HttpConnector, ResponseBody>,
    trace_key: String,
    router_ip: String,
    endpoint_timeout: Duration,
    in_flight: Arc<AtomicI64>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        varz: SharedVarz,
        access_log: AccessLogger,
        trace_key: String,
        router_ip: String,
        endpoint_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            varz,
            access_log,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            trace_key,
            router_ip,
            endpoint_timeout,
            in_flight: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn in_flight_count(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn dispatch<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let started = Instant::now();
        self.varz.record_request();

        let method = req.method().to_string();
        let host_header = req
            .headers()
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let path = req.uri().path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_default();
        let trace_requested = self.trace_requested(&req);

        let uri = Uri::new(&host_header);
        let (response, bytes) = match self.registry.snapshot().lookup(&uri) {
            None => {
                self.varz.record_bad_request();
                self.not_found(&host_header)
            }
            Some(pool) => self.forward(req, pool, trace_requested).await,
        };

        let status = response.status().as_u16();
        self.varz.record_status(status);
        self.access_log.log(AccessLogRecord {
            method,
            uri: format!("{host_header}{path}"),
            status,
            response_time_ms: response_time_ms(started.elapsed()),
            endpoint: response
                .headers()
                .get("x-router-endpoint")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
            bytes,
        });

        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        response
    }

    fn trace_requested<B>(&self, req: &Request<B>) -> bool {
        if self.trace_key.is_empty() {
            return false;
        }
        req.headers()
            .get("x-vcap-trace")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == self.trace_key)
    }

    async fn forward<B>(
        &self,
        req: Request<B>,
        pool: Arc<router_core::EndpointPool>,
        trace_requested: bool,
    ) -> (Response<ResponseBody>, u64)
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        if pool.is_empty() {
            self.varz.record_backend_failure();
            return self.bad_gateway();
        }

        let (parts, body) = req.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(%err, "failed reading request body");
                return self.bad_gateway();
            }
        };

        for attempt in 0..2u8 {
            let Some(endpoint) = pool.pick() else {
                break;
            };
            let addr = endpoint.canonical_addr().to_string();

            match self.send_once(&parts, body_bytes.clone(), &addr).await {
                Ok((mut response, bytes)) => {
                    if trace_requested {
                        self.add_trace_headers(&mut response, &addr);
                    }
                    return (response, bytes);
                }
                Err(err) => warn!(%err, addr, attempt, "backend request failed"),
            }
        }

        self.varz.record_backend_failure();
        self.bad_gateway()
    }

    async fn send_once(
        &self,
        parts: &hyper::http::request::Parts,
        body: Bytes,
        addr: &str,
    ) -> Result<(Response<ResponseBody>, u64), ForwardError> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: HyperUri = format!("http://{addr}{path_and_query}")
            .parse()
            .map_err(|_| ForwardError::InvalidEndpointUri)?;

        let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
        for (name, value) in parts.headers.iter() {
            builder = builder.header(name, value);
        }
        let outgoing = builder
            .body(Full::new(body).map_err(|never: Infallible| match never {}).boxed())
            .expect("request built from valid parts is always valid");

        let response = tokio::time::timeout(self.endpoint_timeout, self.client.request(outgoing))
            .await
            .map_err(|_| ForwardError::Timeout)?
            .map_err(ForwardError::Transport)?;

        let (parts, body) = response.into_parts();
        let body_bytes = body.collect().await.map_err(ForwardError::ResponseBody)?.to_bytes();
        let bytes = body_bytes.len() as u64;
        Ok((Response::from_parts(parts, dynamic_bytes(body_bytes)), bytes))
    }

    fn add_trace_headers(&self, response: &mut Response<ResponseBody>, addr: &str) {
        if let Ok(value) = HeaderValue::from_str(addr) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-router-endpoint"), value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.router_ip) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-router-instance"), value);
        }
    }

    fn not_found(&self, host: &str) -> (Response<ResponseBody>, u64) {
        let text = format!("404 Not Found: Requested route ('{host}') does not exist.\n");
        let bytes = text.len() as u64;
        let response = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(dynamic_body(text))
            .expect("static response is always valid");
        (response, bytes)
    }

    fn bad_gateway(&self) -> (Response<ResponseBody>, u64) {
        let response = Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(empty_body())
            .expect("static response is always valid");
        (response, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_core::{Endpoint, EndpointPool, Snapshot};
    use std::time::Duration as StdDuration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn dispatcher_with(registry: Registry, trace_key: &str) -> Dispatcher {
        Dispatcher::new(
            Arc::new(registry),
            Arc::new(crate::varz::Varz::new()),
            AccessLogger::disabled(),
            trace_key.to_string(),
            "10.10.10.10".to_string(),
            StdDuration::from_secs(2),
        )
    }

    fn request_to(host: &str, trace: Option<&str>) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().method("GET").uri("/").header("host", host);
        if let Some(trace) = trace {
            builder = builder.header("x-vcap-trace", trace);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    /// Spawns a one-shot backend that replies to a single connection with a
    /// fixed HTTP/1.1 response, returning the address it bound to.
    async fn spawn_backend(body: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
        addr
    }

    #[tokio::test]
    async fn unmatched_host_is_404() {
        let dispatcher = dispatcher_with(Registry::new(), "");
        let resp = dispatcher.dispatch(request_to("nowhere.example.com", None)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_pool_is_502() {
        let mut builder = Snapshot::builder();
        builder.pool_mut(router_core::Uri::new("app.example.com"), || {
            EndpointPool::new(StdDuration::from_secs(1))
        });
        let registry = Registry::with_snapshot(builder.build(), 1);

        let dispatcher = dispatcher_with(registry, "");
        let resp = dispatcher.dispatch(request_to("app.example.com", None)).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn forwards_to_backend_and_adds_trace_headers_when_requested() {
        let backend_addr = spawn_backend("hello").await;

        let mut builder = Snapshot::builder();
        {
            let pool = builder.pool_mut(router_core::Uri::new("app.example.com"), || {
                EndpointPool::new(StdDuration::from_secs(1))
            });
            pool.put(Endpoint::new(backend_addr.ip().to_string(), backend_addr.port() as u32, None).unwrap());
        }
        let registry = Registry::with_snapshot(builder.build(), 1);

        let dispatcher = dispatcher_with(registry, "letmein");
        let resp = dispatcher
            .dispatch(request_to("app.example.com", Some("letmein")))
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("x-router-endpoint").unwrap().to_str().unwrap(),
            backend_addr.to_string()
        );
        assert_eq!(
            resp.headers().get("x-router-instance").unwrap().to_str().unwrap(),
            "10.10.10.10"
        );
    }

    #[tokio::test]
    async fn access_log_records_actual_response_body_size() {
        let backend_addr = spawn_backend("hello").await;

        let mut builder = Snapshot::builder();
        {
            let pool = builder.pool_mut(router_core::Uri::new("app.example.com"), || {
                EndpointPool::new(StdDuration::from_secs(1))
            });
            pool.put(Endpoint::new(backend_addr.ip().to_string(), backend_addr.port() as u32, None).unwrap());
        }
        let registry = Registry::with_snapshot(builder.build(), 1);

        let dir = std::env::temp_dir().join(format!("router-proxy-dispatcher-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("access.log");
        let (access_log, handle) = AccessLogger::spawn_to_file(path.to_str().unwrap());

        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(crate::varz::Varz::new()),
            access_log.clone(),
            String::new(),
            "10.10.10.10".to_string(),
            StdDuration::from_secs(2),
        );
        dispatcher.dispatch(request_to("app.example.com", None)).await;

        drop(access_log);
        drop(dispatcher);
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let record: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(record["bytes"], 5);
    }

    #[tokio::test]
    async fn trace_headers_omitted_without_matching_trace_key() {
        let backend_addr = spawn_backend("hello").await;

        let mut builder = Snapshot::builder();
        {
            let pool = builder.pool_mut(router_core::Uri::new("app.example.com"), || {
                EndpointPool::new(StdDuration::from_secs(1))
            });
            pool.put(Endpoint::new(backend_addr.ip().to_string(), backend_addr.port() as u32, None).unwrap());
        }
        let registry = Registry::with_snapshot(builder.build(), 1);

        let dispatcher = dispatcher_with(registry, "letmein");
        let resp = dispatcher.dispatch(request_to("app.example.com", None)).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get("x-router-endpoint").is_none());
    }
}
