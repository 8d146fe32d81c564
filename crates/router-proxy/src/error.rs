#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("binding listener")]
    Listen(#[source] std::io::Error),

    #[error("serving connections")]
    Serve(#[source] std::io::Error),

    #[error("drain timed out with requests still in flight")]
    DrainTimeout,
}
