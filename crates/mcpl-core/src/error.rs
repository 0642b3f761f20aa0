/// Error taxonomy for launch operations.
///
/// Recoverable kinds (inspection, tunnel) are captured into per-server or
/// per-instance diagnostics; fatal-to-instance kinds skip that instance and
/// let the rest of the run continue.
#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("config error: {0}")]
    Config(String),

    #[error("init read: deadline exceeded")]
    InitTimeout,

    #[error("initialize failed: {0}")]
    InitializeFailed(String),

    #[error("tools/list failed: {0}")]
    ToolsList(String),

    #[error("fetching {url} returned {status}: {body}")]
    Fetch {
        url: String,
        status: u16,
        body: String,
    },

    #[error("gateway on port {port} not ready within {timeout_secs}s")]
    Readiness { port: u16, timeout_secs: u64 },

    #[error("tunnel URL not captured within {0}s")]
    TunnelTimeout(u64),

    #[error("shutdown step failed: {0}")]
    Shutdown(String),
}

impl LaunchError {
    /// True for kinds that only degrade one server or one instance.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InitTimeout
                | Self::InitializeFailed(_)
                | Self::ToolsList(_)
                | Self::TunnelTimeout(_)
                | Self::Shutdown(_)
        )
    }
}
