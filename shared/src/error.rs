use thiserror::Error;

use crate::network::Network;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MainError {
    #[error("Invalid configuration")]
    Config,
    #[error("RPC error")]
    RpcError,
    #[error("Can't persist state to disk")]
    Storage,
    #[error("Failed to join async task")]
    TaskJoinError,
}

pub trait AsRpcError<T> {
    fn into_rpc_error(self) -> Result<T, MainError>;
}

impl<T> AsRpcError<T> for anyhow::Result<T> {
    #[inline]
    fn into_rpc_error(self) -> Result<T, MainError> {
        self.map_err(|reason| {
            tracing::error!(?reason, "RPC error");
            MainError::RpcError
        })
    }
}

pub trait AsStorageError<T> {
    fn into_storage_error(self) -> Result<T, MainError>;
}

impl<T> AsStorageError<T> for anyhow::Result<T> {
    #[inline]
    fn into_storage_error(self) -> Result<T, MainError> {
        self.map_err(|reason| {
            tracing::error!(?reason, "Storage error");
            MainError::Storage
        })
    }
}

pub trait AsConfigError<T> {
    fn into_config_error(self) -> Result<T, MainError>;
}

impl<T> AsConfigError<T> for anyhow::Result<T> {
    #[inline]
    fn into_config_error(self) -> Result<T, MainError> {
        self.map_err(|reason| {
            tracing::error!(?reason, "Configuration error");
            MainError::Config
        })
    }
}

pub trait AsTaskJoinError<T> {
    fn into_task_join_error(self) -> Result<T, MainError>;
}

impl<T> AsTaskJoinError<T> for anyhow::Result<T> {
    #[inline]
    fn into_task_join_error(self) -> Result<T, MainError> {
        self.map_err(|reason| {
            tracing::error!(?reason, "{}", MainError::TaskJoinError);
            MainError::TaskJoinError
        })
    }
}

/// Failure of a single JSON-RPC exchange with an endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            RpcError::Timeout
        } else if let Some(status) = value.status() {
            RpcError::Http {
                status: status.as_u16(),
                body: value.to_string(),
            }
        } else {
            RpcError::Transport(value.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("network {0} is not configured")]
    UnknownNetwork(Network),
    #[error("network {0} has neither credentials nor public endpoints")]
    NoEndpoints(Network),
    #[error("every endpoint of network {0} has been blacklisted")]
    Exhausted(Network),
}

/// Failure of a pooled call: either no endpoint could be handed out or the
/// endpoint answered with an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl CallError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CallError::Pool(_) => ErrorClass::Configuration,
            CallError::Rpc(error) => classify(error),
        }
    }
}

/// How a caller should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Quota exhausted. Retry the same request after backing off.
    RateLimit,
    /// Timeouts, resets, gateway failures. Retried like rate limits.
    Transient,
    /// The provider rejected the block range width.
    RangeTooLarge,
    /// The credential was refused by the provider.
    Unauthorized,
    /// Missing credentials or networks. Never retried.
    Configuration,
    /// Reverts, bad params and everything else.
    Terminal,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::RateLimit | ErrorClass::Transient)
    }
}

const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "compute units",
    "compute unit",
    "exceeded its throughput",
    "exceeded the rps",
    "request limit",
    "capacity exceeded",
];

const RANGE_SIGNATURES: &[&str] = &[
    "block range",
    "range too large",
    "range is too large",
    "query returned more than",
    "response size exceeded",
    "log response size",
    "exceed maximum block range",
    "too many blocks",
    "limited to a",
];

const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection aborted",
    "connection refused",
    "connection closed",
    "remote end closed",
    "remotedisconnected",
    "broken pipe",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "header not found",
];

/// Maps a provider failure onto the error taxonomy. All provider specific
/// string matching lives here.
pub fn classify(error: &RpcError) -> ErrorClass {
    match error {
        RpcError::Timeout => ErrorClass::Transient,
        RpcError::Http { status, body } => match status {
            429 => ErrorClass::RateLimit,
            401 | 403 => ErrorClass::Unauthorized,
            500 | 502 | 503 | 504 => ErrorClass::Transient,
            _ => classify_message(body).unwrap_or(ErrorClass::Terminal),
        },
        RpcError::JsonRpc { code, message } => {
            if let Some(class) = classify_message(message) {
                return class;
            }
            match code {
                // limit exceeded
                -32005 => ErrorClass::RateLimit,
                429 => ErrorClass::RateLimit,
                _ => ErrorClass::Terminal,
            }
        }
        RpcError::Transport(message) => {
            classify_message(message).unwrap_or(ErrorClass::Transient)
        }
        RpcError::Malformed(_) => ErrorClass::Terminal,
    }
}

fn classify_message(message: &str) -> Option<ErrorClass> {
    let message = message.to_lowercase();
    let matches = |signatures: &[&str]| {
        signatures.iter().any(|pattern| message.contains(pattern))
    };

    // Range rejections frequently also mention "exceeded", check them first.
    if matches(RANGE_SIGNATURES) {
        Some(ErrorClass::RangeTooLarge)
    } else if matches(RATE_LIMIT_SIGNATURES) || message.contains("429") {
        Some(ErrorClass::RateLimit)
    } else if message.contains("unauthorized") || message.contains("401") {
        Some(ErrorClass::Unauthorized)
    } else if matches(TRANSIENT_SIGNATURES)
        || message.contains("502")
        || message.contains("503")
    {
        Some(ErrorClass::Transient)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_drives_classification() {
        let status = |status| RpcError::Http {
            status,
            body: String::new(),
        };

        assert_eq!(classify(&status(429)), ErrorClass::RateLimit);
        assert_eq!(classify(&status(503)), ErrorClass::Transient);
        assert_eq!(classify(&status(502)), ErrorClass::Transient);
        assert_eq!(classify(&status(401)), ErrorClass::Unauthorized);
        assert_eq!(classify(&status(400)), ErrorClass::Terminal);
    }

    #[test]
    fn provider_messages_are_recognised() {
        let rpc = |code, message: &str| RpcError::JsonRpc {
            code,
            message: message.to_owned(),
        };

        assert_eq!(
            classify(&rpc(
                -32000,
                "Your app has exceeded its compute units per second capacity"
            )),
            ErrorClass::RateLimit
        );
        assert_eq!(
            classify(&rpc(
                -32600,
                "Under the Free tier plan, you can make eth_getLogs requests \
                 with up to a 10 block range."
            )),
            ErrorClass::RangeTooLarge
        );
        assert_eq!(
            classify(&rpc(-32005, "query returned more than 10000 results")),
            ErrorClass::RangeTooLarge
        );
        assert_eq!(classify(&rpc(-32005, "slow down")), ErrorClass::RateLimit);
        assert_eq!(
            classify(&rpc(3, "execution reverted")),
            ErrorClass::Terminal
        );
    }

    #[test]
    fn transport_failures_default_to_transient() {
        assert_eq!(
            classify(&RpcError::Transport("connection reset by peer".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&RpcError::Transport("dns failure".into())),
            ErrorClass::Transient
        );
        assert_eq!(classify(&RpcError::Timeout), ErrorClass::Transient);
        assert_eq!(
            classify(&RpcError::Malformed("missing result".into())),
            ErrorClass::Terminal
        );
    }
}
