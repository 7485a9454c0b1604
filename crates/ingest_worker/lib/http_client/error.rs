use thiserror::Error;

/// Longest slice of an error response body kept for logs.
const MAX_BODY_EXCERPT: usize = 512;

/// Failure of one outbound request, split by what went wrong on the wire.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("request for {resource} timed out: {source}")]
    Timeout {
        resource: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("connection error while fetching {resource}: {source}")]
    Connect {
        resource: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected HTTP status while fetching {resource}: {status}")]
    UnexpectedStatus {
        resource: String,
        status: u16,
        body: String,
    },
    #[error("malformed payload for {resource}: {source}")]
    Decode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("request for {resource} failed: {source}")]
    Request {
        resource: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Normalized failure classes used for retry and abort decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    Connect,
    RateLimited,
    UpstreamUnavailable,
    ClientError,
    MalformedResponse,
    Other,
}

impl FetchErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::RateLimited => "rate_limited",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::ClientError => "client_error",
            Self::MalformedResponse => "malformed_response",
            Self::Other => "other",
        }
    }
}

impl HttpError {
    /// Classifies a transport-level reqwest failure.
    pub fn from_reqwest(resource: &str, source: reqwest::Error) -> Self {
        let resource = resource.to_string();
        if let Some(status) = source.status() {
            return Self::UnexpectedStatus {
                resource,
                status: status.as_u16(),
                body: String::new(),
            };
        }
        if source.is_timeout() {
            Self::Timeout { resource, source }
        } else if source.is_connect() {
            Self::Connect { resource, source }
        } else {
            Self::Request { resource, source }
        }
    }

    pub fn unexpected_status(resource: &str, status: u16, body: &str) -> Self {
        let excerpt = match body.char_indices().nth(MAX_BODY_EXCERPT) {
            Some((cut, _)) => &body[..cut],
            None => body,
        };
        Self::UnexpectedStatus {
            resource: resource.to_string(),
            status,
            body: excerpt.to_string(),
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Timeout { .. } => FetchErrorKind::Timeout,
            Self::Connect { .. } => FetchErrorKind::Connect,
            Self::UnexpectedStatus { status, .. } => match status {
                429 => FetchErrorKind::RateLimited,
                500..=599 => FetchErrorKind::UpstreamUnavailable,
                400..=499 => FetchErrorKind::ClientError,
                _ => FetchErrorKind::Other,
            },
            Self::Decode { .. } => FetchErrorKind::MalformedResponse,
            Self::Request { source, .. } if source.is_body() || source.is_request() => {
                FetchErrorKind::Connect
            }
            Self::Request { source, .. } if source.is_decode() => {
                FetchErrorKind::MalformedResponse
            }
            Self::Request { .. } => FetchErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FetchErrorKind::Timeout
                | FetchErrorKind::Connect
                | FetchErrorKind::RateLimited
                | FetchErrorKind::UpstreamUnavailable
        )
    }
}
