//! Status codes that cross the boundary between a send-callable and the
//! executor driving it.
//!
//! The axis has two bands: application statuses (`MetaStatusCode`, always
//! non-negative conceptually) and transport failures, modeled as the
//! negative-valued `RpcStatus::Transport` variants. Keeping both in one enum
//! lets the executor interpret a single value per attempt instead of
//! threading a separate transport-error type alongside the application
//! code.

/// Status codes a metadata RPC can return on a successful round trip.
///
/// This is the closed set of outcomes the retry loop branches on
/// (`Overload`, `Redirected`, `CopysetNotExist`, `PartitionAllocIdFail`),
/// plus the handful of additional terminal outcomes (`NotFound`, `Exists`,
/// `NotEmpty`, `UnknownError`) a metadata operation can realistically
/// produce end to end. Extending the retryable subset requires executor
/// changes, not just a new variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaStatusCode {
    Ok,
    Overload,
    Redirected,
    CopysetNotExist,
    PartitionAllocIdFail,
    NotFound,
    Exists,
    NotEmpty,
    UnknownError,
}

impl MetaStatusCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MetaStatusCode::Overload
                | MetaStatusCode::Redirected
                | MetaStatusCode::CopysetNotExist
                | MetaStatusCode::PartitionAllocIdFail
        )
    }
}

/// A transport-level failure from the RPC substrate. Two are distinguished
/// by name because the executor treats them specially (timeout backoff);
/// any other transport error just falls back to the base retry interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    RpcTimedOut,
    TimedOut,
    Other,
}

/// Everything a send-callable can return for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcStatus {
    Ok,
    App(MetaStatusCode),
    Transport(TransportError),
}

impl RpcStatus {
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcStatus::Ok => false,
            RpcStatus::App(code) => code.is_retryable(),
            RpcStatus::Transport(_) => true,
        }
    }

    pub fn is_transport_timeout(&self) -> bool {
        matches!(
            self,
            RpcStatus::Transport(TransportError::RpcTimedOut)
                | RpcStatus::Transport(TransportError::TimedOut)
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RpcStatus::Transport(_))
    }
}

impl std::fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RpcStatus::Ok => write!(f, "OK"),
            RpcStatus::App(code) => write!(f, "{:?}", code),
            RpcStatus::Transport(err) => write!(f, "transport error {:?}", err),
        }
    }
}
