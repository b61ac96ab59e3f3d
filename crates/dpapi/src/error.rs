//! Dataplane reply status codes and API errors.
//!
//! Every reply to a write request carries a signed return value. Zero means
//! success; negative values identify the failure class. This module turns
//! those raw values into Rust results.

use std::fmt;
use thiserror::Error;

/// Return value carried by a dataplane reply.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiStatus {
    Success = 0,
    Unspecified = -1,
    InvalidInterfaceIndex = -2,
    NoSuchFib = -3,
    NoSuchEntry = -6,
    InvalidValue = -7,
    Unimplemented = -9,
    AddressInUse = -12,
    EntryAlreadyExists = -17,
    InvalidArgument = -73,
    FeatureDisabled = -30,
}

impl ApiStatus {
    /// Creates an ApiStatus from a raw reply value.
    pub fn from_raw(retval: i32) -> Self {
        match retval {
            0 => ApiStatus::Success,
            -2 => ApiStatus::InvalidInterfaceIndex,
            -3 => ApiStatus::NoSuchFib,
            -6 => ApiStatus::NoSuchEntry,
            -7 => ApiStatus::InvalidValue,
            -9 => ApiStatus::Unimplemented,
            -12 => ApiStatus::AddressInUse,
            -17 => ApiStatus::EntryAlreadyExists,
            -30 => ApiStatus::FeatureDisabled,
            -73 => ApiStatus::InvalidArgument,
            _ => ApiStatus::Unspecified,
        }
    }

    /// Returns the raw reply value.
    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == ApiStatus::Success
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiStatus::Success => "success",
            ApiStatus::Unspecified => "unspecified error",
            ApiStatus::InvalidInterfaceIndex => "invalid interface index",
            ApiStatus::NoSuchFib => "no such fib",
            ApiStatus::NoSuchEntry => "no such entry",
            ApiStatus::InvalidValue => "invalid value",
            ApiStatus::Unimplemented => "unimplemented",
            ApiStatus::AddressInUse => "address in use",
            ApiStatus::EntryAlreadyExists => "entry already exists",
            ApiStatus::InvalidArgument => "invalid argument",
            ApiStatus::FeatureDisabled => "feature disabled",
        };
        write!(f, "{} ({})", s, self.raw())
    }
}

/// Error type for dataplane API exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The dataplane answered a request with a non-zero return value.
    #[error("{message} returned {status}")]
    Status {
        message: &'static str,
        status: ApiStatus,
    },

    /// The dataplane does not know one or more of the listed messages.
    #[error("incompatible dataplane, unknown messages: {}", .messages.join(", "))]
    Incompatible { messages: Vec<String> },

    /// The reply did not match the request that was sent.
    #[error("unexpected reply to {message}: {reply}")]
    UnexpectedReply {
        message: &'static str,
        reply: String,
    },

    /// A detail message in a dump stream could not be decoded.
    #[error("malformed detail in {message} stream: {reason}")]
    MalformedDetail {
        message: &'static str,
        reason: String,
    },

    /// The channel to the dataplane is gone.
    #[error("dataplane channel closed")]
    ChannelClosed,
}

impl ApiError {
    /// Creates a status error for the given message name.
    pub fn status(message: &'static str, status: ApiStatus) -> Self {
        ApiError::Status { message, status }
    }

    /// Returns the reply status if this is a Status error.
    pub fn api_status(&self) -> Option<ApiStatus> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the dataplane reported the target as already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.api_status(),
            Some(ApiStatus::NoSuchEntry) | Some(ApiStatus::InvalidInterfaceIndex)
        )
    }

    /// Returns true if nothing more can be received on the channel.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::ChannelClosed)
    }
}

/// Result type for dataplane API exchanges.
pub type ApiResult<T> = Result<T, ApiError>;

/// Extension trait for checking raw reply values.
pub trait RetvalExt {
    /// Converts a raw return value into a result tagged with the message name.
    fn check(self, message: &'static str) -> ApiResult<()>;
}

impl RetvalExt for i32 {
    fn check(self, message: &'static str) -> ApiResult<()> {
        let status = ApiStatus::from_raw(self);
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::status(message, status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(ApiStatus::from_raw(0), ApiStatus::Success);
        assert_eq!(ApiStatus::from_raw(-6), ApiStatus::NoSuchEntry);
        assert_eq!(ApiStatus::from_raw(-999), ApiStatus::Unspecified);
        assert_eq!(ApiStatus::NoSuchEntry.raw(), -6);
    }

    #[test]
    fn test_retval_check() {
        assert!(0_i32.check("create_loopback").is_ok());
        let err = (-2_i32).check("sw_interface_set_flags").unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::InvalidInterfaceIndex));
        assert!(err.to_string().contains("sw_interface_set_flags"));
    }

    #[test]
    fn test_incompatible_display() {
        let err = ApiError::Incompatible {
            messages: vec!["bfd_udp_add".to_string(), "stn_add_del_rule".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "incompatible dataplane, unknown messages: bfd_udp_add, stn_add_del_rule"
        );
        assert!(!err.is_fatal());
        assert!(ApiError::ChannelClosed.is_fatal());
    }
}
