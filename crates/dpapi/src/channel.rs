//! The dataplane channel abstraction.
//!
//! A [`DataplaneApi`] is constructed explicitly and handed to every
//! configurator that needs it; there is no process-wide default channel.

use log::warn;

use crate::error::{ApiError, ApiResult, RetvalExt};
use crate::message::{Detail, DumpRequest, Reply, Request};

/// Receiving side of a multi-request exchange.
pub trait MultiReply: Send {
    /// Receives the next detail message.
    ///
    /// Returns `Ok(None)` once the control sentinel that terminates the stream
    /// has been received. After a non-fatal error the stream can still be
    /// read.
    fn receive(&mut self) -> ApiResult<Option<Detail>>;
}

/// Request/reply channel to the dataplane.
pub trait DataplaneApi: Send + Sync {
    /// Sends one request and waits for its reply.
    ///
    /// Transport failures are returned as errors; a non-zero return value is
    /// carried in the reply and left to the caller.
    fn send_request(&self, request: Request) -> ApiResult<Reply>;

    /// Sends a dump request followed by the control sentinel.
    fn send_multi_request(&self, request: DumpRequest) -> ApiResult<Box<dyn MultiReply + '_>>;

    /// Fails if the dataplane does not understand any of the given messages.
    fn check_message_compatibility(&self, messages: &[&str]) -> ApiResult<()>;

    /// Sends one request and converts a non-zero return value into an error.
    fn request(&self, request: Request) -> ApiResult<Reply> {
        let name = request.name();
        let reply = self.send_request(request)?;
        reply.retval.check(name)?;
        Ok(reply)
    }

    /// Sends a create request and returns the allocated index.
    fn request_index(&self, request: Request) -> ApiResult<u32> {
        let name = request.name();
        let reply = self.request(request)?;
        reply.index.ok_or_else(|| ApiError::UnexpectedReply {
            message: name,
            reply: "reply carries no index".to_string(),
        })
    }
}

/// Runs a dump and collects every detail message.
///
/// The stream is always drained to its sentinel, even after a mid-stream
/// error, so the channel is left clean for the next caller. The first error
/// seen is returned once draining completes.
pub fn drain_dump(api: &dyn DataplaneApi, request: DumpRequest) -> ApiResult<Vec<Detail>> {
    let mut stream = api.send_multi_request(request)?;
    let mut details = Vec::new();
    let mut first_error: Option<ApiError> = None;

    loop {
        match stream.receive() {
            Ok(Some(detail)) => details.push(detail),
            Ok(None) => break,
            Err(e) if e.is_fatal() => {
                first_error.get_or_insert(e);
                break;
            }
            Err(e) => {
                warn!("error in {} stream, draining to sentinel: {}", request.name(), e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(details),
    }
}
