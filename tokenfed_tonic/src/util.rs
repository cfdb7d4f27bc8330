//! Utilities for generating gRPC responses on authorization failures

use http::{header, HeaderValue, Response};
use tonic::Status;

const GRPC_CONTENT_TYPE: HeaderValue = HeaderValue::from_static("application/grpc");

/// Build a trailers-only gRPC response carrying `status`
///
/// The status code and percent-encoded message are written as headers on an
/// otherwise empty response, so the body type only needs a default value.
///
/// The prepared response will have the form:
///
/// ```http
/// HTTP/2 200 OK
/// content-type: application/grpc
/// grpc-status: {code}
/// grpc-message: {message}
/// ```
///
/// `grpc-message` is omitted if the message is empty.
pub fn status_response<Body: Default>(status: &Status) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, GRPC_CONTENT_TYPE);

    if status.add_header(resp.headers_mut()).is_err() {
        let fallback = Status::new(status.code(), "");
        let _ = fallback.add_header(resp.headers_mut());
    }

    resp
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;

    #[test]
    fn status_is_carried_in_headers() {
        let resp = status_response::<()>(&Status::permission_denied("caller is not permitted"));

        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/grpc"
        );
        assert_eq!(resp.headers().get("grpc-status").unwrap(), "7");
        assert_eq!(
            resp.headers().get("grpc-message").unwrap(),
            "caller%20is%20not%20permitted"
        );
    }

    #[test]
    fn unicode_and_non_printing_message_does_not_panic() {
        let message = "\0\n\ttest™: \"Ĉu oni povas bone ŝanĝi ĉi tiu mesaĝon en respondon?\"";

        let resp = status_response::<()>(&Status::unauthenticated(message));
        let status = Status::from_header_map(resp.headers()).unwrap();

        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), message);
    }

    #[test]
    fn empty_message_is_omitted() {
        let resp = status_response::<()>(&Status::new(Code::Unauthenticated, ""));

        assert_eq!(resp.headers().get("grpc-status").unwrap(), "16");
        assert!(resp.headers().get("grpc-message").is_none());
    }
}
