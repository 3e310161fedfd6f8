//! HTTP-like status codes.
//!
//! Besides the standard codes, this includes the non-standard codes used to report network
//! failures that never produced an HTTP response (`520`-`526`, `598`, `599`).

use std::fmt;

macro_rules! statuses {
    ($($(#[$meta:meta])* $name:ident = $code:literal, $label:literal, $description:literal;)*) => {
        /// A known status code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Status {
            $($(#[$meta])* $name,)*
        }

        impl Status {
            /// All known statuses, ordered by code.
            pub const ALL: &'static [Status] = &[$(Status::$name,)*];

            /// The numeric code.
            pub fn code(self) -> u16 {
                match self {
                    $(Status::$name => $code,)*
                }
            }

            /// The short reason phrase.
            pub fn label(self) -> &'static str {
                match self {
                    $(Status::$name => $label,)*
                }
            }

            /// A human readable explanation.
            pub fn description(self) -> &'static str {
                match self {
                    $(Status::$name => $description,)*
                }
            }

            /// Returns the status with exactly this code.
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Status::$name),)*
                    _ => None,
                }
            }
        }
    };
}

statuses! {
    Continue = 100, "Continue", "The client should continue with its request.";
    SwitchingProtocols = 101, "Switching Protocols", "The server is switching protocols.";
    Ok = 200, "OK", "The request has succeeded.";
    Created = 201, "Created", "The request has been fulfilled and a new resource was created.";
    Accepted = 202, "Accepted", "The request has been accepted for processing.";
    NonAuthoritativeInformation = 203, "Non-Authoritative Information", "The returned metadata is from a third-party copy.";
    NoContent = 204, "No Content", "The request succeeded but there is no content.";
    ResetContent = 205, "Reset Content", "The client should reset the document view.";
    PartialContent = 206, "Partial Content", "The server fulfilled a partial GET request.";
    MultipleChoices = 300, "Multiple Choices", "The resource has multiple representations.";
    MovedPermanently = 301, "Moved Permanently", "The resource has a new permanent URI.";
    Found = 302, "Found", "The resource temporarily resides under a different URI.";
    SeeOther = 303, "See Other", "The response can be found under a different URI.";
    NotModified = 304, "Not Modified", "The resource has not been modified.";
    UseProxy = 305, "Use Proxy", "The resource must be accessed through a proxy.";
    TemporaryRedirect = 307, "Temporary Redirect", "The resource temporarily resides under a different URI.";
    PermanentRedirect = 308, "Permanent Redirect", "The resource permanently resides under a different URI.";
    BadRequest = 400, "Bad Request", "The request could not be understood by the server.";
    Unauthorized = 401, "Unauthorized", "The request requires user authentication.";
    PaymentRequired = 402, "Payment Required", "Payment is required to access the resource.";
    Forbidden = 403, "Forbidden", "The server refuses to fulfill the request.";
    NotFound = 404, "Not Found", "The server has not found anything matching the request URI.";
    MethodNotAllowed = 405, "Method Not Allowed", "The method is not allowed for the resource.";
    NotAcceptable = 406, "Not Acceptable", "The resource cannot produce an acceptable representation.";
    ProxyAuthenticationRequired = 407, "Proxy Authentication Required", "The client must authenticate with the proxy.";
    RequestTimeout = 408, "Request Timeout", "The client did not produce a request in time.";
    Conflict = 409, "Conflict", "The request conflicts with the current state of the resource.";
    Gone = 410, "Gone", "The resource is no longer available.";
    LengthRequired = 411, "Length Required", "The request requires a Content-Length.";
    PreconditionFailed = 412, "Precondition Failed", "A precondition in the request headers failed.";
    PayloadTooLarge = 413, "Payload Too Large", "The request entity is too large.";
    UriTooLong = 414, "URI Too Long", "The request URI is too long.";
    UnsupportedMediaType = 415, "Unsupported Media Type", "The request entity has an unsupported format.";
    RangeNotSatisfiable = 416, "Range Not Satisfiable", "The requested range cannot be served.";
    ExpectationFailed = 417, "Expectation Failed", "The Expect header could not be met.";
    UnprocessableEntity = 422, "Unprocessable Entity", "The request entity could not be processed.";
    TooManyRequests = 429, "Too Many Requests", "The client sent too many requests.";
    InternalServerError = 500, "Internal Server Error", "The server encountered an unexpected condition.";
    NotImplemented = 501, "Not Implemented", "The server does not support the requested functionality.";
    BadGateway = 502, "Bad Gateway", "The upstream server returned an invalid response.";
    ServiceUnavailable = 503, "Service Unavailable", "The service is unavailable or its host is unknown.";
    GatewayTimeout = 504, "Gateway Timeout", "No response was received in time.";
    HttpVersionNotSupported = 505, "HTTP Version Not Supported", "The HTTP version is not supported.";
    UnknownError = 520, "Unknown Error", "The call failed for an unexpected reason.";
    WebServerIsDown = 521, "Web Server Is Down", "The connection to the server was refused.";
    ConnectionTimedOut = 522, "Connection Timed Out", "The connection to the server timed out.";
    OriginIsUnreachable = 523, "Origin Is Unreachable", "The server could not be reached.";
    ATimeoutOccurred = 524, "A Timeout Occurred", "The server did not respond in time.";
    SslHandshakeFailed = 525, "SSL Handshake Failed", "The TLS handshake with the server failed.";
    InvalidSslCertificate = 526, "Invalid SSL Certificate", "The server certificate could not be validated.";
    NetworkReadTimeout = 598, "Network Read Timeout", "Reading the response timed out.";
    NetworkConnectTimeout = 599, "Network Connect Timeout", "Connecting to the server timed out.";
}

impl Status {
    /// Returns the status for `code`.
    ///
    /// Unknown codes fall back to the nearest class boundary: `200` for informational and
    /// success codes, `303` for redirects, `400` for client errors, `500` for server errors and
    /// `501` for anything outside of these classes.
    pub fn find(code: u16) -> Self {
        if let Some(status) = Self::from_code(code) {
            return status;
        }

        let fallback = match code {
            100..=299 => Status::Ok,
            300..=399 => Status::SeeOther,
            400..=499 => Status::BadRequest,
            500..=599 => Status::InternalServerError,
            _ => Status::NotImplemented,
        };
        tracing::warn!(code, fallback = fallback.code(), "unknown status code");
        fallback
    }

    /// Whether this status denotes an error.
    pub fn is_error(self) -> bool {
        self.code() >= 400
    }

    /// Whether this status is a redirect.
    pub fn is_redirect(self) -> bool {
        (300..400).contains(&self.code())
    }

    /// Whether this status reports a timeout of some kind.
    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            Status::RequestTimeout
                | Status::GatewayTimeout
                | Status::ConnectionTimedOut
                | Status::ATimeoutOccurred
                | Status::NetworkReadTimeout
                | Status::NetworkConnectTimeout
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert_eq!(Status::find(404), Status::NotFound);
        assert_eq!(Status::find(598), Status::NetworkReadTimeout);
        assert_eq!(Status::find(526).label(), "Invalid SSL Certificate");
    }

    #[test]
    fn test_fallback() {
        assert_eq!(Status::find(299), Status::Ok);
        assert_eq!(Status::find(150), Status::Ok);
        assert_eq!(Status::find(399), Status::SeeOther);
        assert_eq!(Status::find(418), Status::BadRequest);
        assert_eq!(Status::find(555), Status::InternalServerError);
        assert_eq!(Status::find(42), Status::NotImplemented);
        assert_eq!(Status::find(700), Status::NotImplemented);
    }

    #[test]
    fn test_table_is_ordered_and_unique() {
        for pair in Status::ALL.windows(2) {
            assert!(pair[0].code() < pair[1].code());
        }
        for status in Status::ALL {
            assert_eq!(Status::from_code(status.code()), Some(*status));
        }
    }

    #[test]
    fn test_classification() {
        assert!(!Status::Ok.is_error());
        assert!(!Status::Found.is_error());
        assert!(Status::Found.is_redirect());
        assert!(Status::BadRequest.is_error());
        assert!(Status::UnknownError.is_error());
        assert!(Status::NetworkReadTimeout.is_timeout());
        assert!(!Status::NotFound.is_timeout());
        assert_eq!(Status::GatewayTimeout.to_string(), "504 Gateway Timeout");
    }
}
