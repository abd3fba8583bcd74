// Header names shared by the outbound request builder and the response parser.

use http::header::HeaderName;

/// Prefix of API response headers that are folded into `meta`.
pub const VENDOR_PREFIX: &str = "x-meetup-";

pub static CLIENT_IP: HeaderName = HeaderName::from_static("x-meetup-client-ip");
pub static CSRF_TOKEN: HeaderName = HeaderName::from_static("csrf-token");
pub static REQUEST_FLAGS: HeaderName = HeaderName::from_static("x-meetup-request-flags");
pub static REQUEST_VARIANTS: HeaderName = HeaderName::from_static("x-meetup-variants");
pub static META_REQUEST_HEADERS: HeaderName = HeaderName::from_static("x-meta-request-headers");

pub const RESPONSE_FLAGS: &str = "x-meetup-flags";
pub const RESPONSE_VARIANTS: &str = "x-meetup-variants";
pub const REQUEST_ID: &str = "x-meetup-request-id";
pub const TOTAL_COUNT: &str = "x-total-count";
