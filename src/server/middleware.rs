// HTTP middleware

use axum::http::HeaderName;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Header carrying the correlation id through to the response.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Request id layers keyed on the correlation id header. An incoming id is
/// kept, otherwise a UUID is generated.
pub fn request_id_layers() -> (SetRequestIdLayer<MakeRequestUuid>, PropagateRequestIdLayer) {
    let header = HeaderName::from_static(CORRELATION_ID_HEADER);
    (
        SetRequestIdLayer::new(header.clone(), MakeRequestUuid),
        PropagateRequestIdLayer::new(header),
    )
}
