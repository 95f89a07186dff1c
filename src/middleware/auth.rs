use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;

pub const TEACHER_HEADER: &str = "x-teacher-id";

/// The teacher a request acts for. Session handling happens upstream; this layer only
/// trusts the forwarded id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester(pub Uuid);

pub async fn require_teacher(mut req: Request, next: Next) -> Response {
    let Some(header) = req.headers().get(TEACHER_HEADER) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"missing_teacher_id"})),
        )
            .into_response();
    };
    let Some(teacher_id) = header.to_str().ok().and_then(|s| Uuid::parse_str(s.trim()).ok()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"invalid_teacher_id"})),
        )
            .into_response();
    };
    req.extensions_mut().insert(Requester(teacher_id));
    next.run(req).await
}
