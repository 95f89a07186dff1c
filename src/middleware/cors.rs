use tower_http::cors::{Any, CorsLayer};

/// The paper API is called from the staff dashboard on another origin.
pub fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any)
}
