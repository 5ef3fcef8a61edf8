//! Static file fallback: anything that is not a known endpoint is served
//! from the document root, except the password file, which is never served.

use axum::body::Body;
use axum::http::{Request, Uri};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::config::get_config;
use crate::errors::ShimError;

pub async fn serve(uri: Uri) -> Response {
    if uri.path().contains(".htpasswd") {
        return ShimError::Forbidden.into_response();
    }

    let root = get_config().general.document_root;
    let request = match Request::builder().uri(&uri).body(Body::empty()) {
        Ok(request) => request,
        Err(err) => {
            return ShimError::Server(format!("bad static request: {err}")).into_response();
        }
    };

    match ServeDir::new(root).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(infallible) => match infallible {},
    }
}
