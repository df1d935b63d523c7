use axum::body::Body;
use axum::http::{header::{self, HeaderValue}, Request};
use axum::middleware::Next;
use axum::response::Response;

fn add_api_headers(response: &mut Response) {
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    // Responses carry tokens; keep them out of shared caches.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
}

pub async fn security_headers(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    add_api_headers(&mut response);
    response
}

pub async fn security_headers_with_hsts(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    add_api_headers(&mut response);
    response.headers_mut().insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    async fn headers_for(router: Router) -> axum::http::HeaderMap {
        router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap()
            .headers()
            .clone()
    }

    #[tokio::test]
    async fn plain_http_has_no_hsts() {
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn(security_headers));
        let headers = headers_for(router).await;
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["cache-control"], "no-store");
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn tls_adds_hsts() {
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn(security_headers_with_hsts));
        let headers = headers_for(router).await;
        assert!(headers.contains_key("strict-transport-security"));
        assert_eq!(headers["referrer-policy"], "no-referrer");
    }
}
