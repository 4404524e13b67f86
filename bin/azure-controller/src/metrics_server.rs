//! Prometheus scrape endpoint of the controller process

use std::net::SocketAddr;

use azure_core::ControllerMetrics;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const METRICS_PATH: &str = "/metrics";

fn respond(metrics: &ControllerMetrics, method: &Method, path: &str) -> Response<Full<Bytes>> {
    let (status, body) = match (method, path) {
        (&Method::GET, METRICS_PATH) => match metrics.gather() {
            Ok(text) => (StatusCode::OK, text),
            Err(e) => {
                warn!(error = %e, "Failed to gather metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n".to_string())
            }
        },
        (_, METRICS_PATH) => (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string()),
        _ => (StatusCode::NOT_FOUND, "not found".to_string()),
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Serve `/metrics` on `addr` until `shutdown` fires
pub async fn serve(addr: SocketAddr, metrics: ControllerMetrics, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics listening on {}{}", addr, METRICS_PATH);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => return Ok(()),
        };
        let metrics = metrics.clone();
        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = respond(&metrics, req.method(), req.uri().path());
                async move { Ok::<_, hyper::Error>(response) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Error serving metrics to {}: {}", peer_addr, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_metrics_route() {
        let metrics = ControllerMetrics::new().unwrap();
        metrics.observe_operation("Infrastructure", "Reconcile", &Ok(()));

        let response = respond(&metrics, &Method::GET, METRICS_PATH);
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("azure_extension_operations_total"));
        assert!(text.contains("result=\"succeeded\""));

        assert_eq!(respond(&metrics, &Method::POST, METRICS_PATH).status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(respond(&metrics, &Method::GET, "/healthz").status(), StatusCode::NOT_FOUND);
    }
}
