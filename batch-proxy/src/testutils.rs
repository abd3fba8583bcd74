use crate::config::{
    ApiConfig, AuthConfig, Config, CookieConfig, DuotoneConfig, Listener,
};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

pub fn api_config(base_url: &str) -> ApiConfig {
    ApiConfig {
        base_url: Some(Url::parse(base_url).unwrap()),
        timeout_ms: 2000,
        max_concurrency: 4,
        session_endpoint: "sessions".to_string(),
        trusted_ip_header: Some("fastly-client-ip".to_string()),
        client_ip_override_param: "__set_ip".to_string(),
    }
}

pub fn config(base_url: &str) -> Config {
    Config {
        listener: Listener {
            host: "127.0.0.1".to_string(),
            port: 3000,
        },
        admin_listener: Listener {
            host: "127.0.0.1".to_string(),
            port: 3001,
        },
        batch_path: "/mu_api".to_string(),
        api: api_config(base_url),
        auth: AuthConfig::default(),
        cookies: CookieConfig { secure: true },
        duotone: DuotoneConfig {
            salt: "s3cret".to_string(),
            base_url: Url::parse("https://photos.example.com/photo_api/event").unwrap(),
            pairs: vec![("ff0000".to_string(), "00ff00".to_string())],
        },
    }
}

/// Start a mock HTTP server on a random local port, answering every request
/// with `handler`.
pub async fn start_mock_server<F, Fut>(handler: F) -> u16
where
    F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let response = handler(req);
                    async move { Ok::<_, Infallible>(response.await) }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    port
}
