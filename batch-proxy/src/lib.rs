pub mod aggregator;
pub mod batch;
pub mod config;
pub mod context;
pub mod cookies;
pub mod dispatcher;
pub mod duotone;
pub mod errors;
mod headers;
pub mod http;
pub mod metrics_defs;
pub mod query;
pub mod request_spec;
pub mod response;
pub mod service;
pub mod tracking;

#[cfg(test)]
mod testutils;

use batch::BatchProxy;
use errors::BatchError;
use service::BatchService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use tracking::LogTrackingSink;

pub async fn run(config: config::Config) -> Result<(), BatchError> {
    let proxy = Arc::new(BatchProxy::from_config(&config, Arc::new(LogTrackingSink))?);

    let batch_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        BatchService::new(proxy, &config),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, BatchError>::new(|| true),
    );

    tokio::try_join!(batch_task, admin_task)?;
    Ok(())
}
