//! HTTP query endpoint.

use actix_cors::Cors;
use actix_web::{
    http::{header::ContentType, StatusCode},
    web, App, HttpResponse, HttpServer, ResponseError,
};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;

use crate::aggregator::SnapshotAggregator;
use crate::error::AggregationError;

const FAILURE_MESSAGE: &str = "An error occurred while fetching system usage";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Internal detail stays in the log.
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type(ContentType::plaintext())
            .body(FAILURE_MESSAGE)
    }
}

impl From<AggregationError> for Error {
    fn from(error: AggregationError) -> Self {
        Self::Internal(error.to_string())
    }
}

/// Current host resource usage
async fn system_usage(
    aggregator: web::Data<SnapshotAggregator>,
) -> Result<HttpResponse, Error> {
    let snapshot = aggregator.capture_snapshot().await.map_err(|error| {
        error!("Failed to capture system usage: {error}");
        Error::from(error)
    })?;

    Ok(HttpResponse::Ok().json(snapshot))
}

/// Register the endpoint on both the flat and the `/home` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(system_usage))
        .route("/system-usage", web::get().to(system_usage))
        .service(
            web::scope("/home")
                .route("", web::get().to(system_usage))
                .route("/system-usage", web::get().to(system_usage)),
        );
}

// Start REST API server with the desired address
pub async fn run(address: &str, aggregator: SnapshotAggregator) -> std::io::Result<()> {
    let aggregator = web::Data::new(aggregator);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET"])
                    .max_age(3600),
            )
            .wrap(TracingLogger::default())
            .app_data(aggregator.clone())
            .configure(configure)
    })
    .bind(address)?;

    info!("Serving system usage on http://{address}/system-usage");
    server.run().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::test;

    use super::*;
    use crate::cache::{test_clock::FakeClock, TtlCache, DEFAULT_TTL};
    use crate::error::SourceUnavailableError;
    use crate::metrics::cpu::test_counter::SteadyCounter;
    use crate::metrics::memory::{MemorySource, PhysicalMemory};
    use crate::metrics::storage::{Volume, VolumeKind, VolumeSource, Volumes};
    use crate::metrics::{
        CpuReader, FaultPolicy, GpuReader, NvidiaSmi, RamReader, StorageInfo, StorageReader,
    };

    const GB: u64 = 1024 * 1024 * 1024;

    struct FixedVolume(u64, u64);

    impl VolumeSource for FixedVolume {
        fn volumes(&self) -> Result<Volumes<'_>, SourceUnavailableError> {
            Ok(Box::new(std::iter::once(Volume {
                name: "/".into(),
                kind: VolumeKind::Fixed,
                ready: true,
                total_bytes: self.0,
                available_bytes: self.1,
            })))
        }
    }

    struct FixedMemory;

    impl MemorySource for FixedMemory {
        fn physical_memory(&self) -> Result<PhysicalMemory, SourceUnavailableError> {
            Ok(PhysicalMemory {
                total_kb: 16 * 1024 * 1024,
                free_kb: 6_815_744,
            })
        }
    }

    fn aggregator(storage_gb: (u64, u64)) -> SnapshotAggregator {
        let clock = FakeClock::new();
        SnapshotAggregator::new(
            CpuReader::new(Some(SteadyCounter::new(50.0)), Duration::ZERO),
            GpuReader::new(
                Arc::new(NvidiaSmi::new("coolpanel-no-such-gpu-tool")),
                TtlCache::new(0.0, DEFAULT_TTL, clock.clone()),
                FaultPolicy::Cache,
            ),
            StorageReader::new(
                Arc::new(FixedVolume(storage_gb.0 * GB, storage_gb.1 * GB)),
                None,
                TtlCache::new(StorageInfo::default(), DEFAULT_TTL, clock),
            ),
            RamReader::new(Arc::new(FixedMemory)),
        )
    }

    #[actix_web::test]
    async fn test_system_usage_routes() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(aggregator((500, 120))))
                .configure(configure),
        )
        .await;

        for uri in ["/system-usage", "/", "/home", "/home/system-usage"] {
            let request = test::TestRequest::get().uri(uri).to_request();
            let response = test::call_service(&app, request).await;
            assert_eq!(response.status(), StatusCode::OK, "{uri}");

            let body: serde_json::Value = test::read_body_json(response).await;
            assert_eq!(
                body,
                serde_json::json!({
                    "cpuUsage": 50.0,
                    "gpuUsage": 0.0,
                    "totalStorage": 500.0,
                    "availableStorage": 120.0,
                    "totalRam": 16.0,
                    "usedRam": 9.5,
                }),
                "{uri}"
            );
        }
    }

    #[actix_web::test]
    async fn test_post_is_not_routed() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(aggregator((500, 120))))
                .configure(configure),
        )
        .await;

        let request = test::TestRequest::post().uri("/system-usage").to_request();
        let response = test::call_service(&app, request).await;
        assert!(!response.status().is_success());
    }

    #[actix_web::test]
    async fn test_invalid_snapshot_is_generic_500() {
        // More space available than the volume holds fails snapshot assembly.
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(aggregator((100, 150))))
                .configure(configure),
        )
        .await;

        let request = test::TestRequest::get().uri("/system-usage").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = test::read_body(response).await;
        assert_eq!(&body[..], FAILURE_MESSAGE.as_bytes());
    }
}
