use crate::{
    codec::JpegCodec,
    config::{Config, Validatable},
    detection::ClassTable,
    ort_service::OrtModelService,
    persistence::SqlitePlantRepository,
    pipeline::PlantAnalyzer,
    server::{HttpServer, SharedState},
    storage::LocalBucket,
    telemetry::Metrics,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let class_table = ClassTable::from_file(&config.labels.get_path())
        .with_context(|| format!("Failed to load labels from {:?}", config.labels.get_path()))?;
    tracing::info!("Loaded {} plant classes", class_table.len());

    let detector = match OrtModelService::new(&config.model) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(e.into());
        }
    };

    let codec = JpegCodec::new(config.envelope.jpeg_quality)?;
    let store = LocalBucket::new(&config.storage);
    let repository = SqlitePlantRepository::connect(&config.database)
        .await
        .context("Failed to open plant database")?;

    let analyzer = PlantAnalyzer::new(
        detector,
        class_table,
        Arc::new(codec),
        Arc::new(store),
        Arc::new(repository),
        config.model.input_size,
    );

    let state = SharedState {
        analyzer: Arc::new(analyzer),
        metrics: Arc::new(Metrics::new()?),
    };
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
