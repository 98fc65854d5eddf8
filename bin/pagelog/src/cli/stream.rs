use std::{path::Path, sync::Arc};

use pagelog_components::{
    adapters::{StreamingAdapter, StreamingConfiguration},
    destinations::{FilesystemPartitionStore, FilesystemQuarantineSink},
    sources::{NdjsonSource, RecordSource},
};
use pagelog_config::GenericConfiguration;
use pagelog_core::{TransformConfiguration, TransformEngine};
use pagelog_error::GenericError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{PipelineConfiguration, StreamConfig};

/// Handles the `stream` subcommand.
///
/// Runs until the input is exhausted or the process is interrupted. An interrupted run still exits cleanly: batches
/// committed before the interrupt stay committed and the in-flight batch is dropped.
pub async fn handle_stream_command(config: &GenericConfiguration, command: StreamConfig) -> Result<(), GenericError> {
    let pipeline = PipelineConfiguration::from_configuration(config)?;
    let mut transform = TransformConfiguration::from_configuration(config)?;
    if let Some(source_type) = command.source_type {
        transform = transform.with_source_type(source_type);
    }
    let streaming = StreamingConfiguration::from_configuration(config)?;

    let batch_size = streaming.batch_size;
    let mut source: Box<dyn RecordSource> = match command.input.as_deref() {
        None => Box::new(NdjsonSource::stdin(batch_size)),
        Some(path) if path == Path::new("-") => Box::new(NdjsonSource::stdin(batch_size)),
        Some(path) => Box::new(NdjsonSource::from_path(path, batch_size).await?),
    };

    let store = Arc::new(FilesystemPartitionStore::new(pipeline.structured_dir()));
    let quarantine = Arc::new(FilesystemQuarantineSink::new(pipeline.quarantine_dir()));
    let mut adapter = StreamingAdapter::new(TransformEngine::new(transform), streaming, store, quarantine);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(shutdown.clone()));

    let summary = adapter.run(source.as_mut(), shutdown).await?;
    info!(
        data_dir = %pipeline.data_dir.display(),
        batches = summary.batches_committed,
        received = summary.records_received,
        accepted = summary.records_accepted,
        quarantined = summary.records_quarantined,
        alerts = summary.alerts_raised,
        "Stream complete."
    );

    Ok(())
}

async fn cancel_on_interrupt(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received interrupt. Stopping after the current batch.");
            shutdown.cancel();
        }
        Err(e) => warn!(error = %e, "Failed to listen for interrupt signal."),
    }
}
