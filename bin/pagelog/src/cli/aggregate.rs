use std::sync::Arc;

use pagelog_components::{
    adapters::BatchAdapter,
    destinations::{FilesystemAnalyticalSink, FilesystemPartitionStore},
    AggregationWindow,
};
use pagelog_config::GenericConfiguration;
use pagelog_core::{TransformConfiguration, TransformEngine};
use pagelog_error::GenericError;
use tracing::info;

use crate::config::{AggregateConfig, PipelineConfiguration};

/// Handles the `aggregate` subcommand.
pub async fn handle_aggregate_command(
    config: &GenericConfiguration, command: AggregateConfig,
) -> Result<(), GenericError> {
    let pipeline = PipelineConfiguration::from_configuration(config)?;
    let transform = TransformConfiguration::from_configuration(config)?;

    let window = match command.to {
        Some(to) => AggregationWindow::new(command.from, to),
        None => AggregationWindow::single(command.from),
    };

    let store = Arc::new(FilesystemPartitionStore::new(pipeline.structured_dir()));
    let sink = Arc::new(FilesystemAnalyticalSink::new(pipeline.aggregates_dir()));
    let adapter = BatchAdapter::new(TransformEngine::new(transform), store, sink);

    let summary = adapter.run(&window).await?;
    info!(
        window = %summary.window,
        output = %pipeline.aggregates_dir().join(format!("{}.json", window.id())).display(),
        pages = summary.aggregates_written,
        "Aggregation complete."
    );

    Ok(())
}
