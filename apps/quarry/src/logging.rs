//! # Logging
//!
//! `tracing-subscriber` setup driven by the `log.*` options.
//!
//! - `RUST_LOG` wins over `log.level`
//! - `QUARRY_LOG_FORMAT=json|text` wins over `log.format`
//! - each entry of `log.output` adds one formatting layer

use crate::config::{ConfigError, LogConfig, LogFormat, LogOutput};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Resolve the effective format, honouring `QUARRY_LOG_FORMAT`.
#[must_use]
pub fn effective_format(config: &LogConfig) -> LogFormat {
    match std::env::var("QUARRY_LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        Ok("text") => LogFormat::Text,
        _ => config.format,
    }
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);
    match format {
        LogFormat::Json => Box::new(layer.json()),
        LogFormat::Text => Box::new(layer),
    }
}

/// Install the global subscriber.
pub fn init(config: &LogConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));
    let format = effective_format(config);

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(config.outputs.len());
    for output in &config.outputs {
        match output {
            LogOutput::Stdout => layers.push(fmt_layer(format, std::io::stdout, true)),
            LogOutput::File => {
                std::fs::create_dir_all(&config.directory).map_err(|e| {
                    ConfigError::Io(format!("{}: {e}", config.directory.display()))
                })?;
                let path = config.log_file();
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
                layers.push(fmt_layer(format, Mutex::new(file), false));
            }
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ConfigError::Io(format!("logging already initialized: {e}")))
}
