use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::SinkConfig;
use crate::signal::{HttpSignalSink, Signal, SignalSink, TransportError};

/// Build the sink selected by `config.kind`, defaulting to a file sink
pub fn sink_from_config(config: &SinkConfig) -> Result<Box<dyn SignalSink>, TransportError> {
    match config.kind.to_lowercase().as_str() {
        "http" => Ok(Box::new(HttpSignalSink::from_config(config)?)),
        "file" => Ok(Box::new(FileSignalSink::from_config(config)?)),
        other => {
            log::warn!("Unknown sink kind '{}', writing signals to file", other);
            Ok(Box::new(FileSignalSink::from_config(config)?))
        }
    }
}

/// Signal sink writing batches to a file or stdout
pub struct FileSignalSink {
    format: OutputFormat,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "jsonl" => OutputFormat::Jsonl,
            "console" => OutputFormat::Console,
            _ => OutputFormat::Jsonl, // Default
        }
    }
}

impl FileSignalSink {
    /// Console format always goes to stdout; others append to `file_path` when set
    pub fn new(format: OutputFormat, file_path: Option<PathBuf>) -> Result<Self, TransportError> {
        let writer: Option<Box<dyn Write + Send>> = match (&format, file_path) {
            (OutputFormat::Console, _) => None,
            (_, Some(path)) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Box::new(BufWriter::new(file)))
            }
            (_, None) => None,
        };

        Ok(FileSignalSink {
            format,
            writer: Mutex::new(writer),
        })
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self, TransportError> {
        Self::new(OutputFormat::from_str(&config.format), config.file_path.clone())
    }

    fn render(&self, signals: &[Signal]) -> Result<String, TransportError> {
        let mut output = String::new();
        match self.format {
            OutputFormat::Json => {
                output.push_str(&serde_json::to_string_pretty(signals)?);
                output.push('\n');
            }
            OutputFormat::Jsonl => {
                for signal in signals {
                    output.push_str(&serde_json::to_string(signal)?);
                    output.push('\n');
                }
            }
            OutputFormat::Console => {
                for signal in signals {
                    output.push_str(&format!(
                        "[{}] {} since {} for {}s\n",
                        signal.scenario,
                        signal.ip,
                        signal.start_at.to_rfc3339(),
                        signal.duration
                    ));
                }
            }
        }
        Ok(output)
    }

    fn write_output(&self, data: &str) -> Result<(), TransportError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "signal writer poisoned"))?;
        match writer.as_mut() {
            Some(writer) => {
                writer.write_all(data.as_bytes())?;
                writer.flush()?;
            }
            None => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(data.as_bytes())?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}

impl SignalSink for FileSignalSink {
    fn push(&self, signals: &[Signal]) -> Result<(), TransportError> {
        let data = self.render(signals)?;
        self.write_output(&data)
    }
}
