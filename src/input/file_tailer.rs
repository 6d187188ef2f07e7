use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

use super::access_log::parse_access_line;
use crate::models::HttpExchange;

/// Tail an access log and parse exchanges
pub struct FileTailer {
    file_path: PathBuf,
    reader: Option<BufReader<File>>,
    file_position: u64,
    from_start: bool,
    skipped: u64,
}

impl FileTailer {
    /// Create a tailer that only sees lines written from now on
    pub fn new(file_path: PathBuf) -> Self {
        FileTailer {
            file_path,
            reader: None,
            file_position: 0,
            from_start: false,
            skipped: 0,
        }
    }

    /// Create a tailer that reads the existing content first
    pub fn from_start(file_path: PathBuf) -> Self {
        FileTailer {
            from_start: true,
            ..Self::new(file_path)
        }
    }

    /// Initialize the file reader
    pub fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let file = File::open(&self.file_path)?;
        let mut reader = BufReader::new(file);

        let start = if self.from_start {
            SeekFrom::Start(0)
        } else {
            SeekFrom::End(0)
        };
        reader.seek(start)?;
        self.file_position = reader.stream_position()?;
        self.reader = Some(reader);

        Ok(())
    }

    /// Read the exchanges appended since the last call
    pub fn read_exchanges(&mut self) -> Result<Vec<HttpExchange>, Box<dyn std::error::Error>> {
        if self.reader.is_none() {
            self.initialize()?;
        } else if self.was_truncated()? {
            log::info!("{:?} was truncated, reading from the start", self.file_path);
            self.from_start = true;
            self.initialize()?;
        }

        let reader = self.reader.as_mut().ok_or("Reader not initialized")?;
        let mut exchanges = Vec::new();

        loop {
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line)?;

            if bytes_read == 0 {
                break; // EOF
            }
            // Partial line, wait for the writer to finish it
            if !line.ends_with('\n') {
                reader.seek(SeekFrom::Start(self.file_position))?;
                break;
            }

            self.file_position += bytes_read as u64;

            match parse_access_line(&line) {
                Ok(exchange) => exchanges.push(exchange),
                Err(e) => {
                    self.skipped += 1;
                    log::debug!("Skipping access log line: {}", e);
                }
            }
        }

        Ok(exchanges)
    }

    fn was_truncated(&self) -> Result<bool, Box<dyn std::error::Error>> {
        let len = std::fs::metadata(&self.file_path)?.len();
        Ok(len < self.file_position)
    }

    /// Number of lines that could not be parsed so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Check if the file still exists and is readable
    pub fn is_valid(&self) -> bool {
        self.file_path.exists()
    }
}
