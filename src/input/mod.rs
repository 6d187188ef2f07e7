pub mod access_log;
pub mod file_tailer;

pub use access_log::{parse_access_line, ParseError};
pub use file_tailer::FileTailer;
