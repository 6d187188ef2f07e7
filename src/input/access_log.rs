//! Combined log format parsing
//!
//! `1.2.3.4 - alice [10/Oct/2023:13:55:36 +0000] "GET /path HTTP/1.1" 404 512 "-" "curl/8.0"`

use regex::Regex;
use std::net::IpAddr;
use std::sync::OnceLock;
use thiserror::Error;

use crate::models::HttpExchange;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Line does not match the combined log format")]
    Format,

    #[error("Invalid client address: {0}")]
    InvalidIp(String),

    #[error("Invalid status code: {0}")]
    InvalidStatus(String),
}

fn access_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?P<ip>\S+) \S+ (?P<user>\S+) \[[^\]]+\] "(?P<method>[A-Z]+) (?P<path>\S+)[^"]*" (?P<status>\d{3}) \S+(?: "[^"]*" "(?P<agent>[^"]*)")?"#,
        )
        .expect("access log pattern is valid")
    })
}

/// Parse one access log line into an exchange
///
/// A user field other than `-` marks the request as authenticated.
pub fn parse_access_line(line: &str) -> Result<HttpExchange, ParseError> {
    let caps = access_line_regex()
        .captures(line.trim_end())
        .ok_or(ParseError::Format)?;

    let ip = &caps["ip"];
    ip.parse::<IpAddr>()
        .map_err(|_| ParseError::InvalidIp(ip.to_string()))?;

    let status = caps["status"]
        .parse::<u16>()
        .map_err(|_| ParseError::InvalidStatus(caps["status"].to_string()))?;

    let user_agent = caps
        .name("agent")
        .map(|m| m.as_str())
        .filter(|agent| !agent.is_empty() && *agent != "-")
        .map(|agent| agent.to_string());

    Ok(HttpExchange {
        ip: ip.to_string(),
        method: caps["method"].to_string(),
        path: caps["path"].to_string(),
        status,
        authenticated: &caps["user"] != "-",
        user_agent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_combined_line() {
        let line = r#"203.0.113.9 - - [10/Oct/2023:13:55:36 +0000] "GET /wp-admin.php HTTP/1.1" 404 153 "-" "Mozilla/5.0 (X11)""#;
        let exchange = parse_access_line(line).unwrap();
        assert_eq!(exchange.ip, "203.0.113.9");
        assert_eq!(exchange.method, "GET");
        assert_eq!(exchange.path, "/wp-admin.php");
        assert_eq!(exchange.status, 404);
        assert!(!exchange.authenticated);
        assert_eq!(exchange.user_agent.as_deref(), Some("Mozilla/5.0 (X11)"));
    }

    #[test]
    fn test_parse_common_line_with_user() {
        let line = "2001:db8::1 - alice [10/Oct/2023:13:55:36 +0000] \"POST /login HTTP/1.1\" 401 -\n";
        let exchange = parse_access_line(line).unwrap();
        assert_eq!(exchange.ip, "2001:db8::1");
        assert!(exchange.authenticated);
        assert_eq!(exchange.status, 401);
        assert!(exchange.user_agent.is_none());
    }

    #[test]
    fn test_rejects_malformed_lines() {
        assert_eq!(parse_access_line("not a log line"), Err(ParseError::Format));
        assert_eq!(
            parse_access_line(r#"host.example - - [10/Oct/2023:13:55:36 +0000] "GET / HTTP/1.1" 200 1"#),
            Err(ParseError::InvalidIp("host.example".to_string()))
        );
    }
}
