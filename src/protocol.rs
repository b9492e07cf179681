//! Protocol parser and command definitions for logkv
//!
//! One request line per connection: `INSERT <key> <value>` or `LOOKUP <key>`,
//! tokens separated by single spaces. Parsing is done with nom over the raw
//! bytes read from the socket.

use crate::error::{LogKvError, Result};
use crate::record_log::DELIMITER;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{all_consuming, map, map_res},
    sequence::tuple,
    IResult,
};
use std::str;

/// Commands supported by the logkv protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Insert { key: String, value: String },
    Lookup { key: String },
}

impl Command {
    /// Request line for this command, including the trailing newline
    pub fn to_line(&self) -> String {
        match self {
            Command::Insert { key, value } => format!("INSERT {} {}\n", key, value),
            Command::Lookup { key } => format!("LOOKUP {}\n", key),
        }
    }
}

/// Response types from the server
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Value(String),
    NotFound,
    Error,
}

impl Response {
    /// Serialize response to bytes for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Ok => b"OK\n".to_vec(),
            Response::Value(v) => format!("{}\n", v).into_bytes(),
            Response::NotFound => b"NOT_FOUND\n".to_vec(),
            Response::Error => b"ERROR\n".to_vec(),
        }
    }
}

/// Parse one request line. Trailing line-ending characters are ignored.
pub fn parse_command(input: &[u8]) -> Result<Command> {
    let line = trim_line_ending(input);
    let (_, command) = command_parser(line)
        .map_err(|e| LogKvError::Protocol(format!("Failed to parse command: {:?}", e)))?;

    let key = match &command {
        Command::Insert { key, .. } | Command::Lookup { key } => key,
    };
    if key.contains(DELIMITER) {
        return Err(LogKvError::Protocol(format!(
            "key must not contain '{}'",
            DELIMITER
        )));
    }

    Ok(command)
}

fn trim_line_ending(input: &[u8]) -> &[u8] {
    let end = input
        .iter()
        .rposition(|&c| c != b'\n' && c != b'\r')
        .map_or(0, |i| i + 1);
    &input[..end]
}

fn command_parser(input: &[u8]) -> IResult<&[u8], Command> {
    all_consuming(alt((insert_command, lookup_command)))(input)
}

/// A single non-empty token: no spaces, no line breaks, valid UTF-8
fn token(input: &[u8]) -> IResult<&[u8], &str> {
    map_res(
        take_while1(|c| c != b' ' && c != b'\r' && c != b'\n'),
        str::from_utf8,
    )(input)
}

/// Parse INSERT command: INSERT <key> <value>
fn insert_command(input: &[u8]) -> IResult<&[u8], Command> {
    map(
        tuple((tag("INSERT"), char(' '), token, char(' '), token)),
        |(_, _, key, _, value)| Command::Insert {
            key: key.to_string(),
            value: value.to_string(),
        },
    )(input)
}

/// Parse LOOKUP command: LOOKUP <key>
fn lookup_command(input: &[u8]) -> IResult<&[u8], Command> {
    map(tuple((tag("LOOKUP"), char(' '), token)), |(_, _, key)| {
        Command::Lookup {
            key: key.to_string(),
        }
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_insert_command() {
        let result = parse_command(b"INSERT alice secret123\n").unwrap();
        assert_eq!(
            result,
            Command::Insert {
                key: "alice".to_string(),
                value: "secret123".to_string()
            }
        );
    }

    #[test]
    fn test_parse_lookup_command() {
        let result = parse_command(b"LOOKUP alice\r\n").unwrap();
        assert_eq!(
            result,
            Command::Lookup {
                key: "alice".to_string()
            }
        );
    }

    #[test]
    fn test_line_terminator_is_optional() {
        assert!(parse_command(b"LOOKUP alice").is_ok());
    }

    #[test]
    fn test_value_may_contain_delimiter() {
        let result = parse_command(b"INSERT bob a|b\n").unwrap();
        assert_eq!(
            result,
            Command::Insert {
                key: "bob".to_string(),
                value: "a|b".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_malformed_lines() {
        let malformed: &[&[u8]] = &[
            b"\n",
            b"",
            b"INSERT onlyonearg\n",
            b"INSERT\n",
            b"INSERT a b c\n",
            b"LOOKUP\n",
            b"LOOKUP a b\n",
            b"FOO x\n",
            b"insert a b\n",
            b"INSERT  a b\n",
            b"LOOKUP alice \n",
            b" LOOKUP alice\n",
            b"INSERTa b c\n",
        ];
        for line in malformed {
            assert!(
                matches!(parse_command(line), Err(LogKvError::Protocol(_))),
                "accepted {:?}",
                String::from_utf8_lossy(line)
            );
        }
    }

    #[test]
    fn test_rejects_delimiter_in_key() {
        assert!(parse_command(b"INSERT a|b c\n").is_err());
        assert!(parse_command(b"LOOKUP a|b\n").is_err());
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        assert!(parse_command(b"LOOKUP \xff\xfe\n").is_err());
    }

    #[test]
    fn test_command_to_line() {
        let insert = Command::Insert {
            key: "alice".to_string(),
            value: "secret123".to_string(),
        };
        assert_eq!(insert.to_line(), "INSERT alice secret123\n");
        assert_eq!(parse_command(insert.to_line().as_bytes()).unwrap(), insert);
    }

    #[test]
    fn test_response_serialization() {
        assert_eq!(Response::Ok.to_bytes(), b"OK\n");
        assert_eq!(Response::Value("secret123".to_string()).to_bytes(), b"secret123\n");
        assert_eq!(Response::NotFound.to_bytes(), b"NOT_FOUND\n");
        assert_eq!(Response::Error.to_bytes(), b"ERROR\n");
    }
}
