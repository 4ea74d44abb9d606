//! Line-protocol command handling
//!
//! One command per line, whitespace separated:
//! - `SUBMIT <ns> <counter> <value> [SENDER <id>] [TIME <unix-secs>]`
//! - `QUERY <ns> <counter> [hint]` where hint is `total`, a resolution name
//!   or a span in seconds
//! - `LIST <ns>`
//! - `PING`
//!
//! Replies are a single line: `OK`, `PONG`, `ERR <message>` or one JSON
//! document.

use crate::aggregation::{RangeHint, Timestamp};
use crate::store::{parse_value, CounterBackend, StoreError, Submission};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("wrong number of arguments for '{0}'")]
    Arity(&'static str),

    #[error("invalid {field}: {value}")]
    InvalidArgument { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Submit {
        namespace: String,
        name: String,
        value: f64,
        sender: Option<String>,
        timestamp: Option<Timestamp>,
    },
    Query {
        namespace: String,
        name: String,
        hint: RangeHint,
    },
    List {
        namespace: String,
    },
    Ping,
}

impl Command {
    /// Parse one protocol line (without the line terminator)
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((cmd, args)) = args.split_first() else {
            return Err(CommandError::Empty);
        };

        match cmd.to_ascii_uppercase().as_str() {
            "SUBMIT" => Self::parse_submit(args),
            "QUERY" => Self::parse_query(args),
            "LIST" => match args {
                [namespace] => Ok(Command::List {
                    namespace: namespace.to_string(),
                }),
                _ => Err(CommandError::Arity("LIST")),
            },
            "PING" if args.is_empty() => Ok(Command::Ping),
            "PING" => Err(CommandError::Arity("PING")),
            _ => Err(CommandError::Unknown(cmd.to_string())),
        }
    }

    fn parse_submit(args: &[&str]) -> Result<Command, CommandError> {
        let [namespace, name, raw_value, options @ ..] = args else {
            return Err(CommandError::Arity("SUBMIT"));
        };
        let value = parse_value(raw_value).map_err(|_| CommandError::InvalidArgument {
            field: "value",
            value: raw_value.to_string(),
        })?;

        let mut sender = None;
        let mut timestamp = None;
        let mut rest = options;
        while let [option, argument, tail @ ..] = rest {
            match option.to_ascii_uppercase().as_str() {
                "SENDER" => sender = Some(argument.to_string()),
                "TIME" => {
                    let secs = argument.parse::<i64>().map_err(|_| CommandError::InvalidArgument {
                        field: "time",
                        value: argument.to_string(),
                    })?;
                    timestamp = Some(Timestamp::from_secs(secs));
                }
                _ => {
                    return Err(CommandError::InvalidArgument {
                        field: "option",
                        value: option.to_string(),
                    })
                }
            }
            rest = tail;
        }
        if !rest.is_empty() {
            return Err(CommandError::Arity("SUBMIT"));
        }

        Ok(Command::Submit {
            namespace: namespace.to_string(),
            name: name.to_string(),
            value,
            sender,
            timestamp,
        })
    }

    fn parse_query(args: &[&str]) -> Result<Command, CommandError> {
        let (namespace, name, hint) = match args {
            [namespace, name] => (namespace, name, RangeHint::Total),
            [namespace, name, hint] => (namespace, name, hint.parse::<RangeHint>().unwrap_or_default()),
            _ => return Err(CommandError::Arity("QUERY")),
        };
        Ok(Command::Query {
            namespace: namespace.to_string(),
            name: name.to_string(),
            hint,
        })
    }
}

/// One reply line
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Pong,
    Error(String),
    Json(String),
}

impl Reply {
    /// Wire form, newline terminated
    pub fn encode(&self) -> Vec<u8> {
        let mut out = match self {
            Reply::Ok => b"OK".to_vec(),
            Reply::Pong => b"PONG".to_vec(),
            Reply::Error(msg) => format!("ERR {}", msg).into_bytes(),
            Reply::Json(body) => body.clone().into_bytes(),
        };
        out.push(b'\n');
        out
    }

    fn json<T: serde::Serialize>(value: &T) -> Reply {
        match serde_json::to_string(value) {
            Ok(body) => Reply::Json(body),
            Err(e) => Reply::Error(format!("encoding failed: {}", e)),
        }
    }
}

impl From<StoreError> for Reply {
    fn from(err: StoreError) -> Self {
        Reply::Error(err.to_string())
    }
}

/// Execute a parsed command against a backend
pub async fn execute(backend: &dyn CounterBackend, cmd: Command) -> Reply {
    match cmd {
        Command::Submit {
            namespace,
            name,
            value,
            sender,
            timestamp,
        } => {
            let submission = Submission {
                namespace: &namespace,
                name: &name,
                value,
                sender: sender.as_deref().unwrap_or(""),
                timestamp,
            };
            match backend.submit(submission).await {
                Ok(_) => Reply::Ok,
                Err(e) => {
                    if !e.is_client_error() {
                        warn!(namespace = %namespace, name = %name, error = %e, "submit failed");
                    }
                    e.into()
                }
            }
        }

        Command::Query {
            namespace,
            name,
            hint,
        } => match backend.query(&namespace, &name, &hint).await {
            Ok(series) => Reply::json(&series),
            Err(e) => {
                if !e.is_client_error() {
                    warn!(namespace = %namespace, name = %name, error = %e, "query failed");
                }
                e.into()
            }
        },

        Command::List { namespace } => match backend.list(&namespace).await {
            Ok(names) => Reply::json(&names),
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "list failed");
                e.into()
            }
        },

        Command::Ping => Reply::Pong,
    }
}

/// Parse and execute one line
pub async fn handle_line(backend: &dyn CounterBackend, line: &str) -> Reply {
    match Command::parse(line) {
        Ok(cmd) => execute(backend, cmd).await,
        Err(e) => Reply::Error(e.to_string()),
    }
}
