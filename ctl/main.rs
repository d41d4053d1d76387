#![forbid(unsafe_code)]

//! `craftplane-ctl`: command-line client for the `craftplane` control
//! channel.
//!
//! Speaks the same JSON frames as any other client over the WebSocket at
//! `/socket`. Defined without the library crate so it only depends on the
//! wire format.

use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(
    name = "craftplane-ctl",
    about = "Command-line client for the craftplane control channel",
    version,
    long_about = None
)]
struct Cli {
    /// Control channel URL.
    #[arg(long, default_value = "ws://127.0.0.1:8080/socket")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a session and follow it until it closes or fails.
    Create {
        /// Server name.
        name: String,
        /// Artifact version.
        version: String,
        /// Worker port.
        port: u16,
        /// Heap size in megabytes.
        memory: u32,
        /// Worker type (`paper`, `spigot`).
        #[arg(value_name = "TYPE")]
        kind: String,
    },

    /// Follow a session's console until it closes or fails.
    Watch {
        /// Session identity.
        identity: String,
    },

    /// Write a console command to a running session.
    Send {
        /// Session identity.
        identity: String,
        /// Command text.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Print a session's log.
    Log {
        /// Session identity.
        identity: String,
    },

    /// List active sessions.
    List,
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(&args)) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Failed to talk to server: {err}");
            eprintln!("Is craftplane listening at '{}'?", args.url);
            std::process::exit(1);
        }
    }
}

/// Execute one command; returns the process exit code.
async fn run(args: &Cli) -> std::result::Result<i32, BoxError> {
    let (mut socket, _) = connect_async(args.url.as_str()).await?;

    let requests = match &args.command {
        Command::Create {
            name,
            version,
            port,
            memory,
            kind,
        } => vec![json!({
            "event": "create",
            "data": {"name": name, "version": version, "port": port, "memory": memory, "type": kind},
        })],
        // The `list` reply tells whether the subscription found a session.
        Command::Watch { identity } => vec![
            json!({"event": "subscribe", "data": {"identity": identity}}),
            json!({"event": "list", "data": {}}),
        ],
        Command::Send { identity, message } => vec![json!({
            "event": "send",
            "data": {"identity": identity, "message": message.join(" ")},
        })],
        // The `list` reply marks the end of the log replay.
        Command::Log { identity } => vec![
            json!({"event": "log", "data": {"identity": identity}}),
            json!({"event": "list", "data": {}}),
        ],
        Command::List => vec![json!({"event": "list", "data": {}})],
    };

    for request in requests {
        socket.send(Message::Text(request.to_string().into())).await?;
    }

    if matches!(args.command, Command::Send { .. }) {
        socket.close(None).await?;
        return Ok(0);
    }

    while let Some(frame) = socket.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let message: Value = serde_json::from_str(text.as_str())?;
        let event = message.get("event").and_then(Value::as_str).unwrap_or("");
        let data = message.get("data").cloned().unwrap_or(Value::Null);
        let field = |key: &str| data.get(key).and_then(Value::as_str).unwrap_or("").to_owned();

        match event {
            "init" => println!("Session {} created", field("identity")),
            "console" => println!("[{}] {}", field("identity"), field("message")),
            "close" => {
                println!("Session {} closed", field("identity"));
                return Ok(0);
            }
            "fail" => {
                eprintln!("Session {} failed", field("identity"));
                return Ok(1);
            }
            "err" => {
                eprintln!("Error: {}", field("reason"));
                return Ok(1);
            }
            "sessions" => {
                let sessions = data.get("sessions").cloned().unwrap_or(Value::Null);
                match &args.command {
                    Command::Watch { identity } => {
                        if lists_identity(&sessions, identity) {
                            continue;
                        }
                        eprintln!("Session {identity} not found");
                        return Ok(1);
                    }
                    Command::List => {
                        println!("{}", serde_json::to_string_pretty(&sessions).unwrap_or_default());
                    }
                    _ => {}
                }
                return Ok(0);
            }
            other => eprintln!("Ignoring unexpected event '{other}'"),
        }
    }

    Ok(0)
}

/// Whether a `sessions` payload contains `identity`.
fn lists_identity(sessions: &Value, identity: &str) -> bool {
    sessions.as_array().is_some_and(|sessions| {
        sessions
            .iter()
            .any(|session| session.get("identity").and_then(Value::as_str) == Some(identity))
    })
}
