//! seatctl - operator CLI for the seat registry
//!
//! Authenticates with a bearer token (`--token` / `SEATCTL_TOKEN`) or with
//! `--username` plus the `SEATCTL_PASSWORD` environment variable.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::io::IsTerminal;
use std::time::Duration;

use seatwatch::client::{ClientError, RegistryClient};
use seatwatch::ui::{Ui, UiMode};

#[derive(Parser, Debug)]
#[command(name = "seatctl", about = "Manage seats in the seat registry")]
struct Args {
    /// Registry base URL
    #[arg(long, env = "SEAT_REGISTRY_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    /// Bearer token from a previous `seatctl login`
    #[arg(long, env = "SEATCTL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Operator username (password is read from SEATCTL_PASSWORD)
    #[arg(long, env = "SEATCTL_USERNAME")]
    username: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    /// Print raw JSON instead of a table
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange credentials for a token and print it
    Login,
    /// List all seats
    List,
    /// Show one seat
    Get { seat: u32 },
    /// Create an empty seat
    Create { seat: u32 },
    /// Reserve an empty seat
    Reserve {
        seat: u32,
        /// Name recorded on the reservation (default Anonymous)
        #[arg(long)]
        user: Option<String>,
    },
    /// Release an occupied seat
    Release { seat: u32 },
    /// Partially update a seat record
    Update {
        seat: u32,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Clear user_name
        #[arg(long, conflicts_with = "user")]
        clear_user: bool,
    },
    /// Delete a seat record
    Delete { seat: u32 },
    /// Run the auto-release sweep now
    Sweep {
        /// Threshold in minutes (server default when omitted)
        #[arg(long)]
        minutes: Option<u32>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let mode = UiMode::parse(&args.ui)
        .ok_or_else(|| anyhow!("--ui must be auto, plain or pretty (got '{}')", args.ui))?;
    let ui = Ui::new(mode, std::io::stderr().is_terminal());

    let mut client = RegistryClient::new(&args.url, Duration::from_secs(args.timeout_secs));
    {
        let _stage = ui.stage("Authenticate");
        client = authenticate(client, &args)?;
    }

    match &args.command {
        Command::Login => {
            let token = client
                .token()
                .ok_or_else(|| anyhow!("no token issued"))?;
            println!("{token}");
        }
        Command::List => {
            let seats = {
                let _stage = ui.stage("Fetch seats");
                client.list().map_err(describe)?
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&seats)?);
            } else {
                print!("{}", ui.seat_table(&seats));
            }
        }
        Command::Get { seat } => {
            let seat = client.get(*seat).map_err(describe)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&seat)?);
            } else {
                print!("{}", ui.seat_table(std::slice::from_ref(&seat)));
            }
        }
        Command::Create { seat } => {
            let seat = client.create(*seat).map_err(describe)?;
            println!("created seat {}", seat.seat_number);
        }
        Command::Reserve { seat, user } => {
            let reply = client.reserve(*seat, user.as_deref()).map_err(describe)?;
            println!("{}", reply.message);
        }
        Command::Release { seat } => {
            let reply = client.release(*seat).map_err(describe)?;
            println!("{}", reply.message);
        }
        Command::Update {
            seat,
            status,
            user,
            clear_user,
        } => {
            let mut fields = Map::new();
            if let Some(status) = status {
                fields.insert("status".into(), json!(status));
            }
            if let Some(user) = user {
                fields.insert("user_name".into(), json!(user));
            }
            if *clear_user {
                fields.insert("user_name".into(), Value::Null);
            }
            if fields.is_empty() {
                return Err(anyhow!("nothing to update (use --status, --user or --clear-user)"));
            }
            let seat = client
                .update(*seat, &Value::Object(fields))
                .map_err(describe)?;
            print!("{}", ui.seat_table(std::slice::from_ref(&seat)));
        }
        Command::Delete { seat } => {
            client.delete(*seat).map_err(describe)?;
            println!("deleted seat {seat}");
        }
        Command::Sweep { minutes } => {
            let summary = {
                let _stage = ui.stage("Auto-release sweep");
                client.auto_release_check(*minutes).map_err(describe)?
            };
            println!("{}", summary.message);
            if !summary.released_seats.is_empty() {
                println!("released: {:?}", summary.released_seats);
            }
        }
    }
    Ok(())
}

fn authenticate(client: RegistryClient, args: &Args) -> Result<RegistryClient> {
    if let Some(token) = &args.token {
        if !matches!(args.command, Command::Login) {
            return Ok(client.with_token(token.clone()));
        }
    }
    let username = args
        .username
        .as_deref()
        .ok_or_else(|| anyhow!("set --token/SEATCTL_TOKEN or --username with SEATCTL_PASSWORD"))?;
    let password = std::env::var("SEATCTL_PASSWORD")
        .map_err(|_| anyhow!("SEATCTL_PASSWORD must be set when using --username"))?;
    let mut client = client;
    client.login(username, &password).map_err(describe)?;
    Ok(client)
}

/// Surface the server's error body when there is one.
fn describe(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::Status(code, body) => {
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .or_else(|| v.get("detail"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(body);
            anyhow!("registry returned {}: {}", code, detail)
        }
        other => anyhow!(other),
    }
}
