//! Command-line interface for laundrymeter.
//!
//! Talks to the daemon's HTTP API to show the machine state and manage
//! notification subscriptions.

use std::env;

use anyhow::{Context, Result, bail};
use time::format_description::well_known::Rfc3339;

use laundrymeter::api_client;
use laundrymeter::user::Channel;

fn usage() -> ! {
    eprintln!("Usage: laundrymeter-cli <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                       Is the washing machine running?");
    eprintln!("  debug                        Latest meter readings");
    eprintln!("  history <count>              Most recent samples, newest first");
    eprintln!("  subscribers <email|chat>     Who will be notified");
    eprintln!("  notify <email|chat> <on|off> Subscribe to or cancel the next notification");
    eprintln!("  register-chat                Link to bind a chat to your account");
    eprintln!("  token                        Issue an API token");
    eprintln!();
    eprintln!("Environment:");
    eprintln!(
        "  LAUNDRYMETER_API_URL       API base URL (default: {})",
        api_client::DEFAULT_BASE_URL
    );
    eprintln!("  LAUNDRYMETER_TOKEN         API token");
    eprintln!("  LAUNDRYMETER_USER          Directory username, when no token is set");
    eprintln!("  LAUNDRYMETER_PASSWORD      Directory password");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
    }

    let client = make_client()?;
    let rest = &args[2..];

    match args[1].as_str() {
        "status" => cmd_status(&client).await?,
        "debug" => cmd_debug(&client).await?,
        "history" => {
            let count = match rest {
                [count] => count
                    .parse()
                    .with_context(|| format!("invalid count: {count}"))?,
                _ => usage(),
            };
            cmd_history(&client, count).await?
        }
        "subscribers" => match rest {
            [channel] => cmd_subscribers(&client, parse_channel(channel)?).await?,
            _ => usage(),
        },
        "notify" => match rest {
            [channel, toggle] => {
                let enabled = match toggle.as_str() {
                    "on" => true,
                    "off" => false,
                    other => bail!("expected on or off, got {other}"),
                };
                cmd_notify(&client, parse_channel(channel)?, enabled).await?
            }
            _ => usage(),
        },
        "register-chat" => {
            let registration = client.register_chat().await?;
            println!("{}", registration.link);
        }
        "token" => {
            let token = client.issue_token().await?;
            println!("{}", token.token);
        }
        command => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client from the LAUNDRYMETER_* environment.
fn make_client() -> Result<api_client::Client> {
    let client = match env::var("LAUNDRYMETER_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    };

    if let Ok(token) = env::var("LAUNDRYMETER_TOKEN") {
        return Ok(client.with_token(token));
    }
    match (env::var("LAUNDRYMETER_USER"), env::var("LAUNDRYMETER_PASSWORD")) {
        (Ok(user), Ok(password)) => Ok(client.with_basic_auth(user, password)),
        (Ok(_), Err(_)) => bail!("LAUNDRYMETER_USER is set but LAUNDRYMETER_PASSWORD is not"),
        _ => Ok(client),
    }
}

fn parse_channel(name: &str) -> Result<Channel> {
    name.parse()
        .map_err(|_| anyhow::anyhow!("unknown channel {name}, expected email or chat"))
}

async fn cmd_status(client: &api_client::Client) -> Result<()> {
    let status = client.get_machine().await?;
    let state = if status.running { "running" } else { "idle" };

    println!("State:    {state}");
    if let Some(since) = status.last_changed {
        println!("Since:    {}", since.format(&Rfc3339)?);
    }
    println!("Sampled:  {}", status.timestamp.format(&Rfc3339)?);
    Ok(())
}

async fn cmd_debug(client: &api_client::Client) -> Result<()> {
    let d = client.get_machine_debug().await?;

    println!("Sampled:  {}", d.timestamp.format(&Rfc3339)?);
    println!("Running:  {}", d.running);
    println!("Power:    {:.1} W", d.power);
    println!("Voltage:  {:.1} V", d.voltage);
    println!("Current:  {:.3} A", d.current);
    println!("Total:    {:.1} Wh", d.total_energy);
    Ok(())
}

async fn cmd_history(client: &api_client::Client, count: usize) -> Result<()> {
    let samples = client.get_history(count).await?;
    if samples.is_empty() {
        println!("(no samples)");
    }
    for s in &samples {
        println!(
            "{}  {:<7}  {:>8.1} W",
            s.timestamp.format(&Rfc3339)?,
            if s.running { "running" } else { "idle" },
            s.power
        );
    }
    Ok(())
}

async fn cmd_subscribers(client: &api_client::Client, channel: Channel) -> Result<()> {
    let subscribers = client.get_subscribers(channel).await?;
    if subscribers.names.is_empty() {
        println!("Nobody is waiting for a {channel} notification.");
    }
    for name in &subscribers.names {
        println!("  - {name}");
    }
    Ok(())
}

async fn cmd_notify(client: &api_client::Client, channel: Channel, enabled: bool) -> Result<()> {
    let subscription = client.set_subscription(channel, enabled).await?;
    if subscription.enabled {
        println!("You will get a {channel} notification when the laundry is ready.");
    } else {
        println!("{channel} notification cancelled.");
    }
    Ok(())
}
