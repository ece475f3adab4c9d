use clap::Parser;
use meshcall_lib::utils::parse_turn_server;
use meshcall_lib::{run, CallConfig, Command, RunOptions};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Голосовой mesh-звонок из терминала.
///
/// Команды читаются со stdin: `call <id>`, `invite <id>`, `accept`, `reject`,
/// `accept-invite`, `reject-invite`, `tone <digit>`, `leave`, `quit`.
#[derive(Parser, Debug)]
#[command(name = "meshcall", version, about)]
struct Args {
    /// Сервер сигнализации
    #[arg(long, default_value = "ws://localhost:3000")]
    server: String,

    /// Наш идентификатор
    #[arg(long)]
    user: String,

    /// TURN сервер в виде user:pass@host:port
    #[arg(long)]
    turn: Option<String>,

    /// Grace период перед переподключением, в секундах
    #[arg(long)]
    grace_secs: Option<u64>,

    /// Максимум попыток переподключения
    #[arg(long)]
    max_reconnects: Option<u32>,

    /// Интервал сторожевой проверки, в секундах
    #[arg(long)]
    watchdog_secs: Option<u64>,
}

fn build_config(args: &Args) -> Result<CallConfig, Box<dyn std::error::Error>> {
    let mut config = CallConfig::default();
    if let Some(turn) = &args.turn {
        let server = parse_turn_server(turn).ok_or("expected --turn user:pass@host:port")?;
        config = config.with_ice_servers(vec![server])?;
    }
    if let Some(secs) = args.grace_secs {
        config.grace_period = Duration::from_secs(secs);
    }
    if let Some(n) = args.max_reconnects {
        config.max_reconnect_attempts = n;
    }
    if let Some(secs) = args.watchdog_secs {
        config.watchdog_interval = Duration::from_secs(secs);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = build_config(&args)?;

    let mut handle = run(RunOptions {
        server_url: args.server.clone(),
        user_id: args.user.clone(),
        config,
    })
    .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    handle.command(Command::Quit)?;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        let quit = command == Command::Quit;
                        handle.command(command)?;
                        if quit {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
            event = handle.next_event() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    handle.join().await;
    Ok(())
}
