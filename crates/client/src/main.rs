use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use coinstreak_client::identity;
use coinstreak_client::{PlayerCommand, SessionUpdate, SyncConfig};
use coinstreak_engine::{FlipOutcome, UpgradeKind};

/// Headless Coinstreak: play the coin-flip game from a terminal while the
/// session syncs its state to a coinstreak-server.
#[derive(Debug, Parser)]
#[command(name = "coinstreak", version)]
struct Args {
    /// WebSocket base URL of the state server.
    #[arg(long, default_value = "ws://127.0.0.1:39401")]
    server: String,

    /// Game-state id. Defaults to the durable per-install id.
    #[arg(long)]
    id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let state_id = args.id.unwrap_or_else(identity::load_or_create_state_id);
    println!("coinstreak — state id {state_id}");
    println!("commands: flip | buy <chance|time|combo|worth|auto> | auto | ok | stats | quit");

    let (session, mut updates) = coinstreak_client::session::spawn(SyncConfig::new(
        args.server,
        state_id,
    ));

    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            print_update(&update);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "flip" | "f" => session.command(PlayerCommand::Flip),
            "auto" => session.command(PlayerCommand::ToggleAutoFlip),
            "ok" => session.command(PlayerCommand::DismissWin),
            "stats" | "s" => session.command(PlayerCommand::Stats),
            "quit" | "q" => break,
            "help" | "?" => {
                println!(
                    "flip | buy <chance|time|combo|worth|auto> | auto | ok | stats | quit"
                );
            }
            _ if line.starts_with('/') => {
                session.command(PlayerCommand::Cheat(line.to_string()));
            }
            _ => match line.strip_prefix("buy ").and_then(parse_track) {
                Some(kind) => session.command(PlayerCommand::Buy(kind)),
                None => println!("unknown command: {line} (try `help`)"),
            },
        }
    }

    session.command(PlayerCommand::Shutdown);
    printer.await?;
    Ok(())
}

fn parse_track(name: &str) -> Option<UpgradeKind> {
    match name.trim() {
        "chance" => Some(UpgradeKind::HeadsChance),
        "time" => Some(UpgradeKind::FlipTime),
        "combo" => Some(UpgradeKind::ComboMult),
        "worth" => Some(UpgradeKind::BaseWorth),
        "auto" => Some(UpgradeKind::AutoFlip),
        _ => None,
    }
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Loaded { restored: true } => println!("progress restored from server"),
        SessionUpdate::Loaded { restored: false } => println!("starting fresh"),
        SessionUpdate::Flipped(FlipOutcome::Heads {
            payout_cents,
            streak,
            ..
        }) => {
            println!("HEADS! +{} (streak {streak})", format_cents(*payout_cents));
        }
        SessionUpdate::Flipped(FlipOutcome::Tails) => println!("tails."),
        SessionUpdate::Purchased { kind, price_cents } => {
            println!("bought {kind:?} for {}", format_cents(*price_cents));
        }
        SessionUpdate::PurchaseRefused { kind, reason } => {
            println!("cannot buy {kind:?}: {reason}");
        }
        SessionUpdate::AutoFlip { enabled: true } => println!("auto-flip on"),
        SessionUpdate::AutoFlip { enabled: false } => println!("auto-flip off"),
        SessionUpdate::CheatApplied(cheat) => println!("cheat applied: {cheat:?}"),
        SessionUpdate::WinPrompt => {
            println!("*** 10 HEADS IN A ROW — YOU WIN! type `ok` to keep playing ***");
        }
        SessionUpdate::Stats(snap) => {
            println!(
                "heads {} / tails {} | streak {} (best {}) | cash {} | odds {:.0}% | flip {}ms",
                snap.heads,
                snap.tails,
                snap.heads_in_a_row,
                snap.max_heads_streak,
                format_cents(snap.cash_cents),
                snap.heads_chance * 100.0,
                snap.flip_time_ms,
            );
        }
    }
}

fn format_cents(cents: u64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}
