//! fiesta — operator CLI for the reward code ledger
//!
//! One-shot commands against the snapshot in the data directory: mint and
//! manage codes, assign prizes, ban participants, run test redemptions.
//! Front ends (chat bots, web forms) use the library API instead.

use clap::{Parser, Subcommand};
use fiesta::{Ledger, LedgerConfig, LedgerError, LedgerEvent};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Fiesta version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "fiesta", version, about = "Single-use reward code ledger")]
struct Args {
    /// Data directory holding the ledger snapshot
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate fresh codes with the given prefix
    Gen {
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        amount: u32,
        prefix: String,
    },

    /// Add pre-made codes
    Add {
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Delete codes, claimed or not
    Del {
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Set the prize text for one code
    Prize {
        code: String,
        #[arg(required = true)]
        prize: Vec<String>,
    },

    /// Assign prize lines to the last generated batch
    Assign {
        /// File with one prize per line; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Explicit target codes instead of the last batch
        #[arg(short, long)]
        codes: Vec<String>,
    },

    /// List unredeemed codes in creation order
    List,

    /// Show one code in full
    Show { code: String },

    /// Show ledger counters
    Stats,

    /// Show the leaderboard
    Top {
        #[arg(default_value = "20")]
        limit: usize,
    },

    /// Ban a participant
    Ban { user: i64 },

    /// Lift a ban
    Unban { user: i64 },

    /// Start a new epoch: everyone may win again
    Reset,

    /// Redeem a code on behalf of a participant
    Redeem {
        user: i64,
        handle: String,
        code: String,
    },

    /// Record a participant as seen
    Note { user: i64 },

    /// Record a proof-of-claim submission
    Proof { user: i64, handle: String },
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fiesta=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let config = LedgerConfig {
        data_dir: args.data_dir,
        ..Default::default()
    };
    let (ledger, mut events) = match Ledger::open(config) {
        Ok(opened) => opened,
        Err(err) => {
            error!("Failed to open ledger: {}", err);
            std::process::exit(1);
        }
    };
    info!(
        "fiesta v{} | snapshot {}",
        VERSION,
        ledger.snapshot_path().display()
    );

    if let Err(err) = run(&ledger, args.command).await {
        error!("{}", err);
        std::process::exit(1);
    }
    drain_events(&mut events);
}

async fn run(ledger: &Ledger, command: Command) -> Result<(), LedgerError> {
    match command {
        Command::Gen { amount, prefix } => {
            let batch = ledger.generate_codes(amount, &prefix).await?;
            println!("Generated {} codes:", batch.len());
            for record in &batch {
                println!("  {}", record.code);
            }
        }

        Command::Add { codes } => {
            let outcome = ledger.add_codes(&codes).await?;
            println!("Added {} codes", outcome.added.len());
            if !outcome.skipped_invalid.is_empty() {
                println!("Skipped (bad format): {}", outcome.skipped_invalid.join(", "));
            }
        }

        Command::Del { codes } => {
            let deleted = ledger.delete_codes(&codes).await?;
            println!("Deleted {} codes", deleted);
        }

        Command::Prize { code, prize } => {
            let text = prize.join(" ");
            ledger.set_prize(&code, &text).await?;
            println!("Prize set on {}", fiesta::normalize(&code));
        }

        Command::Assign { file, codes } => {
            let lines = read_prize_lines(file.as_deref())?;
            let assigned = if codes.is_empty() {
                ledger.assign_prizes(&lines).await?
            } else {
                ledger.assign_prizes_to(&lines, &codes).await?
            };
            println!("Assigned {} of {} prize lines", assigned, lines.len());
        }

        Command::List => {
            let open = ledger.unredeemed_codes().await;
            if open.is_empty() {
                println!("No unredeemed codes.");
            }
            for record in &open {
                match &record.prize {
                    Some(prize) => println!("{}  [{}]", record.code, prize),
                    None => println!("{}  [no prize set]", record.code),
                }
            }
        }

        Command::Show { code } => match ledger.get_code(&code).await {
            Some(record) => {
                println!("Code:    {}", record.code);
                println!("Created: {}", record.created_at);
                match &record.prize {
                    Some(prize) => println!("Prize:   {}", prize),
                    None => println!("Prize:   (none)"),
                }
                if let (Some(user), Some(at)) = (record.redeemed_by, record.redeemed_at) {
                    let handle = record.redeemed_by_handle.as_deref().unwrap_or("-");
                    println!("Status:  redeemed by {} ({}) at {}", handle, user, at);
                } else {
                    println!("Status:  available");
                }
            }
            None => println!("Unknown code."),
        },

        Command::Stats => {
            let stats = ledger.stats().await;
            println!(
                "Codes:         {} total, {} redeemed, {} available",
                stats.total_codes, stats.redeemed, stats.available
            );
            println!(
                "Participants:  {} known, {} banned",
                stats.known_users, stats.banned
            );
            println!("Pending proof: {}", stats.pending_proof);
        }

        Command::Top { limit } => {
            let rows = ledger.leaderboard(limit).await;
            if rows.is_empty() {
                println!("Leaderboard is empty.");
            }
            for (i, row) in rows.iter().enumerate() {
                println!("{:>3}. {}  {}", i + 1, row.handle, row.score);
            }
        }

        Command::Ban { user } => {
            if ledger.ban(user).await? {
                println!("User {} banned", user);
            } else {
                println!("User {} was already banned", user);
            }
        }

        Command::Unban { user } => {
            if ledger.unban(user).await? {
                println!("User {} unbanned", user);
            } else {
                println!("User {} was not banned", user);
            }
        }

        Command::Reset => {
            let cleared = ledger.reset_epoch().await?;
            println!("Epoch reset, {} winner marks cleared", cleared);
        }

        Command::Redeem { user, handle, code } => {
            let receipt = ledger.redeem(user, &handle, &code).await?;
            match &receipt.prize {
                Some(prize) => println!("{} redeemed: {}", receipt.code, prize),
                None => println!("{} redeemed (no prize text assigned)", receipt.code),
            }
        }

        Command::Note { user } => {
            if ledger.note_user(user).await? {
                println!("User {} recorded", user);
            } else {
                println!("User {} already known", user);
            }
        }

        Command::Proof { user, handle } => {
            if ledger.submit_proof(user, &handle).await? {
                println!("Proof recorded for {}", handle);
            } else {
                println!("No proof was pending for {}", handle);
            }
        }
    }
    Ok(())
}

/// Prize lines from a file or stdin: trimmed, empty lines dropped.
fn read_prize_lines(path: Option<&Path>) -> Result<Vec<String>, LedgerError> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Log what a front end would have been told about this run.
fn drain_events(events: &mut mpsc::Receiver<LedgerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            LedgerEvent::Redeemed {
                handle,
                code,
                prize,
                ..
            } => {
                info!(
                    "notify: {} won {} ({})",
                    handle,
                    code,
                    prize.as_deref().unwrap_or("no prize text")
                );
            }
            LedgerEvent::ProofSubmitted { handle, .. } => {
                info!("notify: proof of claim from {}", handle);
            }
        }
    }
}
