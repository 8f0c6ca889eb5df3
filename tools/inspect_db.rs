//! Crash game database inspector
//!
//! Lists recent rounds and, optionally, one player's wallet and audit trail.

use clap::Parser;
use crashline::{
    game_store::{GameStore, RocksGameStore},
    RocksStorage,
};
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "inspect_db")]
#[command(about = "Inspect a crash game RocksDB directory", long_about = None)]
struct Args {
    /// Database directory
    #[arg(long, default_value = "./DB/crash_data")]
    db_path: String,

    /// Number of recent rounds to show
    #[arg(long, default_value = "10")]
    rounds: usize,

    /// Show wallet and transactions of this player
    #[arg(long)]
    player: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if !Path::new(&args.db_path).exists() {
        println!("No crash game data found at {}", args.db_path);
        return Ok(());
    }

    let store = RocksGameStore::new(RocksStorage::new(&args.db_path)?);

    println!("Crash Game Inspector");
    println!("====================");

    let rounds = store.recent_rounds(args.rounds)?;
    println!("Recent rounds ({}):", rounds.len());
    for round in &rounds {
        let status = match round.finalized_at {
            Some(at) => format!("finalized {}", at.to_rfc3339()),
            None => "open".to_string(),
        };
        println!(
            "   #{} crash {:.2}x | bets {} | cashouts {} | {}",
            round.round_id,
            round.crash_point,
            round.bets.len(),
            round.cashouts.len(),
            status
        );
        for cashout in &round.cashouts {
            println!(
                "      {} cashed out {:.8} at {:.2}x (${:.2})",
                cashout.player_id, cashout.crypto_amount, cashout.multiplier, cashout.usd_value
            );
        }
    }

    if let Some(player_id) = args.player {
        println!();
        match store.find_user(&player_id).await? {
            Some(user) => {
                println!("Wallet of {}:", user.id);
                for (currency, balance) in user.wallet.iter() {
                    println!("   {} {:.8}", currency, balance);
                }
            }
            None => println!("Player {} not found", player_id),
        }

        let txs = store.transactions_for(&player_id).await?;
        println!("Transactions ({}):", txs.len());
        for tx in txs {
            println!(
                "   {} {} {:.8} {} (${:.2} @ {}) {}",
                tx.timestamp.to_rfc3339(),
                tx.transaction_type,
                tx.crypto_amount,
                tx.currency,
                tx.usd_amount,
                tx.price_at_time,
                tx.transaction_hash
            );
        }
    }

    Ok(())
}
