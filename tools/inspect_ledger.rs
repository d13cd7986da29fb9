//! Print an account's stored balance, its recent bets and the sync checkpoints.

use chipsettle::common::traits::{BalanceRepository, CheckpointRepository};
use chipsettle::common::types::{stream_name, AccountKey};
use chipsettle::daemon::TRACKED_EVENTS;
use chipsettle::RocksRepository;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "inspect_ledger")]
#[command(about = "Inspect a chipsettle ledger database", long_about = None)]
struct Args {
    /// Database directory
    #[arg(long, default_value = "./DB/settler_data")]
    db_path: String,

    #[arg(long, default_value = "1")]
    chain_id: u64,

    /// Account address to inspect
    #[arg(long)]
    address: Option<String>,

    /// Contract whose checkpoints to print
    #[arg(long)]
    contract: Option<String>,

    #[arg(long, default_value = "10")]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let repo = RocksRepository::open(&args.db_path, false)?;

    if let Some(contract) = &args.contract {
        println!("Checkpoints for {}:", contract);
        for kind in TRACKED_EVENTS.iter() {
            let name = stream_name(contract, kind);
            match repo.load_checkpoint(&name).await? {
                Some(cp) => match cp.block_sync {
                    Some(synced) => println!(
                        "  {:<60} created={} synced={}",
                        name, cp.block_created, synced
                    ),
                    None => println!("  {:<60} created={} (nothing synced)", name, cp.block_created),
                },
                None => println!("  {:<60} (never synced)", name),
            }
        }
    }

    if let Some(address) = &args.address {
        let key = AccountKey::new(args.chain_id, address);
        match repo.load_balance(&key).await? {
            Some(balance) => {
                println!("Balance {}:", key);
                println!("  withdrawable:         {}", balance.withdrawable);
                println!("  sluggish:             {}", balance.sluggish);
                println!("  bought total:         {}", balance.bought_total);
                println!("  airdropped total:     {}", balance.airdropped_total);
                println!("  plays since withdraw: {}", balance.plays_since_withdraw);
                println!("  total plays:          {}", balance.total_plays);
                println!("  withdrawn total:      {}", balance.withdrawn_total);
                if balance.pending_payout > 0 {
                    println!("  pending payout:       {}", balance.pending_payout);
                }
            }
            None => println!("No balance stored for {}", key),
        }

        let bets = repo.recent_bets(&key, args.limit).await?;
        println!("Recent bets ({}):", bets.len());
        for bet in bets {
            println!(
                "  #{:<6} {:<10} wager={} pick={} result={} won={} legit={}",
                bet.sequence,
                bet.game,
                bet.wager,
                bet.wanted_outcome,
                bet.outcome_value,
                bet.amount_won,
                bet.fairness.legitimate
            );
        }
    }

    if args.address.is_none() && args.contract.is_none() {
        println!(
            "Nothing to inspect; pass --address and/or --contract (streams: {})",
            TRACKED_EVENTS
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}
