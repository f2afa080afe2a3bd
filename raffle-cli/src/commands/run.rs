use crate::config::{SimulationConfig, CONFIG_FILE, LEDGER_FILE, STATUS_FILE};
use crate::coordinator::LocalCoordinator;
use crate::keeper::Keeper;
use crate::ledger::{Ledger, LedgerError, LedgerPayout, POT_ACCOUNT};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Table};
use raffle_core::{ParticipantId, Raffle, RaffleEvent, RequestId, RoundSnapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub round_number: u64,
    pub request_id: Option<RequestId>,
    pub winner: ParticipantId,
    pub payout: u64,
}

/// Outcome of the last `raffle run`, persisted to the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub raffle_id: Uuid,
    pub subscription_id: u64,
    pub winners: Vec<WinnerRecord>,
    pub snapshot: RoundSnapshot,
    /// Entries of an unresolved round paid back when the run ended
    #[serde(default)]
    pub refunded: usize,
    pub finished_at: DateTime<Utc>,
}

pub fn init(data_dir: &Path, force: bool) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    SimulationConfig::default().save(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Pay the entry fee into the pot, then enter the raffle.
///
/// The fee is refunded if the raffle refuses the entry.
pub async fn buy_entry(ledger: &Ledger, raffle: &Raffle, participant: &str) -> Result<()> {
    let fee = raffle.entry_fee();

    match ledger.transfer(participant, POT_ACCOUNT, fee, "entry").await {
        Ok(()) => {}
        Err(LedgerError::InsufficientFunds { available, .. }) => bail!(
            "'{}' cannot pay the entry fee of {} (balance {}). Fund it with: raffle fund {} <amount>",
            participant,
            fee,
            available,
            participant
        ),
        Err(e) => return Err(e.into()),
    }

    if let Err(e) = raffle.enter(ParticipantId::from(participant), fee).await {
        ledger
            .transfer(POT_ACCOUNT, participant, fee, "refund")
            .await
            .context("Failed to refund rejected entry")?;
        return Err(e.into());
    }

    Ok(())
}

async fn wait_for_winner(
    events: &mut broadcast::Receiver<RaffleEvent>,
    pending: &mut Option<RequestId>,
) -> Option<WinnerRecord> {
    loop {
        match events.recv().await {
            Ok(RaffleEvent::Entered { participant, amount }) => {
                println!("  {} entered ({})", participant, amount);
            }
            Ok(RaffleEvent::RandomnessRequested { request_id }) => {
                println!("  Round closed, waiting on randomness request {}", request_id);
                *pending = Some(request_id);
            }
            Ok(RaffleEvent::WinnerPicked {
                winner,
                payout,
                round_number,
            }) => {
                return Some(WinnerRecord {
                    round_number,
                    request_id: pending.take(),
                    winner,
                    payout,
                });
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

pub async fn run(
    data_dir: &Path,
    entries: &[String],
    rounds: u32,
    round_timeout: Duration,
) -> Result<()> {
    let config = SimulationConfig::load_or_default(&data_dir.join(CONFIG_FILE))?;
    let ledger = Arc::new(Ledger::open(&data_dir.join(LEDGER_FILE)).await?);

    let coordinator = Arc::new(LocalCoordinator::new(config.coordinator_base_fee));
    let subscription_id = coordinator.create_subscription("raffle-cli");
    coordinator.fund_subscription(subscription_id, config.subscription_funding)?;

    let raffle = Arc::new(Raffle::with_system_clock(
        config.raffle.clone().with_subscription(subscription_id),
        coordinator.clone(),
        Arc::new(LedgerPayout::new(ledger.clone())),
    )?);
    coordinator.add_consumer(subscription_id, raffle.id())?;

    println!("Raffle {}", raffle.id());
    println!(
        "Entry fee: {}, interval: {:?}, rounds: {}",
        raffle.entry_fee(),
        raffle.interval(),
        rounds
    );
    println!(
        "Subscription {} (fee {} per fulfilment)",
        subscription_id,
        coordinator.base_fee()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut events = raffle.subscribe();

    let keeper = tokio::spawn(
        Keeper::new(raffle.clone(), config.keeper_poll).run(shutdown_rx.clone()),
    );
    let server = tokio::spawn(coordinator.clone().serve(
        raffle.clone(),
        config.block_time,
        shutdown_rx,
    ));

    let mut winners = Vec::new();
    let mut pending = None;
    let mut outcome = Ok(());

    for round in 1..=rounds {
        println!();
        println!("Round {}", round);

        if let Err(e) = enter_all(&ledger, &raffle, entries).await {
            outcome = Err(e);
            break;
        }

        match tokio::time::timeout(round_timeout, wait_for_winner(&mut events, &mut pending)).await
        {
            Ok(Some(record)) => {
                println!("  Winner: {} takes {}", record.winner, record.payout);
                winners.push(record);
            }
            Ok(None) => {
                outcome = Err(anyhow::anyhow!("Raffle event stream closed"));
                break;
            }
            Err(_) => {
                let snapshot = raffle.snapshot().await;
                outcome = Err(anyhow::anyhow!(
                    "Round {} did not resolve within {}s (state: {}, pending request: {:?}, unanswered: {})",
                    round,
                    round_timeout.as_secs(),
                    snapshot.status,
                    snapshot.pending_request,
                    coordinator.pending_requests().len()
                ));
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = keeper.await {
        tracing::error!("Keeper task failed: {}", e);
    }
    if let Err(e) = server.await {
        tracing::error!("Coordinator task failed: {}", e);
    }

    // entries of a round that never resolved get their fee back
    let refunded = refund_unresolved(&ledger, &raffle).await;
    if refunded > 0 {
        println!("Refunded {} unresolved entries", refunded);
    }

    let report = RunReport {
        raffle_id: raffle.id(),
        subscription_id,
        winners,
        snapshot: raffle.snapshot().await,
        refunded,
        finished_at: Utc::now(),
    };
    save_report(data_dir, &report)?;

    println!();
    print_winners(&report.winners);
    if let Some(subscription) = coordinator.subscription(subscription_id) {
        println!(
            "Subscription {}: {} fulfilled, balance {}",
            subscription.id, subscription.fulfilled, subscription.balance
        );
    }

    outcome
}

/// Return the entry fee of everyone still in the round to their account.
///
/// Only call once nothing can resolve the round any more.
async fn refund_unresolved(ledger: &Ledger, raffle: &Raffle) -> usize {
    let fee = raffle.entry_fee();
    let mut refunded = 0;

    for participant in raffle.participants().await {
        match ledger
            .transfer(POT_ACCOUNT, participant.as_str(), fee, "refund")
            .await
        {
            Ok(()) => refunded += 1,
            Err(e) => tracing::warn!("Could not refund {} to {}: {}", fee, participant, e),
        }
    }

    refunded
}

async fn enter_all(ledger: &Ledger, raffle: &Raffle, entries: &[String]) -> Result<()> {
    for participant in entries {
        buy_entry(ledger, raffle, participant).await?;
    }
    Ok(())
}

pub fn show_status(data_dir: &Path) -> Result<()> {
    let Some(report) = load_report(data_dir)? else {
        println!("No raffle has been run yet. Start one with: raffle run --entry <name>");
        return Ok(());
    };

    let snapshot = &report.snapshot;
    println!("Raffle: {}", report.raffle_id);
    println!("Subscription: {}", report.subscription_id);
    println!("Finished: {}", report.finished_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Entry fee: {}", snapshot.entry_fee);
    println!("Interval: {:?}", snapshot.interval);
    println!("State: {}", snapshot.status);
    if let Some(request_id) = snapshot.pending_request {
        println!("Pending request: {}", request_id);
    }
    println!("Rounds resolved: {}", snapshot.round_number);
    println!("Entries in open round: {}", snapshot.participants.len());
    println!("Pooled balance: {}", snapshot.pooled_balance);
    if report.refunded > 0 {
        println!("Refunded entries: {}", report.refunded);
    }
    println!(
        "Recent winner: {}",
        snapshot
            .recent_winner
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "Last resolution: {}",
        snapshot.last_resolution.format("%Y-%m-%d %H:%M:%S")
    );

    println!();
    print_winners(&report.winners);
    Ok(())
}

fn print_winners(winners: &[WinnerRecord]) {
    if winners.is_empty() {
        println!("No rounds resolved");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Round", "Request", "Winner", "Payout"]);

    for record in winners {
        table.add_row(vec![
            record.round_number.to_string(),
            record
                .request_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.winner.to_string(),
            record.payout.to_string(),
        ]);
    }

    println!("{}", table);
}

fn save_report(data_dir: &Path, report: &RunReport) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(data_dir.join(STATUS_FILE), content)?;
    Ok(())
}

fn load_report(data_dir: &Path) -> Result<Option<RunReport>> {
    let path = data_dir.join(STATUS_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)?;
    let report = serde_json::from_str(&content)
        .with_context(|| format!("Corrupt status file {}", path.display()))?;
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_core::{ManualClock, RaffleConfig, RoundStatus};
    use tempfile::tempdir;

    async fn setup() -> (Arc<Ledger>, Arc<LocalCoordinator>, Raffle, Arc<ManualClock>) {
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let coordinator = Arc::new(LocalCoordinator::with_seed(1, [3u8; 32]));
        let subscription_id = coordinator.create_subscription("test");
        coordinator.fund_subscription(subscription_id, 10).unwrap();

        let clock = Arc::new(ManualClock::default());
        let raffle = Raffle::new(
            RaffleConfig::new(10, Duration::from_secs(60)).with_subscription(subscription_id),
            coordinator.clone(),
            Arc::new(LedgerPayout::new(ledger.clone())),
            clock.clone(),
        )
        .unwrap();
        coordinator
            .add_consumer(subscription_id, raffle.id())
            .unwrap();

        (ledger, coordinator, raffle, clock)
    }

    #[tokio::test]
    async fn test_entries_move_fees_into_pot() {
        let (ledger, _, raffle, _) = setup().await;
        ledger.deposit("alice", 25).await.unwrap();

        buy_entry(&ledger, &raffle, "alice").await.unwrap();
        buy_entry(&ledger, &raffle, "alice").await.unwrap();

        assert_eq!(ledger.balance("alice").await.unwrap(), 5);
        assert_eq!(ledger.balance(POT_ACCOUNT).await.unwrap(), 20);
        assert_eq!(raffle.participant_count().await, 2);

        let err = buy_entry(&ledger, &raffle, "alice").await.unwrap_err();
        assert!(err.to_string().contains("cannot pay"));
        assert_eq!(raffle.participant_count().await, 2);
    }

    #[tokio::test]
    async fn test_rejected_entry_is_refunded() {
        let (ledger, _, raffle, clock) = setup().await;
        ledger.deposit("alice", 10).await.unwrap();
        ledger.deposit("bob", 10).await.unwrap();

        buy_entry(&ledger, &raffle, "alice").await.unwrap();
        clock.advance(Duration::from_secs(61));
        raffle.close_round_and_request_randomness().await.unwrap();

        assert!(buy_entry(&ledger, &raffle, "bob").await.is_err());
        assert_eq!(ledger.balance("bob").await.unwrap(), 10);
        assert_eq!(ledger.balance(POT_ACCOUNT).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_unresolved_round_is_refunded() {
        let (ledger, _, raffle, clock) = setup().await;
        for name in ["alice", "bob"] {
            ledger.deposit(name, 10).await.unwrap();
            buy_entry(&ledger, &raffle, name).await.unwrap();
        }
        clock.advance(Duration::from_secs(61));
        raffle.close_round_and_request_randomness().await.unwrap();

        assert_eq!(refund_unresolved(&ledger, &raffle).await, 2);
        assert_eq!(ledger.balance("alice").await.unwrap(), 10);
        assert_eq!(ledger.balance("bob").await.unwrap(), 10);
        assert_eq!(ledger.balance(POT_ACCOUNT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_aborted_by_unfunded_entrant_returns_fees() {
        let temp_dir = tempdir().unwrap();
        let fee = SimulationConfig::default().raffle.entry_fee;
        {
            let ledger = Ledger::open(&temp_dir.path().join(LEDGER_FILE)).await.unwrap();
            ledger.deposit("alice", fee).await.unwrap();
        }

        let entries = vec!["alice".to_string(), "bob".to_string()];
        let err = run(temp_dir.path(), &entries, 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'bob' cannot pay"));

        let ledger = Ledger::open(&temp_dir.path().join(LEDGER_FILE)).await.unwrap();
        assert_eq!(ledger.balance("alice").await.unwrap(), fee);
        assert_eq!(ledger.balance(POT_ACCOUNT).await.unwrap(), 0);

        let report = load_report(temp_dir.path()).unwrap().unwrap();
        assert_eq!(report.refunded, 1);
        assert!(report.winners.is_empty());
    }

    #[tokio::test]
    async fn test_full_round_pays_winner_from_pot() {
        let (ledger, coordinator, raffle, clock) = setup().await;
        for name in ["alice", "bob", "carol"] {
            ledger.deposit(name, 10).await.unwrap();
            buy_entry(&ledger, &raffle, name).await.unwrap();
        }

        clock.advance(Duration::from_secs(61));
        let request_id = raffle.close_round_and_request_randomness().await.unwrap();
        let winner = coordinator.fulfill(request_id, &raffle).await.unwrap();

        assert_eq!(ledger.balance(winner.as_str()).await.unwrap(), 30);
        assert_eq!(ledger.balance(POT_ACCOUNT).await.unwrap(), 0);
        assert_eq!(raffle.snapshot().await.status, RoundStatus::Open);
    }

    #[tokio::test]
    async fn test_blocked_winner_leaves_round_calculating() {
        let (ledger, coordinator, raffle, clock) = setup().await;
        ledger.deposit("alice", 10).await.unwrap();
        buy_entry(&ledger, &raffle, "alice").await.unwrap();
        ledger.set_blocked("alice", true).await.unwrap();

        clock.advance(Duration::from_secs(61));
        let request_id = raffle.close_round_and_request_randomness().await.unwrap();
        assert!(coordinator.fulfill(request_id, &raffle).await.is_err());

        let snapshot = raffle.snapshot().await;
        assert_eq!(snapshot.status, RoundStatus::Calculating);
        assert_eq!(snapshot.pooled_balance, 10);
        assert_eq!(ledger.balance(POT_ACCOUNT).await.unwrap(), 10);

        ledger.set_blocked("alice", false).await.unwrap();
        coordinator.fulfill(request_id, &raffle).await.unwrap();
        assert_eq!(ledger.balance("alice").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_report_round_trip() {
        let temp_dir = tempdir().unwrap();
        assert!(load_report(temp_dir.path()).unwrap().is_none());

        let (_, _, raffle, _) = setup().await;
        let report = RunReport {
            raffle_id: raffle.id(),
            subscription_id: 1,
            winners: vec![WinnerRecord {
                round_number: 1,
                request_id: Some(RequestId(1)),
                winner: ParticipantId::from("alice"),
                payout: 30,
            }],
            snapshot: raffle.snapshot().await,
            refunded: 0,
            finished_at: Utc::now(),
        };
        save_report(temp_dir.path(), &report).unwrap();

        let loaded = load_report(temp_dir.path()).unwrap().unwrap();
        assert_eq!(loaded.raffle_id, report.raffle_id);
        assert_eq!(loaded.winners.len(), 1);
        assert_eq!(loaded.snapshot, report.snapshot);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp_dir = tempdir().unwrap();
        init(temp_dir.path(), false).unwrap();
        assert!(init(temp_dir.path(), false).is_err());
        init(temp_dir.path(), true).unwrap();
    }
}
