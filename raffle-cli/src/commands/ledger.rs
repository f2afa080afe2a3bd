use crate::config::{LEDGER_FILE, STATUS_FILE};
use crate::ledger::{Ledger, POT_ACCOUNT};
use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::Confirm;
use std::path::Path;

pub async fn fund(data_dir: &Path, account: &str, amount: u64) -> Result<()> {
    let ledger = Ledger::open(&data_dir.join(LEDGER_FILE)).await?;
    let balance = ledger.deposit(account, amount).await?;

    println!("Funded '{}' with {}", account, amount);
    println!("New balance: {}", balance);
    Ok(())
}

pub async fn set_blocked(data_dir: &Path, account: &str, blocked: bool) -> Result<()> {
    let ledger = Ledger::open(&data_dir.join(LEDGER_FILE)).await?;
    ledger.set_blocked(account, blocked).await?;

    if blocked {
        println!("'{}' will now reject incoming transfers (payouts included)", account);
    } else {
        println!("'{}' accepts transfers again", account);
    }
    Ok(())
}

pub async fn show_balances(data_dir: &Path) -> Result<()> {
    let ledger = Ledger::open(&data_dir.join(LEDGER_FILE)).await?;
    let accounts = ledger.accounts().await?;

    if accounts.is_empty() {
        println!("No accounts yet. Fund one with: raffle fund <account> <amount>");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Account", "Balance", "Blocked", "Created"]);

    for account in accounts {
        let name = if account.id == POT_ACCOUNT {
            format!("{} (pot)", account.id)
        } else {
            account.id.clone()
        };
        table.add_row(vec![
            name,
            account.balance.to_string(),
            if account.blocked { "yes" } else { "no" }.to_string(),
            account.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn show_history(data_dir: &Path, limit: usize) -> Result<()> {
    let ledger = Ledger::open(&data_dir.join(LEDGER_FILE)).await?;
    let transfers = ledger.transfers(limit).await?;

    if transfers.is_empty() {
        println!("No transfers recorded");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "From", "To", "Amount", "Memo", "Time"]);

    for transfer in transfers {
        table.add_row(vec![
            transfer.id.to_string(),
            transfer.from,
            transfer.to,
            transfer.amount.to_string(),
            transfer.memo,
            transfer.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn reset(data_dir: &Path, force: bool) -> Result<()> {
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete all balances and raffle status in {}?",
                data_dir.display()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    for file in [LEDGER_FILE, STATUS_FILE] {
        let path = data_dir.join(file);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            tracing::info!("Removed {}", path.display());
        }
    }

    println!("Ledger and status cleared");
    Ok(())
}
