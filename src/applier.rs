//! Balance Applier: the single writer of the balance index.
//!
//! The applier task owns the `BalanceIndex` outright. Closing its delta
//! channel asks it to drain; it then returns the index through its join
//! handle, which doubles as the drain-ready signal for the sequencer.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{BalanceDelta, BalanceIndex, ScanError};

pub fn spawn(
    mut balances: BalanceIndex,
    mut rx: mpsc::Receiver<BalanceDelta>,
) -> JoinHandle<Result<BalanceIndex, ScanError>> {
    tokio::spawn(async move {
        while let Some(delta) = rx.recv().await {
            apply_delta(&mut balances, delta)?;
        }
        Ok(balances)
    })
}

/// Apply one signed change. A balance reaching zero is deleted; a balance
/// going negative means the chain debit had no matching credit.
fn apply_delta(balances: &mut BalanceIndex, delta: BalanceDelta) -> Result<(), ScanError> {
    let current = balances.get(&delta.addr).copied().unwrap_or(0);
    let balance = current as i64 + delta.change;
    if balance > 0 {
        balances.insert(delta.addr, balance as u64);
    } else if balance == 0 {
        balances.remove(&delta.addr);
    } else {
        return Err(ScanError::Consistency(format!(
            "balance for {} went negative ({})",
            delta.addr, balance
        )));
    }
    Ok(())
}
