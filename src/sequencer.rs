//! Chain Sequencer: restores chain order and applies block effects.
//!
//! Loader outputs arrive in arbitrary order. The sequencer buffers them keyed
//! by parent hash and releases them along the parent chain starting from the
//! all-zero hash, applying each block exactly once: reward accounting, month
//! rollover, output credits, then spend debits. It is the sole writer of the
//! unspent index; balance mutations stream to the applier task.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::applier;
use crate::constants::block_reward;
use crate::report::{month_of, write_report};
use crate::snapshot::save_checkpoint;
use crate::telemetry::ProgressCounter;
use crate::types::{
    hash_hex, BalanceDelta, BalanceIndex, ChangeSet, ScanError, UnspentIndex,
};

/// Final state handed back when the block stream ends.
#[derive(Debug)]
pub struct SequencerOutcome {
    pub unspent: UnspentIndex,
    pub balances: BalanceIndex,
    pub applied_height: u32,
    pub file_seq: u32,
}

pub struct Sequencer {
    out_dir: PathBuf,
    unspent: UnspentIndex,
    pending: HashMap<[u8; 32], ChangeSet>,
    cursor: [u8; 32],
    applied_height: u32,
    /// Number of blocks already reflected by the loaded checkpoint; blocks
    /// below this height are sequenced but their effects are suppressed.
    resume_height: u32,
    last_month: u32,
    sum_reward: u64,
    sum_fee: u64,
    file_seq: u32,
    delta_capacity: usize,
    delta_tx: Option<mpsc::Sender<BalanceDelta>>,
    applier: Option<JoinHandle<Result<BalanceIndex, ScanError>>>,
    progress: ProgressCounter,
}

impl Sequencer {
    pub fn new(
        out_dir: PathBuf,
        unspent: UnspentIndex,
        balances: BalanceIndex,
        resume_height: u32,
        file_seq: u32,
        delta_capacity: usize,
    ) -> Self {
        let delta_capacity = delta_capacity.max(1);
        let (delta_tx, delta_rx) = mpsc::channel(delta_capacity);
        let applier = applier::spawn(balances, delta_rx);
        Self {
            out_dir,
            unspent,
            pending: HashMap::new(),
            cursor: [0u8; 32],
            applied_height: 0,
            resume_height,
            // January: the genesis month, so the first block does not roll over
            last_month: 1,
            sum_reward: 0,
            sum_fee: 0,
            file_seq,
            delta_capacity,
            delta_tx: Some(delta_tx),
            applier: Some(applier),
            progress: ProgressCounter::new(100_000),
        }
    }

    /// Consume the unordered change-set stream until it closes, applying
    /// blocks in parent-chain order. An `Err` on the channel is a loader
    /// decode failure and halts the pipeline.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Result<ChangeSet, ScanError>>,
    ) -> Result<SequencerOutcome, ScanError> {
        loop {
            if let Some(change_set) = self.pending.remove(&self.cursor) {
                self.apply(change_set).await?;
                continue;
            }
            match rx.recv().await {
                Some(Ok(change_set)) => {
                    self.pending.insert(change_set.parent_hash, change_set);
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if !self.pending.is_empty() {
            warn!(
                orphaned = self.pending.len(),
                "blocks left without a parent link at end of stream"
            );
        }

        let balances = self.drain_applier().await?;
        Ok(SequencerOutcome {
            unspent: self.unspent,
            balances,
            applied_height: self.applied_height,
            file_seq: self.file_seq,
        })
    }

    async fn apply(&mut self, change_set: ChangeSet) -> Result<(), ScanError> {
        let height = self.applied_height;
        let block_hash = change_set.block_hash;

        // Reward accounting runs even below the resume height: the monthly
        // accumulators must match a direct run once normal processing starts.
        let reward = block_reward(height);
        let fee = change_set
            .sum_coinbase_out
            .checked_sub(reward)
            .ok_or_else(|| {
                ScanError::Consistency(format!(
                    "block {} {}: coinbase output sum {} below subsidy {}",
                    height,
                    hash_hex(&block_hash),
                    change_set.sum_coinbase_out,
                    reward
                ))
            })?;
        self.sum_reward += reward;
        self.sum_fee += fee;

        let month = month_of(change_set.block_time);
        if month != self.last_month {
            // A rollover at or below the checkpoint height was already
            // emitted by the run that wrote the checkpoint.
            let already_emitted = self.resume_height > 0 && height <= self.resume_height;
            if !already_emitted {
                self.rollover(change_set.block_time, height).await?;
            }
            self.sum_reward = 0;
            self.sum_fee = 0;
            self.last_month = month;
        }

        if height >= self.resume_height {
            // Credits before debits: an output spent later in the same block
            // must be indexed by the time its spend is processed.
            for (txid, outputs) in change_set.new_outputs {
                for output in outputs.values() {
                    self.emit(
                        BalanceDelta {
                            addr: output.addr.clone(),
                            change: output.value as i64,
                        },
                        height,
                        &block_hash,
                    )
                    .await?;
                }
                // duplicate txids (pre-BIP30 coinbase collisions) replace
                self.unspent.insert(txid, outputs);
            }

            for (txid, indices) in change_set.spends {
                let mut removed = Vec::new();
                if let Some(outputs) = self.unspent.get_mut(&txid) {
                    for index in indices {
                        // a missing output is a spend of a dropped zero-value
                        // output and is ignored
                        if let Some(output) = outputs.remove(&index) {
                            removed.push(output);
                        }
                    }
                    if outputs.is_empty() {
                        self.unspent.remove(&txid);
                    }
                }
                for output in removed {
                    self.emit(
                        BalanceDelta {
                            addr: output.addr,
                            change: -(output.value as i64),
                        },
                        height,
                        &block_hash,
                    )
                    .await?;
                }
            }
        }

        self.cursor = block_hash;
        self.applied_height += 1;
        if self.progress.should_log() {
            info!(
                height = self.applied_height,
                unspent_txs = self.unspent.len(),
                "applied blocks"
            );
        }
        Ok(())
    }

    /// Month boundary: drain the applier, write the report and the
    /// checkpoint, then restart the applier with a fresh channel.
    async fn rollover(&mut self, block_time: u32, height: u32) -> Result<(), ScanError> {
        let balances = self.drain_applier().await?;

        let out_dir = self.out_dir.clone();
        let sum_reward = self.sum_reward;
        let sum_fee = self.sum_fee;
        let report_task = tokio::task::spawn_blocking(move || {
            write_report(&out_dir, block_time, &balances, sum_reward, sum_fee).map(|_| balances)
        });
        let balances = report_task
            .await
            .map_err(|e| ScanError::Checkpoint(format!("report task failed: {}", e)))??;

        self.file_seq += 1;
        let unspent = std::mem::take(&mut self.unspent);
        let (unspent, balances) =
            save_checkpoint(&self.out_dir, self.file_seq, height, unspent, balances).await?;
        self.unspent = unspent;
        self.respawn_applier(balances);
        Ok(())
    }

    /// Close the delta channel and wait for the applier to hand the balance
    /// index back.
    async fn drain_applier(&mut self) -> Result<BalanceIndex, ScanError> {
        self.delta_tx = None;
        let handle = self
            .applier
            .take()
            .ok_or_else(|| ScanError::Consistency("applier already drained".to_string()))?;
        handle
            .await
            .map_err(|e| ScanError::Consistency(format!("applier task failed: {}", e)))?
    }

    fn respawn_applier(&mut self, balances: BalanceIndex) {
        let (delta_tx, delta_rx) = mpsc::channel(self.delta_capacity);
        self.applier = Some(applier::spawn(balances, delta_rx));
        self.delta_tx = Some(delta_tx);
    }

    async fn emit(
        &mut self,
        delta: BalanceDelta,
        height: u32,
        block_hash: &[u8; 32],
    ) -> Result<(), ScanError> {
        let send_failed = match &self.delta_tx {
            Some(tx) => tx.send(delta).await.is_err(),
            None => true,
        };
        if send_failed {
            // the applier died; surface its error with block context
            let detail = match self.applier.take() {
                Some(handle) => match handle.await {
                    Ok(Err(e)) => e.to_string(),
                    Ok(Ok(_)) => "applier exited before its input closed".to_string(),
                    Err(e) => format!("applier task failed: {}", e),
                },
                None => "applier not running".to_string(),
            };
            return Err(ScanError::Consistency(format!(
                "block {} {}: {}",
                height,
                hash_hex(block_hash),
                detail
            )));
        }
        Ok(())
    }
}
