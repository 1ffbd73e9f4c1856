//! Pipeline wiring: block database → parallel loaders → sequencer.
//!
//! Raw blocks are pulled sequentially from the database; each one is decoded
//! on its own task, throttled by a semaphore sized to the worker count so
//! peak memory stays bounded. Decoded change sets flow through one bounded
//! channel into the sequencer, which restores chain order.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::info;

use crate::blockdb::BlockDb;
use crate::config::{changeset_channel_capacity, loader_workers};
use crate::loader::load_block;
use crate::sequencer::Sequencer;
use crate::snapshot::{find_checkpoint, load_checkpoint};
use crate::types::{BalanceIndex, ScanError, UnspentIndex};

/// Replay up to `end_block` blocks from `data_dir/blocks` into `out_dir`,
/// resuming from the newest usable checkpoint when one exists.
pub async fn run(end_block: u32, data_dir: &Path, out_dir: &Path) -> Result<(), ScanError> {
    let (unspent, balances, resume_height, file_seq) = match find_checkpoint(out_dir, end_block) {
        Some(checkpoint) => {
            info!(
                height = checkpoint.height,
                path = %checkpoint.path.display(),
                "resuming from checkpoint"
            );
            let (unspent, balances) = load_checkpoint(&checkpoint).await?;
            (unspent, balances, checkpoint.height, checkpoint.file_seq)
        }
        None => {
            // no usable checkpoint: start over on a clean directory
            if out_dir.exists() {
                std::fs::remove_dir_all(out_dir)?;
            }
            std::fs::create_dir_all(out_dir)?;
            (UnspentIndex::new(), BalanceIndex::new(), 0, 0)
        }
    };

    let workers = loader_workers();
    let (changeset_tx, changeset_rx) = mpsc::channel(changeset_channel_capacity());
    let sequencer = Sequencer::new(
        out_dir.to_path_buf(),
        unspent,
        balances,
        resume_height,
        file_seq,
        workers,
    );
    let sequencer_task = tokio::spawn(sequencer.run(changeset_rx));

    let mut db = BlockDb::open(data_dir).await?;
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut loaded = 0u32;

    while loaded < end_block && !sequencer_task.is_finished() {
        let Some(raw) = db.fetch_next_block().await? else {
            info!(blocks = loaded, "end of block database");
            break;
        };
        loaded += 1;

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScanError::Consistency("loader semaphore closed".to_string()))?;
        let tx = changeset_tx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            // a send error means the sequencer already stopped; its own
            // error is what the pipeline reports
            let _ = tx.send(load_block(&raw).await).await;
        });
    }

    drop(changeset_tx);
    let outcome = sequencer_task
        .await
        .map_err(|e| ScanError::Consistency(format!("sequencer task failed: {}", e)))??;

    info!(
        height = outcome.applied_height,
        addresses = outcome.balances.len(),
        unspent_txs = outcome.unspent.len(),
        "replay complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::load_balance;
    use crate::testutil::{block_hash_of, build_block, txid_of, write_blk_file, TxBuilder};
    use tempfile::TempDir;

    const JAN: u32 = 1_231_977_600 + 43_200; // 2009-01-15 12:00 UTC
    const FEB: u32 = 1_234_656_000 + 43_200; // 2009-02-15 12:00 UTC

    /// Two blocks: a genesis coinbase to addrG, then a February block whose
    /// transaction moves 10 BTC to addrB and returns 40 BTC change.
    fn two_block_chain() -> Vec<Vec<u8>> {
        let coinbase0 = TxBuilder::coinbase()
            .output(5_000_000_000, b"addrG".to_vec())
            .build();
        let block0 = build_block([0u8; 32], JAN, &[coinbase0.clone()]);

        // split outputs so this coinbase serialises (and hashes) differently
        // from the genesis one
        let coinbase1 = TxBuilder::coinbase()
            .output(4_999_999_999, b"addrG".to_vec())
            .output(1, b"addrG".to_vec())
            .build();
        let transfer = TxBuilder::spending(txid_of(&coinbase0), 0)
            .output(1_000_000_000, b"addrB".to_vec())
            .output(4_000_000_000, b"addrG".to_vec())
            .build();
        let block1 = build_block(block_hash_of(&block0), FEB, &[coinbase1, transfer]);

        vec![block0, block1]
    }

    #[tokio::test]
    async fn test_end_to_end_replay() {
        let data_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let out = out_dir.path().join("out");
        let blocks = two_block_chain();
        write_blk_file(&data_dir.path().join("blocks"), "blk00000.dat", &blocks);

        run(100, data_dir.path(), &out).await.unwrap();

        // the February block triggers exactly one rollover
        let balance_csv = std::fs::read_to_string(out.join("balance.csv")).unwrap();
        assert_eq!(balance_csv, "2009-02-14,1,5000000000\n");
        let reward_csv = std::fs::read_to_string(out.join("reward.csv")).unwrap();
        assert_eq!(reward_csv, "2009-02-14,10000000000,0\n");

        let balances = load_balance(&out.join("1.1")).unwrap();
        assert_eq!(balances.len(), 1);
        // non-standard output scripts are keyed by their hex form
        assert_eq!(balances[&hex::encode(b"addrG")], 5_000_000_000);
    }

    #[tokio::test]
    async fn test_resume_is_idempotent() {
        let data_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let out = out_dir.path().join("out");
        let blocks = two_block_chain();
        write_blk_file(&data_dir.path().join("blocks"), "blk00000.dat", &blocks);

        run(100, data_dir.path(), &out).await.unwrap();
        // second run resumes from 1.1 and must not duplicate any output
        run(100, data_dir.path(), &out).await.unwrap();

        let reward_csv = std::fs::read_to_string(out.join("reward.csv")).unwrap();
        assert_eq!(reward_csv.lines().count(), 1);
        let checkpoints: Vec<_> = std::fs::read_dir(&out)
            .unwrap()
            .flatten()
            .filter(|e| e.file_type().unwrap().is_dir())
            .collect();
        assert_eq!(checkpoints.len(), 1);
    }

    #[tokio::test]
    async fn test_end_block_limits_fetching() {
        let data_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let out = out_dir.path().join("out");
        let blocks = two_block_chain();
        write_blk_file(&data_dir.path().join("blocks"), "blk00000.dat", &blocks);

        // only the genesis block is loaded, so no month rollover happens
        run(1, data_dir.path(), &out).await.unwrap();
        assert!(!out.join("balance.csv").exists());
    }

    #[tokio::test]
    async fn test_corrupt_block_is_fatal() {
        let data_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let out = out_dir.path().join("out");
        // header only, then garbage instead of a transaction list
        let mut bad_block = build_block([0u8; 32], JAN, &[]);
        bad_block.pop();
        bad_block.push(2);
        write_blk_file(&data_dir.path().join("blocks"), "blk00000.dat", &[bad_block]);

        let err = run(100, data_dir.path(), &out).await.unwrap_err();
        assert!(matches!(err, ScanError::Decode(_)));
    }
}
