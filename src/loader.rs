//! Block Loader: decodes one raw block into a `ChangeSet`.
//!
//! Stateless and embarrassingly parallel; the pipeline runs one loader task
//! per in-flight block. Ordering between loader outputs is undefined — the
//! sequencer restores chain order.

use std::collections::HashMap;

use crate::address::{address_from_script, script_fallback_address};
use crate::decode::decode_block;
use crate::types::{ChangeSet, Output, OutputMap, ScanError, TxId};

/// Decode a raw block into the per-block summary consumed by the sequencer.
///
/// Credits every nonzero-value output (coinbase included), collects the
/// spends of every non-coinbase input, and sums the coinbase outputs for
/// reward and fee accounting. Zero-value outputs are dropped here, so the
/// sequencer must ignore later spends that reference them.
pub async fn load_block(data: &[u8]) -> Result<ChangeSet, ScanError> {
    let block = decode_block(data).await?;

    let mut sum_coinbase_out = 0u64;
    let mut new_outputs: HashMap<TxId, OutputMap> = HashMap::new();
    let mut spends: HashMap<TxId, Vec<u16>> = HashMap::new();

    for tx in &block.txs {
        if tx.is_coinbase {
            for output in &tx.outputs {
                sum_coinbase_out += output.value;
            }
        } else {
            for input in &tx.inputs {
                spends
                    .entry(TxId(input.prev_txid))
                    .or_default()
                    .push(input.vout as u16);
            }
        }

        let mut outputs = OutputMap::new();
        for (i, output) in tx.outputs.iter().enumerate() {
            if output.value == 0 {
                continue;
            }
            let addr = match address_from_script(&output.script) {
                Some(addr) => addr,
                None => script_fallback_address(&output.script),
            };
            outputs.insert(
                i as u16,
                Output {
                    addr,
                    value: output.value,
                },
            );
        }
        if !outputs.is_empty() {
            new_outputs.insert(TxId(tx.txid), outputs);
        }
    }

    Ok(ChangeSet {
        block_hash: block.header.block_hash,
        parent_hash: block.header.parent_hash,
        block_time: block.header.time,
        sum_coinbase_out,
        new_outputs,
        spends,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{block_hash_of, build_block, txid_of, TxBuilder};

    #[tokio::test]
    async fn test_coinbase_block_changeset() {
        let coinbase = TxBuilder::coinbase()
            .output(5_000_000_000, b"addrG".to_vec())
            .build();
        let block = build_block([0u8; 32], 1_231_006_505, &[coinbase.clone()]);

        let cs = load_block(&block).await.unwrap();
        assert_eq!(cs.parent_hash, [0u8; 32]);
        assert_eq!(cs.block_hash, block_hash_of(&block));
        assert_eq!(cs.sum_coinbase_out, 5_000_000_000);
        assert!(cs.spends.is_empty());

        let outputs = &cs.new_outputs[&TxId(txid_of(&coinbase))];
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[&0].addr, "addrG");
        assert_eq!(outputs[&0].value, 5_000_000_000);
    }

    #[tokio::test]
    async fn test_spends_collected_per_prev_txid() {
        let coinbase = TxBuilder::coinbase()
            .output(5_000_000_000, b"addrG".to_vec())
            .build();
        let prev = txid_of(&coinbase);
        let spend = TxBuilder::spending(prev, 0)
            .input(prev, 1)
            .output(1_000_000_000, b"addrB".to_vec())
            .build();
        let block = build_block([1u8; 32], 1_231_469_665, &[coinbase, spend]);

        let cs = load_block(&block).await.unwrap();
        assert_eq!(cs.spends[&TxId(prev)], vec![0, 1]);
        // coinbase sum only counts the coinbase transaction
        assert_eq!(cs.sum_coinbase_out, 5_000_000_000);
    }

    #[tokio::test]
    async fn test_zero_value_outputs_skipped() {
        let coinbase = TxBuilder::coinbase()
            .output(5_000_000_000, b"addrG".to_vec())
            .build();
        let dust = TxBuilder::spending(txid_of(&coinbase), 0)
            .output(0, b"burn".to_vec())
            .build();
        let block = build_block([0u8; 32], 1_231_006_505, &[coinbase, dust.clone()]);

        let cs = load_block(&block).await.unwrap();
        // a transaction with only zero-value outputs gets no entry at all
        assert!(!cs.new_outputs.contains_key(&TxId(txid_of(&dust))));
    }

    #[tokio::test]
    async fn test_nonstandard_script_keys_by_raw_bytes() {
        let coinbase = TxBuilder::coinbase()
            .output(42, b"not a standard script".to_vec())
            .build();
        let block = build_block([0u8; 32], 1_231_006_505, &[coinbase.clone()]);

        let cs = load_block(&block).await.unwrap();
        let outputs = &cs.new_outputs[&TxId(txid_of(&coinbase))];
        assert_eq!(outputs[&0].addr, hex::encode(b"not a standard script"));
    }
}
