//! Test fixtures: synthetic transactions and blocks in the on-disk wire
//! format, plus a framed block-file writer.

use std::io::Write;
use std::path::Path;

use crate::constants::NETWORK_MAGIC;
use crate::decode::sha256d;

pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

pub struct TxBuilder {
    inputs: Vec<([u8; 32], u32)>,
    outputs: Vec<(u64, Vec<u8>)>,
    witness: Option<Vec<Vec<u8>>>,
}

impl TxBuilder {
    /// A coinbase transaction: single null-prevout input.
    pub fn coinbase() -> Self {
        Self {
            inputs: vec![([0u8; 32], 0xffff_ffff)],
            outputs: Vec::new(),
            witness: None,
        }
    }

    /// A transaction spending one prior output.
    pub fn spending(prev_txid: [u8; 32], vout: u32) -> Self {
        Self {
            inputs: vec![(prev_txid, vout)],
            outputs: Vec::new(),
            witness: None,
        }
    }

    pub fn input(mut self, prev_txid: [u8; 32], vout: u32) -> Self {
        self.inputs.push((prev_txid, vout));
        self
    }

    pub fn output(mut self, value: u64, script: Vec<u8>) -> Self {
        self.outputs.push((value, script));
        self
    }

    /// Serialise in segwit form, attaching `items` as the witness stack of
    /// the first input (remaining inputs get empty stacks).
    pub fn witness_items(mut self, items: Vec<Vec<u8>>) -> Self {
        self.witness = Some(items);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut tx = Vec::new();
        tx.extend_from_slice(&1u32.to_le_bytes()); // version

        if self.witness.is_some() {
            tx.push(0x00); // marker
            tx.push(0x01); // flag
        }

        write_varint(&mut tx, self.inputs.len() as u64);
        for (prev_txid, vout) in &self.inputs {
            tx.extend_from_slice(prev_txid);
            tx.extend_from_slice(&vout.to_le_bytes());
            write_varint(&mut tx, 0); // empty script_sig
            tx.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence
        }

        write_varint(&mut tx, self.outputs.len() as u64);
        for (value, script) in &self.outputs {
            tx.extend_from_slice(&value.to_le_bytes());
            write_varint(&mut tx, script.len() as u64);
            tx.extend_from_slice(script);
        }

        if let Some(items) = &self.witness {
            write_varint(&mut tx, items.len() as u64);
            for item in items {
                write_varint(&mut tx, item.len() as u64);
                tx.extend_from_slice(item);
            }
            for _ in 1..self.inputs.len() {
                write_varint(&mut tx, 0);
            }
        }

        tx.extend_from_slice(&0u32.to_le_bytes()); // locktime
        tx
    }
}

/// Txid of a legacy-serialised transaction.
pub fn txid_of(tx: &[u8]) -> [u8; 32] {
    sha256d(tx)
}

/// Assemble a block: 80-byte header followed by the transaction list.
pub fn build_block(parent_hash: [u8; 32], time: u32, txs: &[Vec<u8>]) -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(&1u32.to_le_bytes()); // version
    block.extend_from_slice(&parent_hash);
    block.extend_from_slice(&[0u8; 32]); // merkle root, unused by the pipeline
    block.extend_from_slice(&time.to_le_bytes());
    block.extend_from_slice(&0x1d00_ffffu32.to_le_bytes()); // bits
    block.extend_from_slice(&0u32.to_le_bytes()); // nonce

    write_varint(&mut block, txs.len() as u64);
    for tx in txs {
        block.extend_from_slice(tx);
    }
    block
}

/// Block hash as the sequencer sees it.
pub fn block_hash_of(block: &[u8]) -> [u8; 32] {
    sha256d(&block[..80])
}

/// Write a framed `blkNNNNN.dat` file under `blocks_dir`.
pub fn write_blk_file(blocks_dir: &Path, name: &str, blocks: &[Vec<u8>]) {
    std::fs::create_dir_all(blocks_dir).unwrap();
    let mut file = std::fs::File::create(blocks_dir.join(name)).unwrap();
    for block in blocks {
        file.write_all(&NETWORK_MAGIC).unwrap();
        file.write_all(&(block.len() as u32).to_le_bytes()).unwrap();
        file.write_all(block).unwrap();
    }
    // zero padding like a preallocated block file
    file.write_all(&[0u8; 64]).unwrap();
}
