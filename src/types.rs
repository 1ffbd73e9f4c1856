use std::collections::HashMap;
use std::fmt;

/// Transaction identifier, kept in wire (little-endian) byte order.
///
/// Equality and hashing are defined by the byte content; the hex form is
/// byte-reversed to match the conventional display order.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    /// Parse the display-order hex form written to checkpoint files.
    pub fn from_hex(s: &str) -> Option<TxId> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        for (slot, byte) in arr.iter_mut().zip(bytes.iter().rev()) {
            *slot = *byte;
        }
        Some(TxId(arr))
    }
}

impl fmt::LowerHex for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self)
    }
}

/// Render a 32-byte block or transaction hash in display (byte-reversed) order.
pub fn hash_hex(hash: &[u8; 32]) -> String {
    let mut display = *hash;
    display.reverse();
    hex::encode(display)
}

/// A single unspent output: receiving address and amount in satoshi.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub addr: String,
    pub value: u64,
}

/// Outputs of one transaction, keyed by output index.
pub type OutputMap = HashMap<u16, Output>;

/// All unspent outputs, keyed by transaction id. Never holds an empty
/// `OutputMap`: spending the last output of a transaction removes its entry.
pub type UnspentIndex = HashMap<TxId, OutputMap>;

/// Address balances in satoshi. A balance that returns to zero is removed,
/// so the map never stores zero.
pub type BalanceIndex = HashMap<String, u64>;

/// Per-block summary produced by the loader and applied by the sequencer.
///
/// `new_outputs` holds every output with a nonzero value (coinbase included);
/// `spends` holds the referenced outputs of every non-coinbase input, in
/// block order per transaction.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub block_hash: [u8; 32],
    pub parent_hash: [u8; 32],
    pub block_time: u32,
    pub sum_coinbase_out: u64,
    pub new_outputs: HashMap<TxId, OutputMap>,
    pub spends: HashMap<TxId, Vec<u16>>,
}

/// One signed balance mutation, emitted by the sequencer in chain order.
#[derive(Debug, Clone)]
pub struct BalanceDelta {
    pub addr: String,
    pub change: i64,
}

/// Fatal pipeline errors. The replay has no recoverable failures: anything
/// beyond a buffered out-of-order block aborts the run.
#[derive(Debug)]
pub enum ScanError {
    /// A block or transaction failed to decode.
    Decode(String),
    /// The replayed chain violated a balance or supply invariant.
    Consistency(String),
    /// A checkpoint directory could not be parsed or written.
    Checkpoint(String),
    /// Filesystem failure on checkpoint or report files.
    Io(std::io::Error),
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        ScanError::Io(e)
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Decode(s) => write!(f, "decode error: {}", s),
            ScanError::Consistency(s) => write!(f, "chain inconsistency: {}", s),
            ScanError::Checkpoint(s) => write!(f, "checkpoint error: {}", s),
            ScanError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ScanError {}
