//! Checkpoint persistence: gzip snapshots of both indexes.
//!
//! A checkpoint is a directory named `{file_seq}.{height}` holding
//! `unspent.gz` and `balance.gz`. Formats:
//!
//! - `unspent.gz`: one line per transaction,
//!   `TXID_HEX,IDX ADDR VAL,IDX ADDR VAL,...`
//! - `balance.gz`: `ADDR BAL` lines, balance descending, ties broken by the
//!   shorter record first.
//!
//! Loading is strict: a line that does not parse aborts the run rather than
//! silently truncating the restored state.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::types::{BalanceIndex, Output, OutputMap, ScanError, TxId, UnspentIndex};

/// A resumable checkpoint found in the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRef {
    pub path: PathBuf,
    pub file_seq: u32,
    pub height: u32,
}

pub fn save_unspent(dir: &Path, unspent: &UnspentIndex) -> Result<(), ScanError> {
    let file_name = dir.join("unspent.gz");
    let file = File::create(&file_name)?;
    let mut w = GzEncoder::new(BufWriter::new(file), Compression::fast());

    for (txid, outputs) in unspent {
        write!(w, "{:x}", txid)?;
        for (index, output) in outputs {
            write!(w, ",{} {} {}", index, output.addr, output.value)?;
        }
        w.write_all(b"\n")?;
    }

    let mut inner = w.finish()?;
    inner.flush()?;
    info!(file = %file_name.display(), records = unspent.len(), "saved unspent snapshot");
    Ok(())
}

pub fn save_balance(dir: &Path, balances: &BalanceIndex) -> Result<(), ScanError> {
    let file_name = dir.join("balance.gz");

    let mut sorted: Vec<(&String, u64)> = balances.iter().map(|(a, v)| (a, *v)).collect();
    sorted.sort_by(|(a1, v1), (a2, v2)| v2.cmp(v1).then_with(|| a1.len().cmp(&a2.len())));

    let file = File::create(&file_name)?;
    let mut w = GzEncoder::new(BufWriter::new(file), Compression::fast());
    for (addr, value) in sorted {
        writeln!(w, "{} {}", addr, value)?;
    }

    let mut inner = w.finish()?;
    inner.flush()?;
    info!(file = %file_name.display(), records = balances.len(), "saved balance snapshot");
    Ok(())
}

pub fn load_unspent(dir: &Path) -> Result<UnspentIndex, ScanError> {
    let file_name = dir.join("unspent.gz");
    let file = File::open(&file_name)?;
    let reader = BufReader::new(GzDecoder::new(file));

    let mut unspent = UnspentIndex::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split(',');
        let txid = fields
            .next()
            .and_then(TxId::from_hex)
            .ok_or_else(|| bad_record(&file_name, line))?;

        let mut outputs = OutputMap::new();
        for field in fields {
            // ADDR is treated as opaque and may contain spaces, so split the
            // index off the front and the value off the back
            let parsed = field.split_once(' ').and_then(|(index, rest)| {
                let (addr, value) = rest.rsplit_once(' ')?;
                Some((index.parse::<u16>().ok()?, addr, value.parse::<u64>().ok()?))
            });
            let Some((index, addr, value)) = parsed else {
                return Err(bad_record(&file_name, field));
            };
            outputs.insert(
                index,
                Output {
                    addr: addr.to_string(),
                    value,
                },
            );
        }
        unspent.insert(txid, outputs);
    }

    info!(file = %file_name.display(), records = unspent.len(), "loaded unspent snapshot");
    Ok(unspent)
}

pub fn load_balance(dir: &Path) -> Result<BalanceIndex, ScanError> {
    let file_name = dir.join("balance.gz");
    let file = File::open(&file_name)?;
    let reader = BufReader::new(GzDecoder::new(file));

    let mut balances = BalanceIndex::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = line
            .rsplit_once(' ')
            .and_then(|(addr, value)| Some((addr, value.parse::<u64>().ok()?)));
        let Some((addr, value)) = parsed else {
            return Err(bad_record(&file_name, line));
        };
        balances.insert(addr.to_string(), value);
    }

    info!(file = %file_name.display(), records = balances.len(), "loaded balance snapshot");
    Ok(balances)
}

fn bad_record(file: &Path, record: &str) -> ScanError {
    ScanError::Checkpoint(format!(
        "unparseable record in {}: {:?}",
        file.display(),
        record
    ))
}

/// Scan `out_dir` for `N.M` checkpoint directories and pick the one with the
/// largest height not exceeding `end_block`. An exact match wins immediately;
/// otherwise ties favour the first directory seen.
pub fn find_checkpoint(out_dir: &Path, end_block: u32) -> Option<CheckpointRef> {
    let entries = fs::read_dir(out_dir).ok()?;
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    // read_dir order is platform-dependent; name order keeps the
    // first-match tie-break deterministic
    dirs.sort();

    let mut best: Option<CheckpointRef> = None;
    for path in dirs {
        let Some(name) = path.file_name() else {
            continue;
        };
        let Some((file_seq, height)) = parse_checkpoint_name(&name.to_string_lossy()) else {
            continue;
        };
        if height == 0 || height > end_block {
            continue;
        }
        if height == end_block {
            return Some(CheckpointRef {
                path,
                file_seq,
                height,
            });
        }
        match &best {
            Some(b) if b.height >= height => {}
            _ => {
                best = Some(CheckpointRef {
                    path,
                    file_seq,
                    height,
                })
            }
        }
    }
    best
}

fn parse_checkpoint_name(name: &str) -> Option<(u32, u32)> {
    let (file_seq, height) = name.split_once('.')?;
    Some((file_seq.parse().ok()?, height.parse().ok()?))
}

/// Load both snapshot files from a checkpoint directory in parallel.
pub async fn load_checkpoint(
    checkpoint: &CheckpointRef,
) -> Result<(UnspentIndex, BalanceIndex), ScanError> {
    let unspent_dir = checkpoint.path.clone();
    let balance_dir = checkpoint.path.clone();
    let unspent_task = tokio::task::spawn_blocking(move || load_unspent(&unspent_dir));
    let balance_task = tokio::task::spawn_blocking(move || load_balance(&balance_dir));

    let (unspent, balances) = tokio::try_join!(unspent_task, balance_task)
        .map_err(|e| ScanError::Checkpoint(format!("snapshot load task failed: {}", e)))?;
    Ok((unspent?, balances?))
}

/// Write the checkpoint directory `{file_seq}.{height}`, snapshotting both
/// indexes with two parallel writers. Ownership of the indexes passes through
/// the blocking tasks and back to the caller.
pub async fn save_checkpoint(
    out_dir: &Path,
    file_seq: u32,
    height: u32,
    unspent: UnspentIndex,
    balances: BalanceIndex,
) -> Result<(UnspentIndex, BalanceIndex), ScanError> {
    let dir = out_dir.join(format!("{}.{}", file_seq, height));
    fs::create_dir_all(&dir)?;

    let unspent_dir = dir.clone();
    let balance_dir = dir.clone();
    let unspent_task =
        tokio::task::spawn_blocking(move || save_unspent(&unspent_dir, &unspent).map(|_| unspent));
    let balance_task = tokio::task::spawn_blocking(move || {
        save_balance(&balance_dir, &balances).map(|_| balances)
    });

    let (unspent, balances) = tokio::try_join!(unspent_task, balance_task)
        .map_err(|e| ScanError::Checkpoint(format!("snapshot save task failed: {}", e)))?;
    Ok((unspent?, balances?))
}
