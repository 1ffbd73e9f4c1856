//! Monthly report rows, appended to the CSV files in the output directory.
//!
//! One row per month rollover in each of `balance.csv`, `reward.csv`, and the
//! applicable concentration files. Rows are append-only; nothing is ever
//! rewritten.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Datelike, Local};
use tracing::info;

use crate::toplist::TopList;
use crate::types::{BalanceIndex, ScanError};

/// Capacity of the concentration top-list (the largest report bucket).
pub const TOP_CAPACITY: usize = 100_000;

/// Calendar month (1-12) of a block timestamp in the local time zone.
pub fn month_of(block_time: u32) -> u32 {
    DateTime::from_timestamp(i64::from(block_time), 0)
        .map(|utc| utc.with_timezone(&Local).month())
        .unwrap_or(1)
}

/// The report's logical date: one day before the block that triggered the
/// rollover, in the local calendar.
pub fn report_date(block_time: u32) -> String {
    let ts = i64::from(block_time) - 86_400;
    DateTime::from_timestamp(ts, 0)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn append_line(out_dir: &Path, file: &str, line: &str) -> Result<(), ScanError> {
    let path = out_dir.join(file);
    let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
    f.write_all(line.as_bytes())?;
    Ok(())
}

/// Append one row to each applicable CSV for the month that just ended.
pub fn write_report(
    out_dir: &Path,
    block_time: u32,
    balances: &BalanceIndex,
    sum_reward: u64,
    sum_fee: u64,
) -> Result<(), ScanError> {
    let date = report_date(block_time);

    let mut top = TopList::new(TOP_CAPACITY);
    let mut balance_sum = 0u64;
    for &value in balances.values() {
        balance_sum += value;
        top.push(value);
    }

    append_line(
        out_dir,
        "balance.csv",
        &format!("{},{},{}\n", date, balances.len(), balance_sum),
    )?;
    info!(date = %date, addresses = balances.len(), supply = balance_sum, "monthly report");

    let sorted = top.sorted();
    let mut sum = 0u64;
    for (rank, value) in sorted.iter().enumerate() {
        sum += value;
        let file = match rank {
            99 => "balance100.csv",
            999 => "balance1000.csv",
            9999 => "balance10000.csv",
            _ => continue,
        };
        append_line(
            out_dir,
            file,
            &format!("{},{},{}\n", date, sum, sum as f64 / balance_sum as f64),
        )?;
    }
    if sorted.len() >= TOP_CAPACITY {
        append_line(
            out_dir,
            "balance100000.csv",
            &format!("{},{},{}\n", date, sum, sum as f64 / balance_sum as f64),
        )?;
    }

    append_line(
        out_dir,
        "reward.csv",
        &format!("{},{},{}\n", date, sum_reward, sum_fee),
    )?;
    Ok(())
}
