//! On-disk block database reader.
//!
//! A full node appends raw blocks to `blocks/blkNNNNN.dat`, each prefixed by
//! the 4-byte network magic and a little-endian payload length. The reader
//! walks the files in name order and yields one payload at a time; the tail
//! of a preallocated file is zero-padded and ends that file.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, warn};

use crate::constants::NETWORK_MAGIC;

/// Refuse to allocate for obviously corrupt length prefixes.
const MAX_BLOCK_SIZE: usize = 32 * 1024 * 1024;

pub struct BlockDb {
    files: Vec<PathBuf>,
    next_file: usize,
    reader: Option<BufReader<File>>,
}

impl BlockDb {
    /// Open `<data_dir>/blocks`, collecting `blk*.dat` files in name order.
    pub async fn open(data_dir: &Path) -> Result<Self, std::io::Error> {
        let blocks_dir = data_dir.join("blocks");
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&blocks_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("blk") && name.ends_with(".dat") {
                files.push(entry.path());
            }
        }
        files.sort();
        debug!(files = files.len(), dir = %blocks_dir.display(), "opened block database");
        Ok(Self {
            files,
            next_file: 0,
            reader: None,
        })
    }

    /// Next raw block payload, or `None` at the end of the database.
    pub async fn fetch_next_block(&mut self) -> Result<Option<Vec<u8>>, std::io::Error> {
        loop {
            if self.reader.is_none() {
                if self.next_file >= self.files.len() {
                    return Ok(None);
                }
                let path = self.files[self.next_file].clone();
                self.next_file += 1;
                debug!(file = %path.display(), "reading block file");
                let file = File::open(&path).await?;
                self.reader = Some(BufReader::new(file));
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            let mut magic = [0u8; 4];
            match reader.read_exact(&mut magic).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.reader = None;
                    continue;
                }
                Err(e) => return Err(e),
            }

            if magic == [0u8; 4] {
                // zero padding at the tail of the file
                self.reader = None;
                continue;
            }
            if magic != NETWORK_MAGIC {
                warn!(magic = ?magic, "unexpected magic bytes, skipping rest of file");
                self.reader = None;
                continue;
            }

            let size = reader.read_u32_le().await? as usize;
            if size > MAX_BLOCK_SIZE {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("block length {} exceeds limit", size),
                ));
            }
            let mut payload = vec![0u8; size];
            reader.read_exact(&mut payload).await?;
            return Ok(Some(payload));
        }
    }
}
