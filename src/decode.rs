//! Raw block and transaction decoding.
//!
//! Blocks arrive as opaque byte slices from the block database; this module
//! turns them into headers and transaction lists. Only the fields the
//! pipeline consumes are retained: scripts of inputs and witness data are
//! parsed past but dropped.

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use sha2::{Digest, Sha256};

use crate::types::{hash_hex, ScanError};

pub struct RawBlockHeader {
    pub block_hash: [u8; 32],
    pub parent_hash: [u8; 32],
    pub time: u32,
}

pub struct RawTxIn {
    pub prev_txid: [u8; 32],
    pub vout: u32,
}

pub struct RawTxOut {
    pub value: u64,
    pub script: Vec<u8>,
}

pub struct RawTx {
    pub txid: [u8; 32],
    pub is_coinbase: bool,
    pub inputs: Vec<RawTxIn>,
    pub outputs: Vec<RawTxOut>,
}

pub struct RawBlock {
    pub header: RawBlockHeader,
    pub txs: Vec<RawTx>,
}

pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(&first_hash);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second_hash);
    out
}

/// Decode one serialised block. Any structural problem is a fatal decode
/// error; the pipeline never retries a block.
pub async fn decode_block(data: &[u8]) -> Result<RawBlock, ScanError> {
    if data.len() < 80 {
        return Err(ScanError::Decode(format!(
            "block truncated: {} bytes",
            data.len()
        )));
    }
    let header = decode_header(&data[..80]);

    let mut cursor = Cursor::new(data);
    cursor.set_position(80);

    let tx_count = read_varint(&mut cursor).await.map_err(|e| {
        ScanError::Decode(format!(
            "block {}: tx count: {}",
            hash_hex(&header.block_hash),
            e
        ))
    })?;

    let mut txs = Vec::new();
    for i in 0..tx_count {
        let tx = decode_tx(&mut cursor).await.map_err(|e| {
            ScanError::Decode(format!(
                "block {}: tx {} of {}: {}",
                hash_hex(&header.block_hash),
                i,
                tx_count,
                e
            ))
        })?;
        txs.push(tx);
    }

    Ok(RawBlock { header, txs })
}

/// Blocking wrapper for `decode_block` for use in synchronous contexts.
pub fn decode_block_blocking(data: &[u8]) -> Result<RawBlock, ScanError> {
    futures::executor::block_on(decode_block(data))
}

/// Parse the fixed 80-byte header. The block hash is sha256d over the header
/// bytes themselves.
pub fn decode_header(header: &[u8]) -> RawBlockHeader {
    let mut parent_hash = [0u8; 32];
    parent_hash.copy_from_slice(&header[4..36]);
    let time = u32::from_le_bytes([header[68], header[69], header[70], header[71]]);

    RawBlockHeader {
        block_hash: sha256d(header),
        parent_hash,
        time,
    }
}

pub async fn decode_tx(cursor: &mut Cursor<&[u8]>) -> Result<RawTx, io::Error> {
    let data = *cursor.get_ref();
    let tx_start = cursor.position() as usize;

    let _version = cursor.read_u32::<LittleEndian>()?;

    // A zero marker byte after the version flags the segwit serialisation
    // (a legacy transaction cannot have zero inputs).
    let marker_pos = cursor.position();
    let mut segwit = false;
    if cursor.read_u8()? == 0x00 {
        let flag = cursor.read_u8()?;
        if flag != 0x01 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad segwit flag {:#04x}", flag),
            ));
        }
        segwit = true;
    } else {
        cursor.set_position(marker_pos);
    }

    let body_start = cursor.position() as usize;

    let input_count = read_varint(cursor).await?;
    let mut inputs = Vec::new();
    let mut is_coinbase = false;
    for i in 0..input_count {
        let mut prev_txid = [0u8; 32];
        cursor.read_exact(&mut prev_txid)?;
        let vout = cursor.read_u32::<LittleEndian>()?;
        let _script_sig = read_script(cursor).await?;
        let _sequence = cursor.read_u32::<LittleEndian>()?;

        if i == 0 && vout == 0xffff_ffff && prev_txid.iter().all(|&b| b == 0) {
            is_coinbase = true;
        }
        inputs.push(RawTxIn { prev_txid, vout });
    }

    let output_count = read_varint(cursor).await?;
    let mut outputs = Vec::new();
    for _ in 0..output_count {
        let value = cursor.read_u64::<LittleEndian>()?;
        let script = read_script(cursor).await?;
        outputs.push(RawTxOut { value, script });
    }

    let body_end = cursor.position() as usize;

    if segwit {
        skip_witnesses(cursor, input_count).await?;
    }

    let mut locktime = [0u8; 4];
    cursor.read_exact(&mut locktime)?;
    let tx_end = cursor.position() as usize;

    // The txid covers the witness-stripped serialisation.
    let txid = if segwit {
        let mut stripped = Vec::with_capacity(8 + body_end - body_start);
        stripped.extend_from_slice(&data[tx_start..tx_start + 4]);
        stripped.extend_from_slice(&data[body_start..body_end]);
        stripped.extend_from_slice(&locktime);
        sha256d(&stripped)
    } else {
        sha256d(&data[tx_start..tx_end])
    };

    Ok(RawTx {
        txid,
        is_coinbase,
        inputs,
        outputs,
    })
}

async fn skip_witnesses(cursor: &mut Cursor<&[u8]>, input_count: u64) -> Result<(), io::Error> {
    let len = cursor.get_ref().len() as u64;
    for _ in 0..input_count {
        let item_count = read_varint(cursor).await?;
        for _ in 0..item_count {
            let item_len = read_varint(cursor).await?;
            let end = cursor
                .position()
                .checked_add(item_len)
                .filter(|&e| e <= len)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "witness item past end of block",
                    )
                })?;
            cursor.set_position(end);
        }
    }
    Ok(())
}

pub async fn read_varint(cursor: &mut Cursor<&[u8]>) -> Result<u64, io::Error> {
    let first = cursor.read_u8()?;
    let value = match first {
        0x00..=0xfc => u64::from(first),
        0xfd => u64::from(cursor.read_u16::<LittleEndian>()?),
        0xfe => u64::from(cursor.read_u32::<LittleEndian>()?),
        0xff => cursor.read_u64::<LittleEndian>()?,
    };
    Ok(value)
}

pub async fn read_script(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, io::Error> {
    let script_length = read_varint(cursor).await?;
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if script_length > remaining {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "script length past end of block",
        ));
    }
    let mut script = vec![0u8; script_length as usize];
    cursor.read_exact(&mut script)?;
    Ok(script)
}
