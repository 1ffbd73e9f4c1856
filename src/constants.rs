/// Chain parameters for the Bitcoin main network block database.

/// Magic bytes framing each block in the on-disk `blk*.dat` files.
pub const NETWORK_MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];

/// Number of blocks between block-reward halvings.
pub const HALVING_BLOCKS: u32 = 210_000;

/// Initial block subsidy in satoshi.
pub const MAX_REWARD: u64 = 50 * 100_000_000;

/// Block subsidy at `height` (0-based).
///
/// The subsidy halves at every height that is a multiple of `HALVING_BLOCKS`,
/// flooring to an integer satoshi amount each time.
#[inline]
pub fn block_reward(height: u32) -> u64 {
    let halvings = height / HALVING_BLOCKS;
    if halvings >= 64 {
        0
    } else {
        MAX_REWARD >> halvings
    }
}
