use repex_core::derive_substream_seed;

const EXCHANGE_SALT: u64 = 0xA5A5_A5A5_A5A5_A5A5;
const EQUILIBRATION_SALT: u64 = 0x5A5A_5A5A_5A5A_5A5A;

/// Seed for the dynamics of `replica` during `iteration`.
pub fn propagation_seed(master_seed: u64, iteration: usize, replica: usize) -> u64 {
    let intermediate = derive_substream_seed(master_seed, iteration as u64);
    derive_substream_seed(intermediate, replica as u64)
}

/// Seed for the swap proposals and acceptance draws of `iteration`.
pub fn exchange_seed(master_seed: u64, iteration: usize) -> u64 {
    derive_substream_seed(master_seed ^ EXCHANGE_SALT, iteration as u64)
}

/// Seed for equilibration `round` of `replica`.
pub fn equilibration_seed(master_seed: u64, round: usize, replica: usize) -> u64 {
    let intermediate = derive_substream_seed(master_seed ^ EQUILIBRATION_SALT, round as u64);
    derive_substream_seed(intermediate, replica as u64)
}
