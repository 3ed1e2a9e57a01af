//! Unit conventions and physical constants.
//!
//! Energies are kJ/mol, lengths nm, time ps (timesteps are configured in fs),
//! temperatures K, pressures bar and masses amu.

/// Boltzmann constant in kJ/(mol K).
pub const BOLTZMANN_KJ_PER_MOL_K: f64 = 0.008_314_462_618;

/// Conversion of `bar * nm^3` into kJ/mol.
pub const BAR_NM3_TO_KJ_PER_MOL: f64 = 0.060_221_407_6;

/// Femtoseconds per picosecond.
pub const FS_PER_PS: f64 = 1000.0;

/// Returns the inverse temperature `1 / (k_B T)` in mol/kJ.
pub fn beta(temperature: f64) -> f64 {
    1.0 / (BOLTZMANN_KJ_PER_MOL_K * temperature)
}
