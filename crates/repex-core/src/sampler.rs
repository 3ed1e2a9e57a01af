use serde::{Deserialize, Serialize};

/// Cartesian position or velocity of one atom.
pub type Vec3 = [f64; 3];

/// Periodic box vectors, one row per vector (nm).
pub type BoxVectors = [[f64; 3]; 3];

/// Mutable per-replica simulation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerState {
    /// Atom positions in nm.
    pub positions: Vec<Vec3>,
    /// Atom velocities in nm/ps, when the propagator tracks them.
    #[serde(default)]
    pub velocities: Option<Vec<Vec3>>,
    /// Periodic box vectors, if the system is periodic.
    #[serde(default)]
    pub box_vectors: Option<BoxVectors>,
    /// Potential energy (kJ/mol) cached by the last propagation.
    #[serde(default)]
    pub potential_energy: Option<f64>,
    /// Kinetic energy (kJ/mol) cached by the last propagation.
    #[serde(default)]
    pub kinetic_energy: Option<f64>,
}

impl SamplerState {
    /// Creates a state from positions only.
    pub fn new(positions: Vec<Vec3>) -> Self {
        Self {
            positions,
            velocities: None,
            box_vectors: None,
            potential_energy: None,
            kinetic_energy: None,
        }
    }

    /// Attaches periodic box vectors.
    pub fn with_box_vectors(mut self, box_vectors: BoxVectors) -> Self {
        self.box_vectors = Some(box_vectors);
        self
    }

    /// Number of atoms.
    pub fn n_atoms(&self) -> usize {
        self.positions.len()
    }

    /// Box volume in nm^3, if periodic.
    pub fn volume(&self) -> Option<f64> {
        self.box_vectors.as_ref().map(box_volume)
    }
}

/// Volume spanned by three box vectors (absolute triple product).
pub fn box_volume(vectors: &BoxVectors) -> f64 {
    let [a, b, c] = vectors;
    let cross = [
        b[1] * c[2] - b[2] * c[1],
        b[2] * c[0] - b[0] * c[2],
        b[0] * c[1] - b[1] * c[0],
    ];
    (a[0] * cross[0] + a[1] * cross[1] + a[2] * cross[2]).abs()
}
