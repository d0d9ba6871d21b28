//! The molecular structure a program queries, as seen from the engine.
//!
//! Hosts implement [`Structure`] over their own model; atoms are addressed by
//! an opaque [`AtomId`] obtained from one of the lookup methods.

use crate::value::{Mat3, Vec3};

/// Index of an atom within one structure. Only meaningful for the structure
/// that produced it.
pub type AtomId = usize;

pub trait Structure: Send {
    fn atom_count(&self) -> usize;

    fn residue_count(&self) -> usize;

    fn find_atom(&self, serial: i64) -> Option<AtomId>;

    fn find_atom_by_name(&self, chain: &str, residue: i64, name: &str) -> Option<AtomId>;

    fn serial(&self, atom: AtomId) -> i64;

    /// Current position, moved by [`Structure::superpose`].
    fn position(&self, atom: AtomId) -> Vec3;

    /// Position as read from the trajectory, before any superposition.
    fn original_position(&self, atom: AtomId) -> Vec3;

    fn radius(&self, atom: AtomId) -> f64;

    fn residue(&self, atom: AtomId) -> i64;

    fn flags(&self, _atom: AtomId) -> u32 {
        0
    }

    fn force(&self, _atom: AtomId) -> Vec3 {
        Vec3::ZERO
    }

    /// Local frame and origin of the residue containing `atom`, if it has one.
    fn residue_transform(&self, _atom: AtomId) -> Option<(Mat3, Vec3)> {
        None
    }

    fn hbond_energy(&self, _donor: AtomId, _acceptor: AtomId) -> f64 {
        0.0
    }

    /// Marks the surface as needed; hosts compute it lazily.
    fn request_surface(&mut self) {}

    fn surface_area(&self) -> f64 {
        0.0
    }

    /// Moves current positions onto `reference` (centroid translation plus
    /// optimal rotation).
    fn superpose(&mut self, reference: &dyn Structure);

    fn rmsd(&self, reference: &dyn Structure) -> f64 {
        let n = self.atom_count().min(reference.atom_count());
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = (0..n).map(|i| self.squared_deviation(i, reference)).sum();
        (sum / n as f64).sqrt()
    }

    fn squared_deviation(&self, atom: AtomId, reference: &dyn Structure) -> f64 {
        if atom >= reference.atom_count() {
            return 0.0;
        }
        let d = self.position(atom) - reference.position(atom);
        d.dot(d)
    }
}

/// Mean of the current positions, or the origin for an empty structure.
pub fn centroid(structure: &dyn Structure) -> Vec3 {
    let n = structure.atom_count();
    if n == 0 {
        return Vec3::ZERO;
    }
    let sum: Vec3 = (0..n).map(|i| structure.position(i)).sum();
    sum / n as f64
}
