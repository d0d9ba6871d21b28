#![allow(dead_code)]

use std::collections::HashMap;

use trajscript::{AtomId, Mat3, Structure, Vec3, compile};

pub struct Atom {
    pub serial: i64,
    pub chain: &'static str,
    pub residue: i64,
    pub name: &'static str,
    pub position: Vec3,
    pub original: Vec3,
    pub radius: f64,
    pub flags: u32,
    pub force: Vec3,
}

/// A structure held entirely in memory. `superpose` translates onto the
/// reference centroid; it does not rotate.
#[derive(Default)]
pub struct MemoryStructure {
    pub atoms: Vec<Atom>,
    pub transforms: HashMap<i64, (Mat3, Vec3)>,
    pub hbonds: HashMap<(i64, i64), f64>,
    pub surface: f64,
    pub surface_requested: bool,
}

impl MemoryStructure {
    /// One atom per position, serials from 1, three atoms (N, CA, C) per residue.
    pub fn chain(positions: &[Vec3]) -> Self {
        let atoms = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| Atom {
                serial: i as i64 + 1,
                chain: "A",
                residue: i as i64 / 3 + 1,
                name: ["N", "CA", "C"][i % 3],
                position: p,
                original: p,
                radius: 1.7,
                flags: 0,
                force: Vec3::ZERO,
            })
            .collect();
        MemoryStructure { atoms, ..MemoryStructure::default() }
    }

    /// Four atoms forming a dihedral of `degrees` about the x axis.
    pub fn dihedral(degrees: f64) -> Self {
        let r = degrees.to_radians();
        Self::chain(&[
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, r.cos(), r.sin()),
        ])
    }

    pub fn translate(&mut self, by: Vec3) {
        for atom in &mut self.atoms {
            atom.position = atom.position + by;
            atom.original = atom.original + by;
        }
    }

    fn centroid(&self) -> Vec3 {
        let n = self.atoms.len().max(1) as f64;
        self.atoms.iter().map(|a| a.position).sum::<Vec3>() / n
    }
}

impl Structure for MemoryStructure {
    fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    fn residue_count(&self) -> usize {
        let mut residues: Vec<i64> = self.atoms.iter().map(|a| a.residue).collect();
        residues.dedup();
        residues.len()
    }

    fn find_atom(&self, serial: i64) -> Option<AtomId> {
        self.atoms.iter().position(|a| a.serial == serial)
    }

    fn find_atom_by_name(&self, chain: &str, residue: i64, name: &str) -> Option<AtomId> {
        self.atoms
            .iter()
            .position(|a| a.chain == chain && a.residue == residue && a.name == name)
    }

    fn serial(&self, atom: AtomId) -> i64 {
        self.atoms[atom].serial
    }

    fn position(&self, atom: AtomId) -> Vec3 {
        self.atoms[atom].position
    }

    fn original_position(&self, atom: AtomId) -> Vec3 {
        self.atoms[atom].original
    }

    fn radius(&self, atom: AtomId) -> f64 {
        self.atoms[atom].radius
    }

    fn residue(&self, atom: AtomId) -> i64 {
        self.atoms[atom].residue
    }

    fn flags(&self, atom: AtomId) -> u32 {
        self.atoms[atom].flags
    }

    fn force(&self, atom: AtomId) -> Vec3 {
        self.atoms[atom].force
    }

    fn residue_transform(&self, atom: AtomId) -> Option<(Mat3, Vec3)> {
        self.transforms.get(&self.atoms[atom].residue).copied()
    }

    fn hbond_energy(&self, donor: AtomId, acceptor: AtomId) -> f64 {
        let key = (self.atoms[donor].serial, self.atoms[acceptor].serial);
        self.hbonds.get(&key).copied().unwrap_or(0.0)
    }

    fn request_surface(&mut self) {
        self.surface_requested = true;
    }

    fn surface_area(&self) -> f64 {
        if self.surface_requested { self.surface } else { 0.0 }
    }

    fn superpose(&mut self, reference: &dyn Structure) {
        let n = reference.atom_count().max(1) as f64;
        let target = (0..reference.atom_count()).map(|i| reference.position(i)).sum::<Vec3>() / n;
        let shift = target - self.centroid();
        for atom in &mut self.atoms {
            atom.position = atom.position + shift;
        }
    }
}

pub fn compiled(source: &str) -> trajscript::Program {
    let outcome = compile(source);
    assert!(outcome.success, "compile failed: {:?}", outcome.messages);
    outcome.program
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
