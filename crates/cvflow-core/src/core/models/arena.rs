use super::ids::LeaseKey;
use crate::core::utils::pbc::{Pbc, PbcError};
use nalgebra::{Matrix3, Vector3};
use slotmap::SlotMap;
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArenaError {
    #[error("Atom index {index} out of range for a system of {natoms} atoms")]
    AtomOutOfRange { index: usize, natoms: usize },
    #[error("Atom {atom} is already claimed for writing by '{owner}'")]
    WriteConflict { atom: usize, owner: String },
    #[error("Atom lease is no longer valid (the graph was rebuilt)")]
    StaleLease,
    #[error("Expected {expected} atoms, received {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("Local atom {local} is not part of this lease")]
    NotInLease { local: usize },
    #[error("Local atom {local} is leased for reading only")]
    ReadOnly { local: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    Read,
    Write,
}

#[derive(Debug, Clone)]
struct LeaseRecord {
    owner: String,
    atoms: Vec<usize>,
    /// Leading atoms claimed for writing.
    writes: usize,
}

impl LeaseRecord {
    fn read_only(&self) -> &[usize] {
        &self.atoms[self.writes..]
    }
}

/// A granted atom selection. Local index `i` refers to global atom `atoms()[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomLease {
    key: LeaseKey,
    atoms: Vec<usize>,
}

impl AtomLease {
    pub fn atoms(&self) -> &[usize] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn local_index(&self, global: usize) -> Option<usize> {
        self.atoms.iter().position(|&a| a == global)
    }
}

/// Proof of exclusive write access to the atoms of one lease.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteToken {
    key: LeaseKey,
}

/// Positions, forces and cell of the simulated system, owned by the driver.
#[derive(Debug, Clone, Default)]
pub struct AtomArena {
    positions: Vec<Vector3<f64>>,
    forces: Vec<Vector3<f64>>,
    pbc: Pbc,
    leases: SlotMap<LeaseKey, LeaseRecord>,
    write_claims: HashMap<usize, LeaseKey>,
}

impl AtomArena {
    pub fn new(natoms: usize) -> Self {
        Self {
            positions: vec![Vector3::zeros(); natoms],
            forces: vec![Vector3::zeros(); natoms],
            ..Self::default()
        }
    }

    pub fn natoms(&self) -> usize {
        self.positions.len()
    }

    pub fn pbc(&self) -> &Pbc {
        &self.pbc
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    pub fn position(&self, index: usize) -> Option<Vector3<f64>> {
        self.positions.get(index).copied()
    }

    pub fn forces(&self) -> &[Vector3<f64>] {
        &self.forces
    }

    pub fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<(), ArenaError> {
        if positions.len() != self.positions.len() {
            return Err(ArenaError::CountMismatch {
                expected: self.positions.len(),
                found: positions.len(),
            });
        }
        self.positions.copy_from_slice(positions);
        Ok(())
    }

    /// Sets the simulation cell (rows are lattice vectors; all zeros disables periodicity).
    pub fn set_cell(&mut self, cell: Matrix3<f64>) -> Result<(), PbcError> {
        self.pbc = Pbc::from_cell(cell)?;
        Ok(())
    }

    pub fn set_pbc(&mut self, pbc: Pbc) {
        self.pbc = pbc;
    }

    pub fn clear_forces(&mut self) {
        self.forces.iter_mut().for_each(|f| *f = Vector3::zeros());
    }

    /// Grants `owner` access to `atoms`. Write intent also returns the token that unlocks
    /// [`AtomArena::writer`]; two writers may never claim the same atom.
    pub fn request(
        &mut self,
        owner: &str,
        atoms: Vec<usize>,
        intent: AccessIntent,
    ) -> Result<(AtomLease, Option<WriteToken>), ArenaError> {
        let writes = match intent {
            AccessIntent::Write => atoms.len(),
            AccessIntent::Read => 0,
        };
        self.request_writing_first(owner, atoms, writes)
    }

    /// Grants `owner` access to `atoms`, claiming write access only to the first `writes`
    /// of them. The rest of the lease is read-only, also through the writer.
    pub fn request_writing_first(
        &mut self,
        owner: &str,
        atoms: Vec<usize>,
        writes: usize,
    ) -> Result<(AtomLease, Option<WriteToken>), ArenaError> {
        let natoms = self.natoms();
        if let Some(&index) = atoms.iter().find(|&&a| a >= natoms) {
            return Err(ArenaError::AtomOutOfRange { index, natoms });
        }
        let writes = writes.min(atoms.len());
        let written = &atoms[..writes];

        for atom in written {
            if let Some(owner_key) = self.write_claims.get(atom) {
                let owner = self
                    .leases
                    .get(*owner_key)
                    .map(|r| r.owner.clone())
                    .unwrap_or_default();
                return Err(ArenaError::WriteConflict { atom: *atom, owner });
            }
        }
        for record in self.leases.values() {
            if record.read_only().iter().any(|a| written.contains(a)) {
                warn!(
                    reader = %record.owner,
                    writer = %owner,
                    "Atoms are read before a later action rewrites them in the same step"
                );
            }
        }

        let key = self.leases.insert(LeaseRecord {
            owner: owner.to_string(),
            atoms: atoms.clone(),
            writes,
        });
        let token = if writes > 0 {
            for &atom in &atoms[..writes] {
                self.write_claims.insert(atom, key);
            }
            Some(WriteToken { key })
        } else {
            None
        };
        Ok((AtomLease { key, atoms }, token))
    }

    /// Drops every lease; existing leases and tokens become stale.
    pub fn release_all(&mut self) {
        self.leases.clear();
        self.write_claims.clear();
    }

    /// Copies the lease's positions into `out` in local order.
    pub fn gather(&self, lease: &AtomLease, out: &mut Vec<Vector3<f64>>) -> Result<(), ArenaError> {
        if !self.leases.contains_key(lease.key) {
            return Err(ArenaError::StaleLease);
        }
        out.clear();
        out.extend(lease.atoms.iter().map(|&a| self.positions[a]));
        Ok(())
    }

    /// Adds local per-atom forces of a lease into the global force array.
    pub fn add_forces(
        &mut self,
        lease: &AtomLease,
        forces: &[Vector3<f64>],
    ) -> Result<(), ArenaError> {
        if !self.leases.contains_key(lease.key) {
            return Err(ArenaError::StaleLease);
        }
        if forces.len() != lease.atoms.len() {
            return Err(ArenaError::CountMismatch {
                expected: lease.atoms.len(),
                found: forces.len(),
            });
        }
        for (&atom, force) in lease.atoms.iter().zip(forces) {
            self.forces[atom] += force;
        }
        Ok(())
    }

    pub fn writer(&mut self, token: &WriteToken) -> Result<AtomWriter<'_>, ArenaError> {
        let record = self.leases.get(token.key).ok_or(ArenaError::StaleLease)?;
        Ok(AtomWriter {
            positions: &mut self.positions,
            atoms: &record.atoms,
            writes: record.writes,
            pbc: &self.pbc,
        })
    }
}

/// Mutable view over the positions of one write lease, addressed by local index.
pub struct AtomWriter<'a> {
    positions: &'a mut [Vector3<f64>],
    atoms: &'a [usize],
    writes: usize,
    pbc: &'a Pbc,
}

impl AtomWriter<'_> {
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn pbc(&self) -> &Pbc {
        self.pbc
    }

    pub fn get(&self, local: usize) -> Result<Vector3<f64>, ArenaError> {
        let atom = self.atoms.get(local).ok_or(ArenaError::NotInLease { local })?;
        Ok(self.positions[*atom])
    }

    pub fn set(&mut self, local: usize, position: Vector3<f64>) -> Result<(), ArenaError> {
        let atom = self.atoms.get(local).ok_or(ArenaError::NotInLease { local })?;
        if local >= self.writes {
            return Err(ArenaError::ReadOnly { local });
        }
        self.positions[*atom] = position;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_write_claims_are_rejected() {
        let mut arena = AtomArena::new(4);
        arena.request("a", vec![0, 1], AccessIntent::Write).unwrap();
        let err = arena.request("b", vec![1, 2], AccessIntent::Write).unwrap_err();
        assert_eq!(
            err,
            ArenaError::WriteConflict {
                atom: 1,
                owner: "a".to_string()
            }
        );
        assert!(arena.request("c", vec![1, 2], AccessIntent::Read).is_ok());
    }

    #[test]
    fn read_only_tail_of_a_lease_can_be_shared_with_a_writer() {
        let mut arena = AtomArena::new(4);
        arena.request("whole", vec![0, 1], AccessIntent::Write).unwrap();
        let (_, token) = arena.request_writing_first("wrap", vec![2, 3, 0, 1], 2).unwrap();
        let token = token.unwrap();
        let mut writer = arena.writer(&token).unwrap();
        writer.set(1, Vector3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(writer.get(2).unwrap(), Vector3::zeros());
        assert_eq!(
            writer.set(2, Vector3::zeros()),
            Err(ArenaError::ReadOnly { local: 2 })
        );
        assert!(matches!(
            arena.request("late", vec![3], AccessIntent::Write),
            Err(ArenaError::WriteConflict { atom: 3, .. })
        ));
    }

    #[test]
    fn out_of_range_atoms_are_rejected() {
        let mut arena = AtomArena::new(2);
        assert!(matches!(
            arena.request("a", vec![2], AccessIntent::Read),
            Err(ArenaError::AtomOutOfRange { index: 2, natoms: 2 })
        ));
    }

    #[test]
    fn writer_only_reaches_leased_atoms() {
        let mut arena = AtomArena::new(3);
        let (_, token) = arena.request("w", vec![2], AccessIntent::Write).unwrap();
        let token = token.unwrap();
        let mut writer = arena.writer(&token).unwrap();
        writer.set(0, Vector3::new(1.0, 2.0, 3.0)).unwrap();
        assert!(matches!(writer.set(1, Vector3::zeros()), Err(ArenaError::NotInLease { local: 1 })));
        assert_eq!(arena.positions()[2], Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(arena.positions()[0], Vector3::zeros());
    }

    #[test]
    fn released_leases_become_stale() {
        let mut arena = AtomArena::new(2);
        let (lease, token) = arena.request("w", vec![0], AccessIntent::Write).unwrap();
        arena.release_all();
        let mut out = Vec::new();
        assert_eq!(arena.gather(&lease, &mut out), Err(ArenaError::StaleLease));
        assert!(matches!(arena.writer(&token.unwrap()), Err(ArenaError::StaleLease)));
    }

    #[test]
    fn gather_and_add_forces_use_local_order() {
        let mut arena = AtomArena::new(3);
        arena
            .set_positions(&[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(2.0, 0.0, 0.0),
            ])
            .unwrap();
        let (lease, _) = arena.request("r", vec![2, 0], AccessIntent::Read).unwrap();
        let mut out = Vec::new();
        arena.gather(&lease, &mut out).unwrap();
        assert_eq!(out[0].x, 2.0);
        assert_eq!(out[1].x, 0.0);
        arena
            .add_forces(&lease, &[Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0)])
            .unwrap();
        assert_eq!(arena.forces()[2], Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(arena.forces()[0], Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn set_positions_checks_atom_count() {
        let mut arena = AtomArena::new(2);
        assert!(matches!(
            arena.set_positions(&[Vector3::zeros()]),
            Err(ArenaError::CountMismatch { expected: 2, found: 1 })
        ));
    }
}
