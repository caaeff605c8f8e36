use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

const DEGENERATE_DETERMINANT: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PbcError {
    #[error("Degenerate periodic box (determinant {determinant:e})")]
    DegenerateBox { determinant: f64 },
    #[error("Non-finite value in periodic box")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbcKind {
    Unset,
    Orthorhombic,
    Generic,
}

/// Periodic boundary conditions for a simulation cell.
///
/// The rows of `cell` are the lattice vectors. An all-zero cell means no periodicity.
#[derive(Debug, Clone, PartialEq)]
pub struct Pbc {
    kind: PbcKind,
    cell: Matrix3<f64>,
    /// Maps Cartesian column vectors to fractional coordinates.
    to_fractional: Matrix3<f64>,
}

impl Default for Pbc {
    fn default() -> Self {
        Self::none()
    }
}

impl Pbc {
    pub fn none() -> Self {
        Self {
            kind: PbcKind::Unset,
            cell: Matrix3::zeros(),
            to_fractional: Matrix3::zeros(),
        }
    }

    pub fn orthorhombic(lx: f64, ly: f64, lz: f64) -> Result<Self, PbcError> {
        Self::from_cell(Matrix3::from_diagonal(&Vector3::new(lx, ly, lz)))
    }

    /// Builds boundary conditions from a cell whose rows are the lattice vectors.
    pub fn from_cell(cell: Matrix3<f64>) -> Result<Self, PbcError> {
        if cell.iter().any(|x| !x.is_finite()) {
            return Err(PbcError::NonFinite);
        }
        if cell.iter().all(|&x| x == 0.0) {
            return Ok(Self::none());
        }
        let determinant = cell.determinant();
        if determinant.abs() < DEGENERATE_DETERMINANT {
            return Err(PbcError::DegenerateBox { determinant });
        }
        let to_fractional = cell
            .transpose()
            .try_inverse()
            .ok_or(PbcError::DegenerateBox { determinant })?;
        let orthorhombic = (0..3)
            .flat_map(|i| (0..3).map(move |j| (i, j)))
            .filter(|(i, j)| i != j)
            .all(|(i, j)| cell[(i, j)] == 0.0);
        Ok(Self {
            kind: if orthorhombic {
                PbcKind::Orthorhombic
            } else {
                PbcKind::Generic
            },
            cell,
            to_fractional,
        })
    }

    pub fn kind(&self) -> PbcKind {
        self.kind
    }

    pub fn is_set(&self) -> bool {
        self.kind != PbcKind::Unset
    }

    pub fn cell(&self) -> &Matrix3<f64> {
        &self.cell
    }

    pub fn to_fractional(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.to_fractional * r
    }

    pub fn to_cartesian(&self, s: &Vector3<f64>) -> Vector3<f64> {
        self.cell.transpose() * s
    }

    /// Minimum-image displacement from `from` to `to`.
    pub fn distance(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> Vector3<f64> {
        self.minimum_image(to - from)
    }

    pub fn minimum_image(&self, d: Vector3<f64>) -> Vector3<f64> {
        match self.kind {
            PbcKind::Unset => d,
            PbcKind::Orthorhombic => Vector3::from_fn(|k, _| {
                let l = self.cell[(k, k)];
                d[k] - l * (d[k] / l).round()
            }),
            PbcKind::Generic => {
                let mut s = self.to_fractional(&d);
                s.apply(|x| {
                    let nearest = x.round();
                    *x -= nearest;
                });
                let base = self.to_cartesian(&s);
                let mut best = base;
                let mut best_norm = base.norm_squared();
                for i in -1i32..=1 {
                    for j in -1i32..=1 {
                        for k in -1i32..=1 {
                            if i == 0 && j == 0 && k == 0 {
                                continue;
                            }
                            let shift = Vector3::new(i as f64, j as f64, k as f64);
                            let candidate = base + self.to_cartesian(&shift);
                            let norm = candidate.norm_squared();
                            if norm < best_norm {
                                best = candidate;
                                best_norm = norm;
                            }
                        }
                    }
                }
                best
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-10;

    fn approx(a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        (a - b).norm() < TOLERANCE
    }

    #[test]
    fn zero_box_means_plain_difference() {
        let pbc = Pbc::from_cell(Matrix3::zeros()).unwrap();
        assert!(!pbc.is_set());
        let d = pbc.distance(&Vector3::new(0.0, 0.0, 0.0), &Vector3::new(9.0, 0.0, 0.0));
        assert!(approx(&d, &Vector3::new(9.0, 0.0, 0.0)));
    }

    #[test]
    fn orthorhombic_box_wraps_to_nearest_image() {
        let pbc = Pbc::orthorhombic(10.0, 10.0, 10.0).unwrap();
        assert_eq!(pbc.kind(), PbcKind::Orthorhombic);
        let d = pbc.distance(&Vector3::new(0.1, 0.0, 0.0), &Vector3::new(9.9, 0.0, 0.0));
        assert!(approx(&d, &Vector3::new(-0.2, 0.0, 0.0)));
        let d = pbc.distance(&Vector3::new(1.0, 1.0, 1.0), &Vector3::new(-8.5, 6.5, 1.5));
        assert!(approx(&d, &Vector3::new(0.5, -4.5, 0.5)));
    }

    #[test]
    fn triclinic_box_finds_shortest_image() {
        let cell = Matrix3::new(10.0, 0.0, 0.0, 5.0, 8.660254037844386, 0.0, 0.0, 0.0, 10.0);
        let pbc = Pbc::from_cell(cell).unwrap();
        assert_eq!(pbc.kind(), PbcKind::Generic);
        let a = Vector3::new(0.5, 0.5, 0.0);
        let b = Vector3::new(14.0, 8.2, 0.0);
        let d = pbc.distance(&a, &b);
        let mut best = f64::INFINITY;
        for i in -3..=3 {
            for j in -3..=3 {
                for k in -3..=3 {
                    let shift = pbc.to_cartesian(&Vector3::new(i as f64, j as f64, k as f64));
                    best = best.min((b - a + shift).norm());
                }
            }
        }
        assert!((d.norm() - best).abs() < TOLERANCE);
        let s = pbc.to_fractional(&(b - a - d));
        for k in 0..3 {
            assert!((s[k] - s[k].round()).abs() < 1e-9);
        }
    }

    #[test]
    fn degenerate_box_is_rejected() {
        let cell = Matrix3::new(1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        assert!(matches!(
            Pbc::from_cell(cell),
            Err(PbcError::DegenerateBox { .. })
        ));
    }

    #[test]
    fn fractional_round_trip_recovers_position() {
        let cell = Matrix3::new(4.0, 0.0, 0.0, 1.0, 5.0, 0.0, 0.5, 0.5, 6.0);
        let pbc = Pbc::from_cell(cell).unwrap();
        let r = Vector3::new(1.2, -3.4, 2.2);
        assert!(approx(&pbc.to_cartesian(&pbc.to_fractional(&r)), &r));
    }
}
