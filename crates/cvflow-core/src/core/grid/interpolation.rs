use super::{GridCoordinates, GridError};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Spline,
    Linear,
    Floor,
    Ceiling,
    Nearest,
}

impl FromStr for Interpolation {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spline" | "cubic" => Ok(Interpolation::Spline),
            "linear" => Ok(Interpolation::Linear),
            "floor" => Ok(Interpolation::Floor),
            "ceiling" | "ceil" => Ok(Interpolation::Ceiling),
            "nearest" => Ok(Interpolation::Nearest),
            _ => Err(GridError::UnknownInterpolation(s.to_string())),
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interpolation::Spline => "spline",
            Interpolation::Linear => "linear",
            Interpolation::Floor => "floor",
            Interpolation::Ceiling => "ceiling",
            Interpolation::Nearest => "nearest",
        };
        f.write_str(name)
    }
}

/// Result of evaluating a grid function at an arbitrary point.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GridSample {
    pub value: f64,
    /// Derivative of the interpolant with respect to each coordinate.
    pub gradient: Vec<f64>,
    /// `(grid point, weight)`: derivative of `value` with respect to each stored point value.
    pub weights: Vec<(usize, f64)>,
}

impl GridSample {
    fn add_weight(&mut self, point: usize, weight: f64) {
        match self.weights.iter_mut().find(|(p, _)| *p == point) {
            Some((_, w)) => *w += weight,
            None => self.weights.push((point, weight)),
        }
    }
}

// Cubic Hermite basis on [0, 1]: (h00, h10, h01, h11) and their derivatives.
fn hermite(t: f64) -> ([f64; 4], [f64; 4]) {
    let t2 = t * t;
    let t3 = t2 * t;
    (
        [
            2.0 * t3 - 3.0 * t2 + 1.0,
            t3 - 2.0 * t2 + t,
            -2.0 * t3 + 3.0 * t2,
            t3 - t2,
        ],
        [
            6.0 * t2 - 6.0 * t,
            3.0 * t2 - 4.0 * t + 1.0,
            -6.0 * t2 + 6.0 * t,
            3.0 * t2 - 2.0 * t,
        ],
    )
}

/// Evaluates the grid function `(values, gradients)` at `x`.
///
/// `gradients` holds `dimension` components per point and may be empty, in which case the
/// stored gradients are taken as zero.
pub fn evaluate(
    grid: &GridCoordinates,
    values: &[f64],
    gradients: &[f64],
    kind: Interpolation,
    x: &[f64],
) -> Result<GridSample, GridError> {
    if values.len() != grid.point_count() {
        return Err(GridError::DataMismatch {
            expected: grid.point_count(),
            found: values.len(),
        });
    }
    let dim = grid.dimension();
    let location = grid.locate(x)?;
    let stored_gradient = |point: usize, k: usize| -> f64 {
        gradients.get(point * dim + k).copied().unwrap_or(0.0)
    };
    let corner = |mask: usize| -> Vec<usize> {
        (0..dim)
            .map(|j| {
                if mask & (1 << j) != 0 {
                    location.upper[j]
                } else {
                    location.lower[j]
                }
            })
            .collect()
    };

    let mut sample = GridSample {
        value: 0.0,
        gradient: vec![0.0; dim],
        weights: Vec::with_capacity(1 << dim),
    };

    match kind {
        Interpolation::Floor | Interpolation::Ceiling | Interpolation::Nearest => {
            let indices: Vec<usize> = (0..dim)
                .map(|j| {
                    let t = location.fraction[j];
                    let up = match kind {
                        Interpolation::Ceiling => t > 0.0,
                        Interpolation::Nearest => t >= 0.5,
                        _ => false,
                    };
                    if up {
                        location.upper[j]
                    } else {
                        location.lower[j]
                    }
                })
                .collect();
            let point = grid.flat_index(&indices);
            sample.value = values[point];
            for k in 0..dim {
                sample.gradient[k] = stored_gradient(point, k);
            }
            sample.add_weight(point, 1.0);
        }
        Interpolation::Linear => {
            let spacing = grid.spacing();
            for mask in 0..(1usize << dim) {
                let point = grid.flat_index(&corner(mask));
                let factors: Vec<(f64, f64)> = (0..dim)
                    .map(|j| {
                        let t = location.fraction[j];
                        if mask & (1 << j) != 0 {
                            (t, 1.0 / spacing[j])
                        } else {
                            (1.0 - t, -1.0 / spacing[j])
                        }
                    })
                    .collect();
                let weight: f64 = factors.iter().map(|(w, _)| w).product();
                sample.value += weight * values[point];
                for m in 0..dim {
                    let partial: f64 = factors
                        .iter()
                        .enumerate()
                        .map(|(j, (w, dw))| if j == m { *dw } else { *w })
                        .product();
                    sample.gradient[m] += partial * values[point];
                }
                sample.add_weight(point, weight);
            }
        }
        Interpolation::Spline => {
            let spacing = grid.spacing();
            let bases: Vec<([f64; 4], [f64; 4])> =
                location.fraction.iter().map(|&t| hermite(t)).collect();
            for mask in 0..(1usize << dim) {
                let point = grid.flat_index(&corner(mask));
                // Per dimension: value basis, slope basis and their t-derivatives.
                let factors: Vec<(f64, f64, f64, f64)> = (0..dim)
                    .map(|j| {
                        let (h, dh) = &bases[j];
                        if mask & (1 << j) != 0 {
                            (h[2], h[3], dh[2], dh[3])
                        } else {
                            (h[0], h[1], dh[0], dh[1])
                        }
                    })
                    .collect();
                let product_except = |skip: &[usize]| -> f64 {
                    factors
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| !skip.contains(j))
                        .map(|(_, f)| f.0)
                        .product()
                };

                let weight = product_except(&[]);
                let f = values[point];
                sample.value += f * weight;
                for m in 0..dim {
                    sample.gradient[m] += f * factors[m].2 * product_except(&[m]) / spacing[m];
                }
                sample.add_weight(point, weight);

                for k in 0..dim {
                    let slope = spacing[k] * stored_gradient(point, k);
                    if slope == 0.0 {
                        continue;
                    }
                    sample.value += slope * factors[k].1 * product_except(&[k]);
                    for m in 0..dim {
                        let d = if m == k {
                            factors[k].3 * product_except(&[k])
                        } else {
                            factors[k].1 * factors[m].2 * product_except(&[k, m])
                        };
                        sample.gradient[m] += slope * d / spacing[m];
                    }
                }
            }
        }
    }
    Ok(sample)
}
