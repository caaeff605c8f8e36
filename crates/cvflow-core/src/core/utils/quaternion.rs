/// A quaternion stored as `[w, i, j, k]`.
pub type Quaternion = [f64; 4];

/// The product `conj(q1) * q2` and its partial derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConjugateProduct {
    /// Product components `[w, i, j, k]`.
    pub components: Quaternion,
    /// `wrt_first[c][n]` is the derivative of component `c` with respect to `q1[n]`.
    pub wrt_first: [Quaternion; 4],
    /// `wrt_second[c][n]` is the derivative of component `c` with respect to `q2[n]`.
    pub wrt_second: [Quaternion; 4],
}

pub fn conjugate(q: &Quaternion) -> Quaternion {
    [q[0], -q[1], -q[2], -q[3]]
}

/// Hamilton product `a * b`.
pub fn hamilton(a: &Quaternion, b: &Quaternion) -> Quaternion {
    [
        a[0] * b[0] - a[1] * b[1] - a[2] * b[2] - a[3] * b[3],
        a[0] * b[1] + a[1] * b[0] + a[2] * b[3] - a[3] * b[2],
        a[0] * b[2] - a[1] * b[3] + a[2] * b[0] + a[3] * b[1],
        a[0] * b[3] + a[1] * b[2] - a[2] * b[1] + a[3] * b[0],
    ]
}

pub fn norm(q: &Quaternion) -> f64 {
    q.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Relative rotation between two orientations, `conj(q1) * q2`, with analytic partials.
pub fn conjugate_product(q1: &Quaternion, q2: &Quaternion) -> ConjugateProduct {
    let [w1, x1, y1, z1] = *q1;
    let [w2, x2, y2, z2] = *q2;
    let components = hamilton(&conjugate(q1), q2);
    let wrt_first = [
        [w2, x2, y2, z2],
        [x2, -w2, -z2, y2],
        [y2, z2, -w2, -x2],
        [z2, -y2, x2, -w2],
    ];
    let wrt_second = [
        [w1, x1, y1, z1],
        [-x1, w1, z1, -y1],
        [-y1, -z1, w1, x1],
        [-z1, y1, -x1, w1],
    ];
    ConjugateProduct {
        components,
        wrt_first,
        wrt_second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_unit(rng: &mut StdRng) -> Quaternion {
        let mut q = [0.0; 4];
        for c in &mut q {
            *c = rng.gen_range(-1.0..1.0);
        }
        let n = norm(&q);
        q.map(|c| c / n)
    }

    #[test]
    fn product_of_unit_quaternions_has_unit_norm() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let p = conjugate_product(&random_unit(&mut rng), &random_unit(&mut rng));
            assert!((norm(&p.components) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn conjugate_product_of_quaternion_with_itself_is_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let q = random_unit(&mut rng);
        let p = conjugate_product(&q, &q);
        assert!((p.components[0] - 1.0).abs() < 1e-12);
        for c in &p.components[1..] {
            assert!(c.abs() < 1e-12);
        }
    }

    #[test]
    fn partials_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let q1 = random_unit(&mut rng);
        let q2 = random_unit(&mut rng);
        let p = conjugate_product(&q1, &q2);
        let h = 1e-6;
        for n in 0..4 {
            let mut plus = q1;
            let mut minus = q1;
            plus[n] += h;
            minus[n] -= h;
            let fp = conjugate_product(&plus, &q2).components;
            let fm = conjugate_product(&minus, &q2).components;
            for c in 0..4 {
                let numeric = (fp[c] - fm[c]) / (2.0 * h);
                assert!((numeric - p.wrt_first[c][n]).abs() < 1e-8);
            }
            let mut plus = q2;
            let mut minus = q2;
            plus[n] += h;
            minus[n] -= h;
            let fp = conjugate_product(&q1, &plus).components;
            let fm = conjugate_product(&q1, &minus).components;
            for c in 0..4 {
                let numeric = (fp[c] - fm[c]) / (2.0 * h);
                assert!((numeric - p.wrt_second[c][n]).abs() < 1e-8);
            }
        }
    }
}
