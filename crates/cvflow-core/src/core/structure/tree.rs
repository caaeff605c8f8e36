use nalgebra::Vector3;

/// A spanning tree over a set of atoms, listed in insertion order.
///
/// `order[0]` is the root. For every `k >= 1`, `parents[k - 1]` is the parent of
/// `order[k]` and always appears earlier in `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanningTree {
    pub order: Vec<usize>,
    pub parents: Vec<usize>,
}

/// Minimum spanning tree of `positions` (Prim's algorithm rooted at the first atom).
pub fn minimum_spanning_tree(positions: &[Vector3<f64>]) -> SpanningTree {
    let n = positions.len();
    let mut order = Vec::with_capacity(n);
    let mut parents = Vec::with_capacity(n.saturating_sub(1));
    if n == 0 {
        return SpanningTree { order, parents };
    }

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut link = vec![0usize; n];
    let mut current = 0;
    in_tree[0] = true;
    order.push(0);

    for _ in 1..n {
        let mut next = None;
        let mut next_distance = f64::INFINITY;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let d = (positions[j] - positions[current]).norm_squared();
            if d < best[j] {
                best[j] = d;
                link[j] = current;
            }
            if best[j] < next_distance {
                next_distance = best[j];
                next = Some(j);
            }
        }
        let Some(j) = next else { break };
        in_tree[j] = true;
        order.push(j);
        parents.push(link[j]);
        current = j;
    }
    SpanningTree { order, parents }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_of_points_follows_nearest_neighbours() {
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(3.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        ];
        let tree = minimum_spanning_tree(&positions);
        assert_eq!(tree.order, vec![0, 2, 3, 1]);
        assert_eq!(tree.parents, vec![0, 2, 3]);
    }

    #[test]
    fn branches_attach_to_closest_tree_member() {
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.5, 0.0),
            Vector3::new(1.0, 0.9, 0.0),
        ];
        let tree = minimum_spanning_tree(&positions);
        assert_eq!(tree.order, vec![0, 1, 3, 2]);
        assert_eq!(tree.parents, vec![0, 1, 3]);
    }

    #[test]
    fn every_parent_precedes_its_child() {
        let positions: Vec<_> = (0..20)
            .map(|i| {
                let t = i as f64 * 0.7;
                Vector3::new(t.cos() * 3.0, t.sin() * 3.0, t * 0.2)
            })
            .collect();
        let tree = minimum_spanning_tree(&positions);
        assert_eq!(tree.order.len(), 20);
        for (k, parent) in tree.parents.iter().enumerate() {
            let child_pos = k + 1;
            let parent_pos = tree.order.iter().position(|x| x == parent).unwrap();
            assert!(parent_pos < child_pos);
        }
    }
}
