use crate::geom::{angle_diff_abs, axis_vec_diff, is_orthogonal};
use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use robot_calib_core::Corner;
use std::collections::VecDeque;
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    /// Grid step `(di, dj)` with `i` along image +x and `j` along image +y.
    fn step(self) -> (i32, i32) {
        match self {
            NeighborDirection::Right => (1, 0),
            NeighborDirection::Left => (-1, 0),
            NeighborDirection::Up => (0, -1),
            NeighborDirection::Down => (0, 1),
        }
    }

    fn slot(self) -> usize {
        match self {
            NeighborDirection::Right => 0,
            NeighborDirection::Left => 1,
            NeighborDirection::Up => 2,
            NeighborDirection::Down => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

fn direction_quadrant(v: &Vector2<f32>) -> NeighborDirection {
    if v.x.abs() > v.y.abs() {
        if v.x >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if v.y >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

/// Validate an edge between two corners.
///
/// Adjacent chessboard corners have orthogonal light-square diagonals, and
/// the edge joining them sits at ~45° to both diagonals.
fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();
    if !is_orthogonal(corner.orientation, neighbor.orientation, tol) {
        return None;
    }

    let v = neighbor.position - corner.position;
    let distance = v.norm();
    if distance < params.min_spacing_pix || distance > params.max_spacing_pix {
        return None;
    }

    let edge_angle = v.y.atan2(v.x);
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    let score_orientation =
        (FRAC_PI_2 - angle_diff_abs(corner.orientation, neighbor.orientation)).abs();

    Some(NodeNeighbor {
        direction: direction_quadrant(&v),
        index: neighbor_index,
        distance,
        score: score_corner + score_neighbor + score_orientation,
    })
}

/// Keep at most one neighbor per direction, choosing the lowest-score candidate.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

/// 4-connected neighbour graph over a corner cloud.
pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();

        let neighbors = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let query = [corner.position.x, corner.position.y];
                let candidates = tree
                    .nearest_n::<SquaredEuclidean>(&query, params.k_neighbors + 1)
                    .into_iter()
                    .map(|nn| nn.item as usize)
                    .filter(|&j| j != i)
                    .filter_map(|j| is_good_neighbor(corner, &corners[j], j, params))
                    .collect();
                select_neighbors(candidates)
            })
            .collect();

        Self { neighbors }
    }

    /// Connected components, largest first.
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.neighbors.len()];
        let mut components = Vec::new();

        for start in 0..self.neighbors.len() {
            if visited[start] {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if visited[node] {
                    continue;
                }
                visited[node] = true;
                component.push(node);
                stack.extend(
                    self.neighbors[node]
                        .iter()
                        .map(|n| n.index)
                        .filter(|&j| !visited[j]),
                );
            }
            components.push(component);
        }

        components.sort_by_key(|c| std::cmp::Reverse(c.len()));
        components
    }

    /// BFS integer coordinates `(node, i, j)` for one component, rooted at its first node.
    pub fn assign_grid_coordinates(&self, component: &[usize]) -> Vec<(usize, i32, i32)> {
        let Some(&start) = component.first() else {
            return Vec::new();
        };

        let mut coords = Vec::with_capacity(component.len());
        let mut visited = vec![false; self.neighbors.len()];
        let mut queue = VecDeque::from([(start, 0i32, 0i32)]);

        while let Some((node, i, j)) = queue.pop_front() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            coords.push((node, i, j));

            for n in &self.neighbors[node] {
                let (di, dj) = n.direction.step();
                queue.push_back((n.index, i + di, j + dj));
            }
        }

        coords
    }
}
