use crate::detector::DetectionFailure;
use crate::geom::{axis_diff, is_orthogonal};
use crate::params::GridGraphParams;
use crate::response::Corner;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};
use std::f32::consts::FRAC_PI_4;

/// Minimum |cos| between an edge and the local axis it is assigned to.
const MIN_AXIS_ALIGNMENT: f32 = 0.7;

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub index: usize,
    pub distance: f32,
    /// Unit vector from the node towards this neighbour.
    pub direction: Vector2<f32>,
}

/// Adjacency between saddle candidates. Edges are mutual.
pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
) -> Option<NodeNeighbor> {
    // Adjacent inner corners of a chessboard have swapped bright diagonals.
    if !is_orthogonal(
        corner.orientation,
        neighbor.orientation,
        params.orientation_tolerance_deg.to_radians(),
    ) {
        return None;
    }

    let vec_to_neighbor = neighbor.position - corner.position;
    let distance = vec_to_neighbor.norm();
    if distance < params.min_spacing_pix {
        return None;
    }

    // The edge runs along a grid line, i.e. at 45° to both diagonals.
    let edge_angle = vec_to_neighbor.y.atan2(vec_to_neighbor.x);
    let tol = params.edge_tolerance_deg.to_radians();
    if (axis_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs() > tol
        || (axis_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs() > tol
    {
        return None;
    }

    Some(NodeNeighbor {
        index: neighbor_index,
        distance,
        direction: vec_to_neighbor / distance,
    })
}

/// Closest candidates first; keep up to four that point in clearly different
/// directions and are not much farther than the closest one.
fn select_neighbors(
    mut candidates: Vec<NodeNeighbor>,
    params: &GridGraphParams,
) -> Vec<NodeNeighbor> {
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.index.cmp(&b.index))
    });

    let min_sep_cos = params.min_separation_deg.to_radians().cos();
    let mut selected: Vec<NodeNeighbor> = Vec::with_capacity(4);
    for candidate in candidates {
        if selected.len() == 4 {
            break;
        }
        if let Some(first) = selected.first() {
            if candidate.distance > params.max_edge_ratio * first.distance {
                break;
            }
        }
        let separated = selected
            .iter()
            .all(|s| s.direction.dot(&candidate.direction) < min_sep_cos);
        if separated {
            selected.push(candidate);
        }
    }
    selected
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();

        let mut candidates = Vec::with_capacity(corners.len());
        for (i, corner) in corners.iter().enumerate() {
            let query_point = [corner.position.x, corner.position.y];
            // +1: the query point is its own nearest neighbour.
            let results =
                tree.nearest_n::<SquaredEuclidean>(&query_point, params.k_neighbors + 1);

            let node_neighbors = results
                .into_iter()
                .map(|nn| nn.item as usize)
                .filter(|&j| j != i)
                .filter_map(|j| is_good_neighbor(corner, &corners[j], j, params))
                .collect();
            candidates.push(select_neighbors(node_neighbors, params));
        }

        // Keep only edges both endpoints agree on.
        let neighbors = candidates
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter()
                    .filter(|n| candidates[n.index].iter().any(|m| m.index == i))
                    .cloned()
                    .collect()
            })
            .collect();

        Self { neighbors }
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
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

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        component.sort_unstable();
        components.push(component);
    }

    components
}

/// Integer grid coordinates for one component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridCoords {
    /// `(node, i, j)` with `i, j >= 0`.
    pub nodes: Vec<(usize, i32, i32)>,
    pub width: usize,
    pub height: usize,
}

impl GridCoords {
    pub fn is_complete(&self) -> bool {
        self.nodes.len() == self.width * self.height
    }
}

/// Start node: best connected node closest to the component centroid.
fn seed_node(graph: &GridGraph, corners: &[Corner], component: &[usize]) -> Option<usize> {
    let n = component.len() as f32;
    let (sx, sy) = component.iter().fold((0.0f32, 0.0f32), |(sx, sy), &i| {
        (sx + corners[i].position.x, sy + corners[i].position.y)
    });
    let (cx, cy) = (sx / n, sy / n);
    let dist = |i: usize| {
        let p = corners[i].position;
        (p.x - cx).powi(2) + (p.y - cy).powi(2)
    };

    component.iter().copied().min_by(|&a, &b| {
        graph.neighbors[b]
            .len()
            .cmp(&graph.neighbors[a].len())
            .then(dist(a).total_cmp(&dist(b)))
            .then(a.cmp(&b))
    })
}

/// Breadth-first walk assigning `(i, j)` to every node of `component`.
///
/// Each visited node carries local unit axes `(u, v)`. A step along an edge
/// is classified by projecting it onto those axes, and the axis it followed
/// is replaced by the edge direction so the frame bends with perspective.
/// Two nodes claiming one cell, or one node reached at two cells, is a
/// topology conflict.
pub fn assign_grid_coordinates(
    graph: &GridGraph,
    corners: &[Corner],
    component: &[usize],
) -> Result<GridCoords, DetectionFailure> {
    let Some(seed) = seed_node(graph, corners, component) else {
        return Ok(GridCoords {
            nodes: Vec::new(),
            width: 0,
            height: 0,
        });
    };
    let seed_edges = &graph.neighbors[seed];
    let u0 = seed_edges
        .first()
        .map(|n| n.direction)
        .unwrap_or_else(|| Vector2::new(1.0, 0.0));
    let mut v0 = Vector2::new(-u0.y, u0.x);
    let mut best_dot = f32::INFINITY;
    for n in seed_edges.iter().skip(1) {
        let d = n.direction.dot(&u0).abs();
        if d < best_dot {
            best_dot = d;
            v0 = n.direction;
        }
    }
    if u0.x * v0.y - u0.y * v0.x < 0.0 {
        v0 = -v0;
    }

    let mut coord_of: HashMap<usize, (i32, i32)> = HashMap::new();
    let mut node_at: HashMap<(i32, i32), usize> = HashMap::new();
    let mut queue = VecDeque::new();
    coord_of.insert(seed, (0, 0));
    node_at.insert((0, 0), seed);
    queue.push_back((seed, 0i32, 0i32, u0, v0));

    while let Some((node, i, j, u, v)) = queue.pop_front() {
        for neighbor in &graph.neighbors[node] {
            let e = neighbor.direction;
            let du = e.dot(&u);
            let dv = e.dot(&v);
            let (di, dj, nu, nv) = if du.abs() >= dv.abs() {
                if du.abs() < MIN_AXIS_ALIGNMENT {
                    continue;
                }
                let s = du.signum();
                (s as i32, 0, e * s, v)
            } else {
                if dv.abs() < MIN_AXIS_ALIGNMENT {
                    continue;
                }
                let s = dv.signum();
                (0, s as i32, u, e * s)
            };
            let cell = (i + di, j + dj);

            match (coord_of.get(&neighbor.index), node_at.get(&cell)) {
                (Some(&existing), _) if existing != cell => {
                    return Err(DetectionFailure::TopologyConflict {
                        i: cell.0,
                        j: cell.1,
                    });
                }
                (Some(_), _) => {}
                (None, Some(_)) => {
                    return Err(DetectionFailure::TopologyConflict {
                        i: cell.0,
                        j: cell.1,
                    });
                }
                (None, None) => {
                    coord_of.insert(neighbor.index, cell);
                    node_at.insert(cell, neighbor.index);
                    queue.push_back((neighbor.index, cell.0, cell.1, nu, nv));
                }
            }
        }
    }

    let min_i = coord_of.values().map(|c| c.0).min().unwrap_or(0);
    let max_i = coord_of.values().map(|c| c.0).max().unwrap_or(0);
    let min_j = coord_of.values().map(|c| c.1).min().unwrap_or(0);
    let max_j = coord_of.values().map(|c| c.1).max().unwrap_or(0);

    let mut nodes: Vec<(usize, i32, i32)> = coord_of
        .into_iter()
        .map(|(node, (i, j))| (node, i - min_i, j - min_j))
        .collect();
    nodes.sort_unstable_by_key(|&(_, i, j)| (j, i));

    Ok(GridCoords {
        nodes,
        width: (max_i - min_i + 1) as usize,
        height: (max_j - min_j + 1) as usize,
    })
}
