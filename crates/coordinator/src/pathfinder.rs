//! `GridPathfinder` — worker-offloaded A* over a static-terrain + dynamic
//! overlay grid.
//!
//! # Determinism
//!
//! Two calls against the same grid snapshot and the same request must
//! return the same waypoint sequence no matter how fast the worker thread
//! happens to drain its queue. That means: neighbour expansion order is
//! fixed, the heap's tie-break on equal `f` is fixed (insertion order, via
//! a monotonically increasing sequence number folded into `Ord`), and no
//! floating-point comparison that could vary by platform (`f64::total_cmp`,
//! never a library transcendental whose result isn't bit-reproducible)
//! enters the ordering.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

/// One of the seven terrain classes a tile may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerrainClass {
    Sand,
    Rock,
    SpiceLow,
    SpiceHigh,
    Dunes,
    Cliff,
    Concrete,
    InfantryOnlyRock,
}

impl TerrainClass {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Sand),
            1 => Some(Self::Rock),
            2 => Some(Self::SpiceLow),
            3 => Some(Self::SpiceHigh),
            4 => Some(Self::Dunes),
            5 => Some(Self::Cliff),
            6 => Some(Self::Concrete),
            7 => Some(Self::InfantryOnlyRock),
            _ => None,
        }
    }

    /// Cost multiplier applied to the base cardinal/diagonal move cost.
    fn cost_multiplier(self) -> f64 {
        match self {
            Self::Dunes => 1.5,
            Self::Rock | Self::InfantryOnlyRock => 0.8,
            Self::Concrete => 0.7,
            Self::Sand | Self::SpiceLow | Self::SpiceHigh | Self::Cliff => 1.0,
        }
    }
}

/// The mobility category of the unit a path is being computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraversalClass {
    Infantry,
    Vehicle,
}

impl TraversalClass {
    fn can_enter(self, terrain: TerrainClass) -> bool {
        match self {
            Self::Infantry => terrain != TerrainClass::Cliff,
            Self::Vehicle => {
                terrain != TerrainClass::Cliff && terrain != TerrainClass::InfantryOnlyRock
            }
        }
    }
}

const SQRT2: f64 = 1.414_213_562_373_095_1;
const NODE_BUDGET_DEFAULT: u32 = 3000;
const GOAL_RELOCATION_RADIUS: i32 = 9;
const PARTIAL_PATH_HEURISTIC_RATIO: f64 = 0.70;

/// A static-type + dynamic-block grid the pathfinder searches over. Owned
/// by the pathfinder; the simulator pushes snapshots/deltas in, it never
/// holds a shared mutable reference into the simulator's own state.
#[derive(Debug, Clone)]
pub struct Grid {
    width: u32,
    height: u32,
    terrain: Vec<TerrainClass>,
    blocked: HashSet<u32>,
}

impl Grid {
    pub fn new(width: u32, height: u32, terrain_bytes: &[u8]) -> Self {
        let terrain = terrain_bytes
            .iter()
            .map(|&b| TerrainClass::from_byte(b).unwrap_or(TerrainClass::Sand))
            .collect();
        Self {
            width,
            height,
            terrain,
            blocked: HashSet::new(),
        }
    }

    pub fn update_terrain(&mut self, terrain_bytes: &[u8]) {
        self.terrain = terrain_bytes
            .iter()
            .map(|&b| TerrainClass::from_byte(b).unwrap_or(TerrainClass::Sand))
            .collect();
    }

    pub fn update_blocked(&mut self, tile_indices: &[u32]) {
        self.blocked = tile_indices.iter().copied().collect();
    }

    fn index_of(&self, x: i32, z: i32) -> Option<u32> {
        if x < 0 || z < 0 || x as u32 >= self.width || z as u32 >= self.height {
            return None;
        }
        Some(z as u32 * self.width + x as u32)
    }

    fn in_bounds(&self, x: i32, z: i32) -> bool {
        x >= 0 && z >= 0 && (x as u32) < self.width && (z as u32) < self.height
    }

    fn terrain_at(&self, x: i32, z: i32) -> Option<TerrainClass> {
        self.index_of(x, z).map(|i| self.terrain[i as usize])
    }

    fn is_passable(&self, x: i32, z: i32, traversal: TraversalClass) -> bool {
        let Some(idx) = self.index_of(x, z) else {
            return false;
        };
        if self.blocked.contains(&idx) {
            return false;
        }
        traversal.can_enter(self.terrain[idx as usize])
    }
}

/// `(start_tile, goal_tile, traversal_class, max_nodes, request_id) → waypoints`.
#[derive(Debug, Clone)]
pub struct PathRequest {
    pub start: (i32, i32),
    pub goal: (i32, i32),
    pub traversal_class: TraversalClass,
    pub max_nodes: u32,
    /// Opaque to the pathfinder; returned verbatim for correlation.
    pub request_id: u64,
}

impl PathRequest {
    pub fn new(start: (i32, i32), goal: (i32, i32), traversal_class: TraversalClass) -> Self {
        Self {
            start,
            goal,
            traversal_class,
            max_nodes: NODE_BUDGET_DEFAULT,
            request_id: 0,
        }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: u32) -> Self {
        self.max_nodes = max_nodes;
        self
    }
}

/// The outcome of a path search.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub request_id: u64,
    /// `None` when no path (or no usable partial path) was found.
    pub waypoints: Option<Vec<(i32, i32)>>,
}

#[derive(Clone, Copy)]
struct OpenEntry {
    f: f64,
    g: f64,
    h: f64,
    /// Monotonic insertion counter; the sole deterministic tie-break when
    /// `f` (and thus implicitly `g`/`h`) is equal between two entries.
    seq: u64,
    x: i32,
    z: i32,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.seq == other.seq
    }
}
impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse f so the lowest-f entry pops
        // first, and break ties on earliest insertion so expansion order
        // never depends on hash/heap internals.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

fn octile_heuristic(dx: i32, dz: i32) -> f64 {
    let dx = dx.unsigned_abs() as f64;
    let dz = dz.unsigned_abs() as f64;
    dx.max(dz) + (SQRT2 - 1.0) * dx.min(dz)
}

/// The eight neighbour offsets in a fixed, deterministic expansion order.
const NEIGHBOURS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

fn nearest_passable_within(
    grid: &Grid,
    goal: (i32, i32),
    traversal: TraversalClass,
    radius: i32,
) -> Option<(i32, i32)> {
    if grid.is_passable(goal.0, goal.1, traversal) {
        return Some(goal);
    }
    let mut best: Option<((i32, i32), i32)> = None;
    for dz in -radius..=radius {
        for dx in -radius..=radius {
            let chebyshev = dx.abs().max(dz.abs());
            if chebyshev == 0 || chebyshev > radius {
                continue;
            }
            let candidate = (goal.0 + dx, goal.1 + dz);
            if !grid.is_passable(candidate.0, candidate.1, traversal) {
                continue;
            }
            match best {
                Some((_, best_dist)) if chebyshev >= best_dist => {}
                _ => best = Some((candidate, chebyshev)),
            }
        }
    }
    best.map(|(tile, _)| tile)
}

/// Collapse collinear consecutive waypoints.
fn simplify(waypoints: Vec<(i32, i32)>) -> Vec<(i32, i32)> {
    if waypoints.len() < 3 {
        return waypoints;
    }
    let mut simplified = Vec::with_capacity(waypoints.len());
    simplified.push(waypoints[0]);
    for window in waypoints.windows(3) {
        let (ax, az) = simplified[simplified.len() - 1];
        let (bx, bz) = window[1];
        let (cx, cz) = window[2];
        let d1 = (bx - ax, bz - az);
        let d2 = (cx - bx, cz - bz);
        if d1 != d2 {
            simplified.push((bx, bz));
        }
    }
    simplified.push(*waypoints.last().unwrap());
    simplified
}

/// Run one A* search to completion against `grid`. Pure function of its
/// inputs: no wall-clock reads, no shared mutable state.
pub fn find_path(grid: &Grid, request: &PathRequest) -> PathResult {
    let empty = PathResult {
        request_id: request.request_id,
        waypoints: None,
    };

    if !grid.in_bounds(request.start.0, request.start.1) {
        return empty;
    }

    let goal = match nearest_passable_within(
        grid,
        request.goal,
        request.traversal_class,
        GOAL_RELOCATION_RADIUS,
    ) {
        Some(goal) => goal,
        None => {
            debug!(request_id = request.request_id, goal = ?request.goal, "no passable tile within goal-relocation radius");
            return empty;
        }
    };
    if goal != request.goal {
        debug!(request_id = request.request_id, original = ?request.goal, relocated = ?goal, "goal relocated to nearest passable tile");
    }

    if request.start == goal {
        return PathResult {
            request_id: request.request_id,
            waypoints: Some(vec![request.start]),
        };
    }

    let start_h = octile_heuristic(goal.0 - request.start.0, goal.1 - request.start.1);

    let mut open = BinaryHeap::new();
    let mut seq: u64 = 0;
    let mut best_g: HashMap<(i32, i32), f64> = HashMap::new();
    let mut parent: HashMap<(i32, i32), (i32, i32)> = HashMap::new();
    let mut closed: HashSet<(i32, i32)> = HashSet::new();

    best_g.insert(request.start, 0.0);
    open.push(OpenEntry {
        f: start_h,
        g: 0.0,
        h: start_h,
        seq,
        x: request.start.0,
        z: request.start.1,
    });

    let mut expansions: u32 = 0;
    let mut best_progress: Option<((i32, i32), f64)> = None;

    while let Some(current) = open.pop() {
        let pos = (current.x, current.z);
        if closed.contains(&pos) {
            continue;
        }
        if let Some(&recorded_g) = best_g.get(&pos)
            && current.g > recorded_g
        {
            continue;
        }
        closed.insert(pos);
        expansions += 1;

        if best_progress.is_none_or(|(_, h)| current.h < h) {
            best_progress = Some((pos, current.h));
        }

        if pos == goal {
            return PathResult {
                request_id: request.request_id,
                waypoints: Some(simplify(reconstruct_path(&parent, request.start, pos))),
            };
        }

        if expansions > request.max_nodes {
            break;
        }

        for &(dx, dz) in &NEIGHBOURS {
            let nx = pos.0 + dx;
            let nz = pos.1 + dz;
            if !grid.is_passable(nx, nz, request.traversal_class) {
                continue;
            }
            let is_diagonal = dx != 0 && dz != 0;
            if is_diagonal {
                // Corner-cutting forbidden: both adjacent cardinals must be passable.
                let cardinal_a_passable = grid.is_passable(pos.0 + dx, pos.1, request.traversal_class);
                let cardinal_b_passable = grid.is_passable(pos.0, pos.1 + dz, request.traversal_class);
                if !cardinal_a_passable || !cardinal_b_passable {
                    continue;
                }
            }
            let Some(terrain) = grid.terrain_at(nx, nz) else {
                continue;
            };
            let base_cost = if is_diagonal { SQRT2 } else { 1.0 };
            let step_cost = base_cost * terrain.cost_multiplier();
            let tentative_g = current.g + step_cost;

            let improves = match best_g.get(&(nx, nz)) {
                Some(&existing) => tentative_g < existing,
                None => true,
            };
            if improves {
                best_g.insert((nx, nz), tentative_g);
                parent.insert((nx, nz), pos);
                let h = octile_heuristic(goal.0 - nx, goal.1 - nz);
                seq += 1;
                open.push(OpenEntry {
                    f: tentative_g + h,
                    g: tentative_g,
                    h,
                    seq,
                    x: nx,
                    z: nz,
                });
            }
        }
    }

    warn!(request_id = request.request_id, expansions, max_nodes = request.max_nodes, "node budget exhausted before reaching goal");

    match best_progress {
        Some((pos, remaining_h)) if remaining_h < start_h * PARTIAL_PATH_HEURISTIC_RATIO => {
            debug!(request_id = request.request_id, "returning best-partial path after node budget exhaustion");
            PathResult {
                request_id: request.request_id,
                waypoints: Some(simplify(reconstruct_path(&parent, request.start, pos))),
            }
        }
        _ => empty,
    }
}

fn reconstruct_path(
    parent: &HashMap<(i32, i32), (i32, i32)>,
    start: (i32, i32),
    goal: (i32, i32),
) -> Vec<(i32, i32)> {
    let mut path = vec![goal];
    let mut current = goal;
    while current != start {
        match parent.get(&current) {
            Some(&prev) => {
                path.push(prev);
                current = prev;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

// ============================================================================
// Worker thread
// ============================================================================

/// A message on the worker's single request queue: either a search to run
/// or a grid mutation to apply before the next search. Both share one
/// channel so that, say, a `blocked` update sent after request A but before
/// request B is guaranteed to be applied before B runs — a separate channel
/// per concern would leave that ordering to chance.
enum WorkerMessage {
    Search(PathRequest),
    UpdateTerrain(Vec<u8>),
    UpdateBlocked(Vec<u32>),
}

/// Runs [`find_path`] requests on a dedicated thread so the hot simulation
/// tick is never blocked on a search. Requests are processed strictly FIFO;
/// determinism of a returned path depends only on the grid snapshot at the
/// time `find_path` runs, not on how fast this thread drains its queue.
/// `update_terrain`/`update_blocked` go over the same queue, so the worker's
/// grid reflects the latest snapshot as of each search's turn rather than
/// being frozen at the moment the thread was spawned.
pub struct PathfinderWorker {
    request_tx: Sender<WorkerMessage>,
    result_rx: Receiver<PathResult>,
    _handle: std::thread::JoinHandle<()>,
}

impl PathfinderWorker {
    pub fn spawn(initial_grid: Grid) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<WorkerMessage>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<PathResult>();

        let handle = std::thread::Builder::new()
            .name("lockstep-pathfinder".into())
            .spawn(move || {
                let mut grid = initial_grid;
                for message in request_rx.iter() {
                    match message {
                        WorkerMessage::Search(request) => {
                            let result = find_path(&grid, &request);
                            if result_tx.send(result).is_err() {
                                break;
                            }
                        }
                        WorkerMessage::UpdateTerrain(terrain_bytes) => {
                            grid.update_terrain(&terrain_bytes);
                        }
                        WorkerMessage::UpdateBlocked(tile_indices) => {
                            grid.update_blocked(&tile_indices);
                        }
                    }
                }
            })
            .expect("failed to spawn pathfinder worker thread");

        Self {
            request_tx,
            result_rx,
            _handle: handle,
        }
    }

    /// Enqueue a request. Errs if the worker thread has exited.
    pub fn submit(&self, request: PathRequest) -> Result<(), crossbeam_channel::SendError<PathRequest>> {
        self.request_tx.send(WorkerMessage::Search(request)).map_err(|e| {
            let WorkerMessage::Search(request) = e.into_inner() else {
                unreachable!("only a Search was sent")
            };
            crossbeam_channel::SendError(request)
        })
    }

    /// Queue a terrain-class overlay update, applied before whatever search
    /// is next in line. Errs if the worker thread has exited.
    pub fn update_terrain(&self, terrain_bytes: Vec<u8>) -> Result<(), crossbeam_channel::SendError<()>> {
        self.request_tx
            .send(WorkerMessage::UpdateTerrain(terrain_bytes))
            .map_err(|_| crossbeam_channel::SendError(()))
    }

    /// Queue a blocked-tile overlay update, applied before whatever search
    /// is next in line. Errs if the worker thread has exited.
    pub fn update_blocked(&self, tile_indices: Vec<u32>) -> Result<(), crossbeam_channel::SendError<()>> {
        self.request_tx
            .send(WorkerMessage::UpdateBlocked(tile_indices))
            .map_err(|_| crossbeam_channel::SendError(()))
    }

    /// Non-blocking drain of any results the worker has produced so far.
    pub fn try_recv_all(&self) -> Vec<PathResult> {
        self.result_rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_grid(width: u32, height: u32) -> Grid {
        Grid::new(width, height, &vec![0u8; (width * height) as usize])
    }

    #[test]
    fn straight_line_on_open_sand() {
        let grid = empty_grid(20, 20);
        let request = PathRequest::new((0, 0), (5, 0), TraversalClass::Vehicle);
        let result = find_path(&grid, &request);
        let waypoints = result.waypoints.unwrap();
        assert_eq!(waypoints.first(), Some(&(0, 0)));
        assert_eq!(waypoints.last(), Some(&(5, 0)));
    }

    #[test]
    fn identical_inputs_produce_identical_paths() {
        let grid = empty_grid(30, 30);
        let request = PathRequest::new((0, 0), (20, 13), TraversalClass::Infantry);
        let a = find_path(&grid, &request);
        let b = find_path(&grid, &request);
        assert_eq!(a, b);
    }

    #[test]
    fn corner_cutting_is_rejected() {
        let mut bytes = vec![0u8; 9]; // 3x3, sand
        // Block (1,0) and (0,1): only a diagonal step from (0,0) to (1,1) is
        // left open if corner-cutting were allowed.
        bytes[1] = 5; // cliff at (1, 0)
        bytes[3] = 5; // cliff at (0, 1)
        let mut grid = Grid::new(3, 3, &bytes);
        grid.update_blocked(&[]);
        let request = PathRequest::new((0, 0), (1, 1), TraversalClass::Vehicle);
        let result = find_path(&grid, &request);
        // No legal route from (0,0) to (1,1) on a 3x3 grid with those two
        // tiles blocked and corner-cutting forbidden.
        assert!(result.waypoints.is_none());
    }

    #[test]
    fn vehicle_rejects_infantry_only_rock_infantry_does_not() {
        let mut bytes = vec![0u8; 9];
        bytes[4] = 7; // infantry-only-rock at the centre (1,1)
        let grid = Grid::new(3, 3, &bytes);

        let vehicle_request = PathRequest::new((1, 0), (1, 2), TraversalClass::Vehicle);
        let vehicle_result = find_path(&grid, &vehicle_request);
        // Vehicle must detour around the centre tile but a 3x3 grid still
        // offers a corner route.
        assert!(vehicle_result.waypoints.is_some());
        assert!(!vehicle_result
            .waypoints
            .unwrap()
            .contains(&(1, 1)));

        let infantry_request = PathRequest::new((1, 0), (1, 2), TraversalClass::Infantry);
        let infantry_result = find_path(&grid, &infantry_request);
        assert!(infantry_result.waypoints.unwrap().contains(&(1, 1)));
    }

    #[test]
    fn goal_relocation_finds_nearest_passable_tile() {
        let mut bytes = vec![0u8; 21 * 21];
        bytes[10 * 21 + 10] = 5; // cliff at (10, 10)
        let grid = Grid::new(21, 21, &bytes);
        let request = PathRequest::new((0, 0), (10, 10), TraversalClass::Vehicle);
        let result = find_path(&grid, &request);
        let waypoints = result.waypoints.unwrap();
        let last = *waypoints.last().unwrap();
        assert_ne!(last, (10, 10));
        assert!((last.0 - 10).abs().max((last.1 - 10).abs()) <= GOAL_RELOCATION_RADIUS);
    }

    #[test]
    fn no_path_when_goal_fully_surrounded_by_cliff() {
        let width = 25;
        let height = 25;
        let mut bytes = vec![0u8; (width * height) as usize];
        for dz in -GOAL_RELOCATION_RADIUS..=GOAL_RELOCATION_RADIUS {
            for dx in -GOAL_RELOCATION_RADIUS..=GOAL_RELOCATION_RADIUS {
                let x = 12 + dx;
                let z = 12 + dz;
                if x >= 0 && z >= 0 && (x as u32) < width && (z as u32) < height {
                    bytes[(z as u32 * width + x as u32) as usize] = 5;
                }
            }
        }
        let grid = Grid::new(width, height, &bytes);
        let request = PathRequest::new((0, 0), (12, 12), TraversalClass::Vehicle);
        let result = find_path(&grid, &request);
        assert!(result.waypoints.is_none());
    }

    #[test]
    fn request_id_is_returned_verbatim() {
        let grid = empty_grid(10, 10);
        let request = PathRequest::new((0, 0), (3, 3), TraversalClass::Infantry).with_request_id(777);
        let result = find_path(&grid, &request);
        assert_eq!(result.request_id, 777);
    }

    #[test]
    fn worker_processes_requests_fifo_and_returns_matching_results() {
        let grid = empty_grid(15, 15);
        let worker = PathfinderWorker::spawn(grid);
        for id in 0..5u64 {
            worker
                .submit(PathRequest::new((0, 0), (5, 5), TraversalClass::Vehicle).with_request_id(id))
                .unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 5 {
            seen.extend(worker.try_recv_all());
        }
        let ids: Vec<u64> = seen.iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn worker_sees_blocked_update_applied_after_spawn() {
        let grid = empty_grid(5, 5);
        let worker = PathfinderWorker::spawn(grid);

        // Block column x=2 for every row except z=0, leaving only a detour
        // through the top row between (0,2) and (4,2) on a 5x5 grid. If the
        // worker's grid never saw this update, the direct route straight
        // through (2,2) would still be found.
        let blocked: Vec<u32> = (1..5u32).map(|z| z * 5 + 2).collect();
        worker.update_blocked(blocked).unwrap();
        worker
            .submit(PathRequest::new((0, 2), (4, 2), TraversalClass::Vehicle).with_request_id(1))
            .unwrap();

        let mut seen = Vec::new();
        while seen.is_empty() {
            seen.extend(worker.try_recv_all());
        }
        let waypoints = seen[0].waypoints.clone().unwrap();
        assert!(waypoints.iter().all(|&(x, z)| x != 2 || z == 0));
    }
}
