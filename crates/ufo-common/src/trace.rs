// trace.rs - line tests, swept box traces and transformed model traces

use crate::common::{com_dprintf, com_error, ErrorCode};
use crate::cvar::cvar_variable_value;
use crate::q_shared::{
    angle_vectors_tuple, box_on_plane_side, dot_product, vector_add, vector_center_from_mins_maxs,
    vector_compare, vector_compare_eps, vector_interpolation, vector_nearer, vector_not_empty,
    vector_subtract, Aabb, CPlane, Contents, LevelMask, Trace, TracePlane, Vec3, DIST_EPSILON,
    EQUAL_EPSILON, LEVEL_ACTORCLIP, LEVEL_LASTVISIBLE, LEVEL_LIGHTCLIP, LEVEL_WEAPONCLIP, MASK_ALL,
    ON_EPSILON, PLANE_NONE, PSIDE_BACK, PSIDE_FRONT, TL_FLAG_ACTORCLIP, TL_FLAG_REGULAR_LEVELS,
    TL_FLAG_WEAPONCLIP,
};
use crate::qfiles::{LEAFNODE, MAX_LEAFS};
use crate::tnode::{TChild, TNode, TraceTile};

// ============================================================
// Per-call trace state
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub traces: u64,
    pub brush_traces: u64,
}

/// Owned by whoever drives the traces. Each box trace takes a new check
/// token, so a brush listed in several leafs is clipped once per trace.
#[derive(Debug, Clone)]
pub struct TraceContext {
    checkcount: u32,
    brush_stamps: Vec<u32>,
    leaf_capacity: usize,
    pub stats: TraceStats,
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceContext {
    /// The position test leaf list holds `cm_maxleafs` entries.
    pub fn new() -> Self {
        let configured = cvar_variable_value("cm_maxleafs");
        let leaf_capacity = if configured >= 1.0 {
            configured as usize
        } else {
            MAX_LEAFS
        };
        Self::with_leaf_capacity(leaf_capacity)
    }

    pub fn with_leaf_capacity(leaf_capacity: usize) -> Self {
        Self {
            checkcount: 0,
            brush_stamps: Vec::new(),
            leaf_capacity,
            stats: TraceStats::default(),
        }
    }

    pub fn leaf_capacity(&self) -> usize {
        self.leaf_capacity
    }

    fn begin(&mut self, num_brushes: usize) {
        self.checkcount = self.checkcount.wrapping_add(1);
        if self.checkcount == 0 {
            self.brush_stamps.fill(0);
            self.checkcount = 1;
        }
        if self.brush_stamps.len() < num_brushes {
            self.brush_stamps.resize(num_brushes, 0);
        }
        self.stats.traces += 1;
    }

    /// False if the brush was already looked at during this trace.
    #[inline]
    fn first_visit(&mut self, brush: usize) -> bool {
        if self.brush_stamps[brush] == self.checkcount {
            return false;
        }
        self.brush_stamps[brush] = self.checkcount;
        true
    }
}

// ============================================================
// Line tests
// ============================================================

#[inline]
fn plane_distances(t: &TNode, start: &Vec3, stop: &Vec3) -> (f32, f32) {
    if t.plane_type < 3 {
        let axis = t.plane_type as usize;
        (start[axis] - t.dist, stop[axis] - t.dist)
    } else {
        (
            dot_product(start, &t.normal) - t.dist,
            dot_product(stop, &t.normal) - t.dist,
        )
    }
}

/// True if anything blocks the segment below `node`.
pub fn test_line_r(tnodes: &[TNode], node: TChild, start: &Vec3, stop: &Vec3) -> bool {
    let t = match node {
        TChild::Empty => return false,
        TChild::Blocking(_) => return true,
        TChild::Node(n) => &tnodes[n as usize],
    };

    if t.plane_type == PLANE_NONE {
        return test_line_r(tnodes, t.children[0], start, stop)
            || test_line_r(tnodes, t.children[1], start, stop);
    }

    let (front, back) = plane_distances(t, start, stop);

    if front >= -ON_EPSILON && back >= -ON_EPSILON {
        return test_line_r(tnodes, t.children[0], start, stop);
    }
    if front < ON_EPSILON && back < ON_EPSILON {
        return test_line_r(tnodes, t.children[1], start, stop);
    }

    let side = (front < 0.0) as usize;
    let frac = front / (front - back);
    let mid = vector_interpolation(start, stop, frac);

    test_line_r(tnodes, t.children[side], start, &mid)
        || test_line_r(tnodes, t.children[side ^ 1], &mid, stop)
}

/// Like `test_line_r`, but returns the point where the segment enters the
/// first blocking leaf.
pub fn test_line_dist_r(tnodes: &[TNode], node: TChild, start: &Vec3, stop: &Vec3) -> Option<Vec3> {
    let t = match node {
        TChild::Empty => return None,
        TChild::Blocking(_) => return Some(*start),
        TChild::Node(n) => &tnodes[n as usize],
    };

    if t.plane_type == PLANE_NONE {
        let first = test_line_dist_r(tnodes, t.children[0], start, stop);
        let second = test_line_dist_r(tnodes, t.children[1], start, stop);
        return match (first, second) {
            (Some(a), Some(b)) => {
                if vector_nearer(&a, &b, start) {
                    Some(a)
                } else {
                    Some(b)
                }
            }
            (a, b) => a.or(b),
        };
    }

    let (front, back) = plane_distances(t, start, stop);

    if front >= -ON_EPSILON && back >= -ON_EPSILON {
        return test_line_dist_r(tnodes, t.children[0], start, stop);
    }
    if front < ON_EPSILON && back < ON_EPSILON {
        return test_line_dist_r(tnodes, t.children[1], start, stop);
    }

    let side = (front < 0.0) as usize;
    let frac = front / (front - back);
    let mid = vector_interpolation(start, stop, frac);

    test_line_dist_r(tnodes, t.children[side], start, &mid)
        .or_else(|| test_line_dist_r(tnodes, t.children[side ^ 1], &mid, stop))
}

/// Level filter of the line tests. Lightclip heads are never line tested,
/// the actor and weapon clip heads only with their mask bit.
pub fn line_level_passes(level: u32, levelmask: LevelMask) -> bool {
    let corelevels = (levelmask & TL_FLAG_REGULAR_LEVELS).bits();
    if level != 0 && corelevels != 0 && level & corelevels == 0 {
        return false;
    }
    match level {
        LEVEL_LIGHTCLIP => false,
        LEVEL_ACTORCLIP => levelmask.intersects(TL_FLAG_ACTORCLIP),
        LEVEL_WEAPONCLIP => levelmask.intersects(TL_FLAG_WEAPONCLIP),
        _ => true,
    }
}

/// Whether the segment is blocked by any level head of the tile.
pub fn tile_test_line<T: TraceTile>(tile: &T, start: &Vec3, stop: &Vec3, levelmask: LevelMask) -> bool {
    let heads = tile.trace_heads();
    heads
        .theads
        .iter()
        .filter(|h| line_level_passes(h.level, levelmask))
        .any(|h| test_line_r(&heads.tnodes, TChild::Node(h.tnode), start, stop))
}

/// Nearest blocking point on the segment, `None` if the line gets through.
pub fn tile_test_line_dm<T: TraceTile>(
    tile: &T,
    start: &Vec3,
    stop: &Vec3,
    levelmask: LevelMask,
) -> Option<Vec3> {
    let heads = tile.trace_heads();
    let mut end = *stop;

    for h in heads.theads.iter().filter(|h| line_level_passes(h.level, levelmask)) {
        if let Some(hit) = test_line_dist_r(&heads.tnodes, TChild::Node(h.tnode), start, stop) {
            if vector_nearer(&hit, &end, start) {
                end = hit;
            }
        }
    }

    if vector_compare_eps(&end, stop, EQUAL_EPSILON) {
        None
    } else {
        Some(end)
    }
}

// ============================================================
// Leaf enumeration
// ============================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafList {
    pub leafs: Vec<usize>,
    /// first node that split the box, `None` if it never straddled a plane
    pub topnode: Option<usize>,
    /// the list ran full and further leafs were dropped
    pub truncated: bool,
}

fn box_leafnums_r<T: TraceTile>(tile: &T, mut nodenum: i32, mins: &Vec3, maxs: &Vec3, capacity: usize, list: &mut LeafList) {
    loop {
        if nodenum <= LEAFNODE {
            if list.leafs.len() >= capacity {
                list.truncated = true;
                return;
            }
            list.leafs.push((LEAFNODE - nodenum) as usize);
            return;
        }

        let node = nodenum as usize;
        let children = tile.node_children(node);
        let side = match tile.node_plane(node) {
            Some(plane) => box_on_plane_side(mins, maxs, plane),
            None => 0,
        };

        if side == PSIDE_FRONT {
            nodenum = children[0];
        } else if side == PSIDE_BACK {
            nodenum = children[1];
        } else {
            if list.topnode.is_none() {
                list.topnode = Some(node);
            }
            box_leafnums_r(tile, children[0], mins, maxs, capacity, list);
            nodenum = children[1];
        }
    }
}

/// Collects up to `capacity` leafs touched by the box below `headnode`.
/// Leafs past the capacity are silently dropped.
pub fn box_leafnums_headnode<T: TraceTile>(
    tile: &T,
    mins: &Vec3,
    maxs: &Vec3,
    capacity: usize,
    headnode: i32,
) -> LeafList {
    let mut list = LeafList {
        leafs: Vec::with_capacity(capacity.min(64)),
        ..Default::default()
    };
    box_leafnums_r(tile, headnode, mins, maxs, capacity, &mut list);
    list
}

// ============================================================
// Box traces
// ============================================================

struct BoxTrace<'a, T: TraceTile> {
    tile: &'a T,
    ctx: &'a mut TraceContext,
    contents: Contents,
    rejects: Contents,
    // recentered box and end points
    start: Vec3,
    end: Vec3,
    mins: Vec3,
    maxs: Vec3,
    extents: Vec3,
    ispoint: bool,
    trace: Trace,
}

impl<T: TraceTile> BoxTrace<'_, T> {
    /// Leafs and brushes are skipped unless they share a bit with the match
    /// mask (any contents for MASK_ALL) or if they carry a rejected bit.
    #[inline]
    fn skipped(&self, contents: Contents) -> bool {
        (self.contents != MASK_ALL && !contents.intersects(self.contents))
            || contents.intersects(self.rejects)
    }

    /// Distance of the plane pushed out by the box.
    #[inline]
    fn box_plane_dist(&self, plane: &T::Plane) -> f32 {
        let normal = plane.normal();
        let mut ofs = [0.0f32; 3];
        for j in 0..3 {
            ofs[j] = if normal[j] < 0.0 { self.maxs[j] } else { self.mins[j] };
        }
        plane.dist() - dot_product(&ofs, normal)
    }

    fn clip_box_to_brush(&mut self, brush: usize, leaf: usize) {
        let tile = self.tile;
        let sides = tile.brush_sides(brush);
        if sides.is_empty() {
            return;
        }

        self.ctx.stats.brush_traces += 1;

        let mut enterfrac: f32 = -1.0;
        let mut leavefrac: f32 = 1.0;
        let mut leadside: Option<usize> = None;
        let mut getout = false;
        let mut startout = false;

        for side in sides {
            let plane = tile.side_plane(side);
            let dist = if self.ispoint {
                plane.dist()
            } else {
                self.box_plane_dist(plane)
            };

            let d1 = dot_product(&self.start, plane.normal()) - dist;
            let d2 = dot_product(&self.end, plane.normal()) - dist;

            if d2 > 0.0 {
                getout = true; // endpoint is not in solid
            }
            if d1 > 0.0 {
                startout = true;
            }

            // completely in front of face, no intersection
            if d1 > 0.0 && d2 >= d1 {
                return;
            }
            if d1 <= 0.0 && d2 <= 0.0 {
                continue;
            }

            if d1 > d2 {
                let f = (d1 - DIST_EPSILON) / (d1 - d2);
                if f > enterfrac {
                    enterfrac = f;
                    leadside = Some(side);
                }
            } else {
                let f = (d1 + DIST_EPSILON) / (d1 - d2);
                if f < leavefrac {
                    leavefrac = f;
                }
            }
        }

        if !startout {
            self.trace.startsolid = true;
            if !getout {
                self.trace.allsolid = true;
            }
            self.trace.leafnum = Some(leaf);
            return;
        }

        if enterfrac < leavefrac && enterfrac > -1.0 && enterfrac < self.trace.fraction {
            if let Some(side) = leadside {
                let planenum = tile.side_planenum(side);
                self.trace.fraction = enterfrac.max(0.0);
                self.trace.plane = tile.plane(planenum).to_cplane();
                self.trace.planenum = Some(planenum);
                self.trace.surface = tile.side_surface(side);
                self.trace.contents = tile.brush_contents(brush);
                self.trace.leafnum = Some(leaf);
            }
        }
    }

    fn test_box_in_brush(&mut self, brush: usize) {
        let tile = self.tile;
        let sides = tile.brush_sides(brush);
        if sides.is_empty() {
            return;
        }

        for side in sides {
            let plane = tile.side_plane(side);
            let dist = self.box_plane_dist(plane);
            let d1 = dot_product(&self.start, plane.normal()) - dist;

            // completely in front of face, no intersection
            if d1 > 0.0 {
                return;
            }
        }

        self.trace.startsolid = true;
        self.trace.allsolid = true;
        self.trace.fraction = 0.0;
        self.trace.contents = tile.brush_contents(brush);
    }

    fn trace_to_leaf(&mut self, leaf: usize) {
        let tile = self.tile;
        if self.skipped(tile.leaf_contents(leaf)) {
            return;
        }

        for &brush in tile.leaf_brushes(leaf) {
            let brush = brush as usize;
            if !self.ctx.first_visit(brush) {
                continue; // already checked this brush in another leaf
            }
            if self.skipped(tile.brush_contents(brush)) {
                continue;
            }
            self.clip_box_to_brush(brush, leaf);
            if self.trace.fraction == 0.0 {
                return;
            }
        }
    }

    fn test_in_leaf(&mut self, leaf: usize) {
        let tile = self.tile;
        if !tile.leaf_contents(leaf).intersects(self.contents) {
            return;
        }

        for &brush in tile.leaf_brushes(leaf) {
            let brush = brush as usize;
            if !self.ctx.first_visit(brush) {
                continue;
            }
            let contents = tile.brush_contents(brush);
            if !contents.intersects(self.contents) || contents.intersects(self.rejects) {
                continue;
            }
            self.test_box_in_brush(brush);
            if self.trace.fraction == 0.0 {
                return;
            }
        }
    }

    fn recursive_hull_check(&mut self, num: i32, p1f: f32, p2f: f32, p1: &Vec3, p2: &Vec3) {
        if self.trace.fraction <= p1f {
            return; // already hit something nearer
        }

        if num <= LEAFNODE {
            self.trace_to_leaf((LEAFNODE - num) as usize);
            return;
        }

        let tile = self.tile;
        let node = num as usize;
        let children = tile.node_children(node);
        let plane = match tile.node_plane(node) {
            Some(plane) => plane,
            None => com_error(
                ErrorCode::Drop,
                &format!("{}: level node {} reached by the hull checker", tile.name(), node),
            ),
        };

        let normal = plane.normal();
        let (t1, t2, offset);
        if plane.is_axial() {
            let axis = plane.plane_type() as usize;
            t1 = p1[axis] - plane.dist();
            t2 = p2[axis] - plane.dist();
            offset = self.extents[axis];
        } else {
            t1 = dot_product(normal, p1) - plane.dist();
            t2 = dot_product(normal, p2) - plane.dist();
            offset = if self.ispoint {
                0.0
            } else {
                (self.extents[0] * normal[0]).abs()
                    + (self.extents[1] * normal[1]).abs()
                    + (self.extents[2] * normal[2]).abs()
            };
        }

        // see which sides we need to consider
        if t1 >= offset && t2 >= offset {
            self.recursive_hull_check(children[0], p1f, p2f, p1, p2);
            return;
        }
        if t1 < -offset && t2 < -offset {
            self.recursive_hull_check(children[1], p1f, p2f, p1, p2);
            return;
        }

        // put the crosspoint DIST_EPSILON pixels on the near side
        let (side, frac, frac2);
        if t1 < t2 {
            let idist = 1.0 / (t1 - t2);
            side = 1usize;
            frac2 = (t1 + offset + DIST_EPSILON) * idist;
            frac = (t1 - offset + DIST_EPSILON) * idist;
        } else if t1 > t2 {
            let idist = 1.0 / (t1 - t2);
            side = 0usize;
            frac2 = (t1 - offset - DIST_EPSILON) * idist;
            frac = (t1 + offset + DIST_EPSILON) * idist;
        } else {
            side = 0;
            frac = 1.0;
            frac2 = 0.0;
        }

        // move up to the node
        let frac = frac.clamp(0.0, 1.0);
        let midf = p1f + (p2f - p1f) * frac;
        let mid = vector_interpolation(p1, p2, frac);
        self.recursive_hull_check(children[side], p1f, midf, p1, &mid);

        // go past the node
        let frac2 = frac2.clamp(0.0, 1.0);
        let midf = p1f + (p2f - p1f) * frac2;
        let mid = vector_interpolation(p1, p2, frac2);
        self.recursive_hull_check(children[side ^ 1], midf, p2f, &mid, p2);
    }
}

/// Sweeps `bbox` from `start` to `end` through the BSP tree below
/// `headnode`. Brushes are clipped if their contents match `contentmask`
/// and don't carry a `brushreject` bit. Only hits nearer than `fraction`
/// are reported.
///
/// With `start == end` the box is tested for being inside solid instead.
pub fn box_trace<T: TraceTile>(
    ctx: &mut TraceContext,
    tile: &T,
    start: &Vec3,
    end: &Vec3,
    bbox: &Aabb,
    headnode: usize,
    contentmask: Contents,
    brushreject: Contents,
    fraction: f32,
) -> Trace {
    ctx.begin(tile.num_brushes());

    let mut trace = Trace {
        fraction: fraction.min(1.0),
        ..Default::default()
    };

    // nothing loaded
    if tile.num_nodes() == 0 {
        trace.endpos = vector_interpolation(start, end, trace.fraction);
        return trace;
    }
    if headnode >= tile.num_nodes() {
        com_error(
            ErrorCode::Drop,
            &format!("headnode ({}) is out of bounds: {}", headnode, tile.num_nodes()),
        );
    }

    // make the box symmetric around the traced point
    let offset = vector_center_from_mins_maxs(&bbox.mins, &bbox.maxs);
    let amins = vector_subtract(&bbox.mins, &offset);
    let amaxs = vector_subtract(&bbox.maxs, &offset);
    let astart = vector_add(start, &offset);
    let aend = vector_add(end, &offset);

    let mut work = BoxTrace {
        tile,
        ctx,
        contents: contentmask,
        rejects: brushreject,
        start: astart,
        end: aend,
        mins: amins,
        maxs: amaxs,
        extents: [0.0; 3],
        ispoint: false,
        trace,
    };

    // position test special case
    if vector_compare(&astart, &aend) {
        let c1 = vector_add(&astart, &amins);
        let c2 = vector_add(&astart, &amaxs);

        let capacity = work.ctx.leaf_capacity;
        let list = box_leafnums_headnode(tile, &c1, &c2, capacity, headnode as i32);
        if list.truncated {
            com_dprintf(&format!(
                "box_trace: position test on {} hit {} leafs, rest dropped\n",
                tile.name(),
                capacity
            ));
        }
        for &leaf in &list.leafs {
            work.test_in_leaf(leaf);
            if work.trace.allsolid {
                break;
            }
        }

        let mut trace = work.trace;
        trace.endpos = *start;
        return trace;
    }

    // point special case
    if !vector_not_empty(&amins) && !vector_not_empty(&amaxs) {
        work.ispoint = true;
    } else {
        work.extents = amaxs;
    }

    work.recursive_hull_check(headnode as i32, 0.0, 1.0, &astart, &aend);

    let mut trace = work.trace;
    let endpos = if trace.fraction >= 1.0 {
        aend
    } else {
        vector_interpolation(&astart, &aend, trace.fraction)
    };
    trace.endpos = vector_subtract(&endpos, &offset);
    trace
}

/// Levels a box trace through the tile heads looks at. Heads above the
/// visible levels (the clip layers) are always traced.
pub fn box_level_passes(level: u32, levelmask: LevelMask) -> bool {
    !(level != 0
        && level <= LEVEL_LASTVISIBLE
        && !levelmask.is_empty()
        && level & levelmask.bits() == 0)
}

/// Traces every chead of the tile that passes the level mask, keeping the
/// nearest hit.
pub fn tile_box_trace<T: TraceTile>(
    ctx: &mut TraceContext,
    tile: &T,
    start: &Vec3,
    end: &Vec3,
    bbox: &Aabb,
    levelmask: LevelMask,
    contentmask: Contents,
    brushreject: Contents,
) -> Trace {
    let mut best: Option<Trace> = None;

    for h in &tile.trace_heads().cheads {
        if !box_level_passes(h.level, levelmask) {
            continue;
        }

        let fraction = best.as_ref().map_or(1.0, |t| t.fraction);
        let newtr = box_trace(ctx, tile, start, end, bbox, h.cnode, contentmask, brushreject, fraction);

        // memorize the trace with the minimal fraction
        if newtr.fraction == 0.0 {
            return newtr;
        }
        if best.as_ref().map_or(true, |t| newtr.fraction < t.fraction) {
            best = Some(newtr);
        }
    }

    best.unwrap_or_else(|| Trace {
        endpos: *end,
        ..Default::default()
    })
}

// ============================================================
// Transformed traces
// ============================================================

/// Placement of an inline model in the world.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelTransform {
    pub origin: Vec3,
    /// pitch, yaw, roll in degrees
    pub angles: Vec3,
    /// how far map assembly moved the model
    pub shift: Vec3,
}

#[inline]
fn rotate_into(v: &Vec3, forward: &Vec3, right: &Vec3, up: &Vec3) -> Vec3 {
    [dot_product(v, forward), -dot_product(v, right), dot_product(v, up)]
}

#[inline]
fn rotate_back(v: &Vec3, forward: &Vec3, right: &Vec3, up: &Vec3) -> Vec3 {
    let mut out = [0.0f32; 3];
    for i in 0..3 {
        out[i] = forward[i] * v[0] - right[i] * v[1] + up[i] * v[2];
    }
    out
}

/// Box trace against a model that may be moved and rotated. The end
/// position is interpolated in world space from the returned fraction.
pub fn hinted_transformed_box_trace<T: TraceTile>(
    ctx: &mut TraceContext,
    tile: &T,
    tile_index: usize,
    start: &Vec3,
    end: &Vec3,
    bbox: &Aabb,
    headnode: usize,
    contentmask: Contents,
    brushreject: Contents,
    transform: &ModelTransform,
    fraction: f32,
) -> Trace {
    let mut start_l = vector_subtract(start, &transform.origin);
    let mut end_l = vector_subtract(end, &transform.origin);

    // rotate start and end into the models frame of reference
    let axes = if !tile.is_box_hull() && vector_not_empty(&transform.angles) {
        Some(angle_vectors_tuple(&transform.angles))
    } else {
        None
    };
    if let Some((forward, right, up)) = &axes {
        start_l = rotate_into(&start_l, forward, right, up);
        end_l = rotate_into(&end_l, forward, right, up);
    }

    // the model geometry was moved along with its tile
    if vector_not_empty(&transform.origin) {
        start_l = vector_add(&start_l, &transform.shift);
        end_l = vector_add(&end_l, &transform.shift);
    }

    let mut trace = box_trace(
        ctx,
        tile,
        &start_l,
        &end_l,
        bbox,
        headnode,
        contentmask,
        brushreject,
        fraction,
    );
    trace.map_tile = Some(tile_index);

    if let Some((forward, right, up)) = &axes {
        if trace.fraction != 1.0 {
            let normal = rotate_back(&trace.plane.normal, forward, right, up);
            trace.plane = CPlane::new(normal, trace.plane.dist);
        }
    }

    trace.endpos = vector_interpolation(start, end, trace.fraction);
    trace
}

// ============================================================
// Tests
// ============================================================
