// tile.rs - runtime map tiles and box hulls

use std::ops::Range;

use crate::common::com_dprintf;
use crate::error::CmResult;
use crate::q_shared::{
    add_point_to_bounds, dot_product, vector_add, CPlane, CSurface, Contents, Vec3,
    NUM_REGULAR_MODELS,
};
use crate::qfiles::{BspLumps, LEAFNODE, PLANENUM_LEAF};
use crate::tnode::{build_tracing_nodes, TraceHeads, TraceTile};
use crate::trace::ModelTransform;

// ============================================================
// Runtime structures
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct CNode {
    /// `None` for level nodes
    pub plane: Option<usize>,
    /// negative numbers are leafs
    pub children: [i32; 2],
    pub mins: Vec3,
    pub maxs: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct CLeaf {
    pub contents: Contents,
    pub firstleafbrush: usize,
    pub numleafbrushes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CBrush {
    pub contents: Contents,
    pub firstbrushside: usize,
    pub numsides: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CBrushSide {
    pub planenum: usize,
    /// `None` is the null surface
    pub surface: Option<CSurface>,
}

/// A level model or an inline model (door, breakable) of a tile.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CBspModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub angles: Vec3,
    /// assembly shift of the tile the model came with
    pub shift: Vec3,
    pub headnode: i32,
    pub tile: usize,
}

impl CBspModel {
    pub fn transform(&self) -> ModelTransform {
        ModelTransform {
            origin: self.origin,
            angles: self.angles,
            shift: self.shift,
        }
    }
}

// ============================================================
// MapTile
// ============================================================

/// One BSP tile of an assembled map, moved into place by its assembly
/// shift. Read-only once built.
#[derive(Debug, Clone)]
pub struct MapTile {
    pub name: String,
    pub idx: usize,
    pub shift: Vec3,
    pub planes: Vec<CPlane>,
    pub nodes: Vec<CNode>,
    pub leafs: Vec<CLeaf>,
    pub leafbrushes: Vec<u16>,
    pub brushes: Vec<CBrush>,
    pub brushsides: Vec<CBrushSide>,
    pub models: Vec<CBspModel>,
    /// union of the level model bounds
    pub world_mins: Vec3,
    pub world_maxs: Vec3,
    heads: TraceHeads,
}

impl MapTile {
    pub fn new(lumps: &BspLumps, idx: usize, shift: Vec3) -> CmResult<Self> {
        lumps.validate()?;

        let planes = lumps
            .planes
            .iter()
            .map(|p| CPlane::new(p.normal, p.dist + dot_product(&p.normal, &shift)))
            .collect();

        let nodes = lumps
            .nodes
            .iter()
            .map(|n| {
                let mut mins = [0.0f32; 3];
                let mut maxs = [0.0f32; 3];
                for j in 0..3 {
                    mins[j] = n.mins[j] as f32 + shift[j];
                    maxs[j] = n.maxs[j] as f32 + shift[j];
                }
                CNode {
                    plane: (n.planenum != PLANENUM_LEAF).then_some(n.planenum as usize),
                    children: n.children,
                    mins,
                    maxs,
                }
            })
            .collect();

        let leafs = lumps
            .leafs
            .iter()
            .map(|l| CLeaf {
                contents: Contents::from_bits_retain(l.contentflags),
                firstleafbrush: l.firstleafbrush as usize,
                numleafbrushes: l.numleafbrushes as usize,
            })
            .collect();

        let brushes = lumps
            .brushes
            .iter()
            .map(|b| CBrush {
                contents: Contents::from_bits_retain(b.contentflags),
                firstbrushside: b.firstside as usize,
                numsides: b.numsides as usize,
            })
            .collect();

        let brushsides = lumps
            .brushsides
            .iter()
            .map(|s| CBrushSide {
                planenum: s.planenum as usize,
                surface: (s.texinfo >= 0).then(|| {
                    let tex = &lumps.texinfo[s.texinfo as usize];
                    CSurface {
                        texinfo: s.texinfo as usize,
                        flags: tex.surface_flags,
                        value: tex.value,
                    }
                }),
            })
            .collect();

        // inline model bounds are relative to the model origin
        let models: Vec<CBspModel> = lumps
            .models
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let bounds_shift = if i < NUM_REGULAR_MODELS { shift } else { [0.0; 3] };
                CBspModel {
                    mins: vector_add(&m.mins, &bounds_shift),
                    maxs: vector_add(&m.maxs, &bounds_shift),
                    origin: vector_add(&m.origin, &shift),
                    angles: [0.0; 3],
                    shift,
                    headnode: m.headnode,
                    tile: idx,
                }
            })
            .collect();

        let mut world_mins = [f32::MAX; 3];
        let mut world_maxs = [-f32::MAX; 3];
        for m in models.iter().take(NUM_REGULAR_MODELS) {
            if m.headnode == LEAFNODE {
                continue;
            }
            add_point_to_bounds(&m.mins, &mut world_mins, &mut world_maxs);
            add_point_to_bounds(&m.maxs, &mut world_mins, &mut world_maxs);
        }

        let mut tile = Self {
            name: lumps.name.clone(),
            idx,
            shift,
            planes,
            nodes,
            leafs,
            leafbrushes: lumps.leafbrushes.clone(),
            brushes,
            brushsides,
            models,
            world_mins,
            world_maxs,
            heads: TraceHeads::default(),
        };

        let headnodes: Vec<i32> = lumps.models.iter().map(|m| m.headnode).collect();
        tile.heads = build_tracing_nodes(&tile, &headnodes)?;

        com_dprintf(&format!(
            "{}: {} nodes, {} tracing nodes, {} theads, {} cheads\n",
            tile.name,
            tile.nodes.len(),
            tile.heads.tnodes.len(),
            tile.heads.theads.len(),
            tile.heads.cheads.len()
        ));

        Ok(tile)
    }

    /// Number of inline models of this tile.
    pub fn num_inline_models(&self) -> usize {
        self.models.len().saturating_sub(NUM_REGULAR_MODELS)
    }
}

impl TraceTile for MapTile {
    type Plane = CPlane;

    fn name(&self) -> &str {
        &self.name
    }

    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn num_leafs(&self) -> usize {
        self.leafs.len()
    }

    fn num_brushes(&self) -> usize {
        self.brushes.len()
    }

    #[inline]
    fn node_plane(&self, node: usize) -> Option<&CPlane> {
        self.nodes[node].plane.map(|p| &self.planes[p])
    }

    #[inline]
    fn node_children(&self, node: usize) -> [i32; 2] {
        self.nodes[node].children
    }

    fn node_bounds(&self, node: usize) -> (Vec3, Vec3) {
        (self.nodes[node].mins, self.nodes[node].maxs)
    }

    #[inline]
    fn leaf_contents(&self, leaf: usize) -> Contents {
        self.leafs[leaf].contents
    }

    #[inline]
    fn leaf_brushes(&self, leaf: usize) -> &[u16] {
        let l = &self.leafs[leaf];
        &self.leafbrushes[l.firstleafbrush..l.firstleafbrush + l.numleafbrushes]
    }

    #[inline]
    fn brush_contents(&self, brush: usize) -> Contents {
        self.brushes[brush].contents
    }

    #[inline]
    fn brush_sides(&self, brush: usize) -> Range<usize> {
        let b = &self.brushes[brush];
        b.firstbrushside..b.firstbrushside + b.numsides
    }

    #[inline]
    fn side_planenum(&self, side: usize) -> usize {
        self.brushsides[side].planenum
    }

    #[inline]
    fn plane(&self, planenum: usize) -> &CPlane {
        &self.planes[planenum]
    }

    fn side_surface(&self, side: usize) -> Option<CSurface> {
        self.brushsides[side].surface
    }

    fn trace_heads(&self) -> &TraceHeads {
        &self.heads
    }
}

// ============================================================
// Box hull
// ============================================================

/// A single axis aligned box brush behind a chain of six nodes, so boxes
/// (actors, items) can be traced with the regular hull checker.
#[derive(Debug, Clone)]
pub struct BoxHull {
    planes: Vec<CPlane>,
    nodes: Vec<CNode>,
    leafs: Vec<CLeaf>,
    leafbrushes: Vec<u16>,
    brushes: Vec<CBrush>,
    brushsides: Vec<CBrushSide>,
    heads: TraceHeads,
}

impl BoxHull {
    /// Leaf 0 is the empty outside, leaf 1 holds the box brush.
    pub fn new(mins: &Vec3, maxs: &Vec3, contents: Contents) -> Self {
        let mut planes = Vec::with_capacity(12);
        let mut nodes = Vec::with_capacity(6);
        let mut brushsides = Vec::with_capacity(6);

        for i in 0..6 {
            let side = i & 1;
            let axis = i >> 1;
            let dist = if side == 0 { maxs[axis] } else { mins[axis] };

            let mut normal = [0.0f32; 3];
            normal[axis] = 1.0;
            planes.push(CPlane::new(normal, dist));
            normal[axis] = -1.0;
            planes.push(CPlane::new(normal, -dist));

            brushsides.push(CBrushSide {
                planenum: i * 2 + side,
                surface: None,
            });

            let mut children = [0i32; 2];
            children[side] = LEAFNODE;
            children[side ^ 1] = if i != 5 { i as i32 + 1 } else { LEAFNODE - 1 };
            nodes.push(CNode {
                plane: Some(i * 2),
                children,
                mins: *mins,
                maxs: *maxs,
            });
        }

        Self {
            planes,
            nodes,
            leafs: vec![
                CLeaf::default(),
                CLeaf {
                    contents,
                    firstleafbrush: 0,
                    numleafbrushes: 1,
                },
            ],
            leafbrushes: vec![0],
            brushes: vec![CBrush {
                contents,
                firstbrushside: 0,
                numsides: 6,
            }],
            brushsides,
            heads: TraceHeads::default(),
        }
    }

    pub fn headnode(&self) -> usize {
        0
    }
}

impl TraceTile for BoxHull {
    type Plane = CPlane;

    fn name(&self) -> &str {
        "*box"
    }

    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn num_leafs(&self) -> usize {
        self.leafs.len()
    }

    fn num_brushes(&self) -> usize {
        self.brushes.len()
    }

    fn node_plane(&self, node: usize) -> Option<&CPlane> {
        self.nodes[node].plane.map(|p| &self.planes[p])
    }

    fn node_children(&self, node: usize) -> [i32; 2] {
        self.nodes[node].children
    }

    fn node_bounds(&self, node: usize) -> (Vec3, Vec3) {
        (self.nodes[node].mins, self.nodes[node].maxs)
    }

    fn leaf_contents(&self, leaf: usize) -> Contents {
        self.leafs[leaf].contents
    }

    fn leaf_brushes(&self, leaf: usize) -> &[u16] {
        let l = &self.leafs[leaf];
        &self.leafbrushes[l.firstleafbrush..l.firstleafbrush + l.numleafbrushes]
    }

    fn brush_contents(&self, brush: usize) -> Contents {
        self.brushes[brush].contents
    }

    fn brush_sides(&self, brush: usize) -> Range<usize> {
        let b = &self.brushes[brush];
        b.firstbrushside..b.firstbrushside + b.numsides
    }

    fn side_planenum(&self, side: usize) -> usize {
        self.brushsides[side].planenum
    }

    fn plane(&self, planenum: usize) -> &CPlane {
        &self.planes[planenum]
    }

    fn side_surface(&self, side: usize) -> Option<CSurface> {
        self.brushsides[side].surface
    }

    fn trace_heads(&self) -> &TraceHeads {
        &self.heads
    }

    fn is_box_hull(&self) -> bool {
        true
    }
}

// ============================================================
// Tests
// ============================================================
