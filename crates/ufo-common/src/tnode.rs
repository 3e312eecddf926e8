// tnode.rs - compact tracing trees built from the BSP nodes of a tile

use std::ops::Range;

use crate::error::{CmError, CmResult};
use crate::q_shared::{
    Contents, CSurface, TracePlane, Vec3, MASK_LINE_BLOCKING, NUM_REGULAR_MODELS, PLANE_NONE,
};
use crate::qfiles::LEAFNODE;

// ============================================================
// Tile data seen by the tracer
// ============================================================

/// Read-only view of one loaded tile. Implemented by the runtime tile, the
/// compiler-side tile and the box hull, so the tracer is written once.
///
/// Child values follow the disk convention: `>= 0` is a node, `<= LEAFNODE`
/// is leaf `LEAFNODE - child`.
pub trait TraceTile {
    type Plane: TracePlane;

    fn name(&self) -> &str;

    fn num_nodes(&self) -> usize;
    fn num_leafs(&self) -> usize;
    fn num_brushes(&self) -> usize;

    /// `None` for the planeless level nodes that join the per-level trees.
    fn node_plane(&self, node: usize) -> Option<&Self::Plane>;
    fn node_children(&self, node: usize) -> [i32; 2];
    fn node_bounds(&self, node: usize) -> (Vec3, Vec3);

    fn leaf_contents(&self, leaf: usize) -> Contents;
    fn leaf_brushes(&self, leaf: usize) -> &[u16];

    fn brush_contents(&self, brush: usize) -> Contents;
    fn brush_sides(&self, brush: usize) -> Range<usize>;

    fn side_planenum(&self, side: usize) -> usize;
    fn plane(&self, planenum: usize) -> &Self::Plane;
    /// `None` is the null surface.
    fn side_surface(&self, side: usize) -> Option<CSurface>;

    fn trace_heads(&self) -> &TraceHeads;

    /// Box hulls are axis aligned by construction and never rotated.
    fn is_box_hull(&self) -> bool {
        false
    }

    #[inline]
    fn side_plane(&self, side: usize) -> &Self::Plane {
        self.plane(self.side_planenum(side))
    }
}

// ============================================================
// Tracing nodes
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TChild {
    Node(u32),
    /// a leaf whose contents stop line tests
    Blocking(u32),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TNode {
    /// PLANE_NONE: no plane, both children are tested on the whole segment
    pub plane_type: u8,
    pub normal: Vec3,
    pub dist: f32,
    pub children: [TChild; 2],
}

/// Root of the tracing tree of one level model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct THead {
    pub tnode: u32,
    pub level: u32,
}

/// Root BSP node of one plane-carrying subtree, with the level it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CHead {
    pub cnode: usize,
    pub level: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceHeads {
    pub tnodes: Vec<TNode>,
    pub theads: Vec<THead>,
    pub cheads: Vec<CHead>,
}

/// Whether a leaf stops line tests. Bit 31 is a marker bit of the
/// compiler and never counts as content.
pub fn leaf_blocks_lines(contents: Contents) -> bool {
    let contents = contents.difference(Contents::from_bits_retain(1 << 31));
    contents.intersects(MASK_LINE_BLOCKING) && !contents.contains(Contents::PASSABLE)
}

// ============================================================
// Builder
// ============================================================

struct Builder<'a, T: TraceTile> {
    tile: &'a T,
    capacity: usize,
    heads: TraceHeads,
}

impl<'a, T: TraceTile> Builder<'a, T> {
    fn alloc(&mut self, node: TNode) -> CmResult<u32> {
        if self.heads.tnodes.len() >= self.capacity {
            return Err(CmError::TracingNodeOverflow {
                tile: self.tile.name().to_string(),
                capacity: self.capacity,
            });
        }
        self.heads.tnodes.push(node);
        Ok((self.heads.tnodes.len() - 1) as u32)
    }

    /// Copies a plane-carrying BSP subtree, folding leafs into blocking or
    /// empty markers.
    fn make_tracing_node(&mut self, nodenum: usize) -> CmResult<u32> {
        let tile = self.tile;
        let plane = tile.node_plane(nodenum).ok_or_else(|| CmError::MissingPlane {
            tile: tile.name().to_string(),
            node: nodenum,
        })?;

        let t = self.alloc(TNode {
            plane_type: plane.plane_type(),
            normal: *plane.normal(),
            dist: plane.dist(),
            children: [TChild::Empty; 2],
        })?;

        let children = tile.node_children(nodenum);
        for (i, &child) in children.iter().enumerate() {
            let tchild = if child <= LEAFNODE {
                let leaf = (LEAFNODE - child) as u32;
                if leaf_blocks_lines(tile.leaf_contents(leaf as usize)) {
                    TChild::Blocking(leaf)
                } else {
                    TChild::Empty
                }
            } else {
                TChild::Node(self.make_tracing_node(child as usize)?)
            };
            self.heads.tnodes[t as usize].children[i] = tchild;
        }
        Ok(t)
    }

    fn build_tracing_node_r(&mut self, nodenum: usize, level: u32) -> CmResult<u32> {
        let tile = self.tile;

        if tile.node_plane(nodenum).is_some() {
            self.heads.cheads.push(CHead {
                cnode: nodenum,
                level,
            });
            return self.make_tracing_node(nodenum);
        }

        // level node: only bounds and two subtrees
        let children = tile.node_children(nodenum);
        if children.iter().any(|&c| c <= LEAFNODE) {
            return Err(CmError::UnexpectedLeaf {
                tile: tile.name().to_string(),
                node: nodenum,
            });
        }
        let (c0, c1) = (children[0] as usize, children[1] as usize);
        let (_, c0maxs) = tile.node_bounds(c0);
        let (c1mins, _) = tile.node_bounds(c1);

        // separate the children by an axial plane if their bounds allow it
        for axis in 0..2 {
            if c0maxs[axis] <= c1mins[axis] {
                let mut normal = [0.0f32; 3];
                normal[axis] = 1.0;
                let t = self.alloc(TNode {
                    plane_type: axis as u8,
                    normal,
                    dist: (c0maxs[axis] + c1mins[axis]) / 2.0,
                    children: [TChild::Empty; 2],
                })?;
                // child 0 lies below the plane
                let back = self.build_tracing_node_r(c0, level)?;
                let front = self.build_tracing_node_r(c1, level)?;
                self.heads.tnodes[t as usize].children = [TChild::Node(front), TChild::Node(back)];
                return Ok(t);
            }
        }

        let t = self.alloc(TNode {
            plane_type: PLANE_NONE,
            normal: [0.0; 3],
            dist: 0.0,
            children: [TChild::Empty; 2],
        })?;
        let first = self.build_tracing_node_r(c0, level)?;
        let second = self.build_tracing_node_r(c1, level)?;
        self.heads.tnodes[t as usize].children = [TChild::Node(first), TChild::Node(second)];
        Ok(t)
    }
}

/// Builds the tracing trees of the level models of a tile. `headnodes`
/// holds the headnode of each model; only the first NUM_REGULAR_MODELS are
/// level models. Models without nodes are skipped.
pub fn build_tracing_nodes<T: TraceTile>(tile: &T, headnodes: &[i32]) -> CmResult<TraceHeads> {
    let capacity = tile.num_nodes() + 6;
    let mut builder = Builder {
        tile,
        capacity,
        heads: TraceHeads::default(),
    };

    for (level, &headnode) in headnodes.iter().take(NUM_REGULAR_MODELS).enumerate() {
        if headnode <= LEAFNODE || headnode as usize >= capacity {
            continue;
        }
        let tnode = builder.build_tracing_node_r(headnode as usize, level as u32)?;
        builder.heads.theads.push(THead {
            tnode,
            level: level as u32,
        });
    }

    Ok(builder.heads)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::q_shared::PLANE_X;
    use crate::testmap::{lumps_with_boxes, SolidBox};
    use crate::tile::MapTile;

    #[test]
    fn test_leaf_blocks_lines() {
        assert!(leaf_blocks_lines(Contents::SOLID));
        assert!(leaf_blocks_lines(Contents::WEAPONCLIP));
        assert!(!leaf_blocks_lines(Contents::SOLID | Contents::PASSABLE));
        assert!(!leaf_blocks_lines(Contents::WATER));
        assert!(!leaf_blocks_lines(Contents::empty()));
        assert!(!leaf_blocks_lines(Contents::from_bits_retain(1 << 31)));
    }

    #[test]
    fn test_box_chain_folds_leafs() {
        let lumps = lumps_with_boxes(&[SolidBox::solid(1, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0])]);
        let tile = MapTile::new(&lumps, 0, [0.0; 3]).unwrap();
        let heads = tile.trace_heads();

        assert_eq!(heads.theads.len(), 1);
        assert_eq!(heads.theads[0].level, 1);
        assert_eq!(heads.cheads.len(), 1);
        assert_eq!(heads.tnodes.len(), 6);

        // one solid leaf at the end of the chain, empty leafs everywhere else
        let blocking = heads
            .tnodes
            .iter()
            .flat_map(|t| t.children.iter())
            .filter(|c| matches!(c, TChild::Blocking(_)))
            .count();
        let empty = heads
            .tnodes
            .iter()
            .flat_map(|t| t.children.iter())
            .filter(|c| matches!(c, TChild::Empty))
            .count();
        assert_eq!(blocking, 1);
        assert_eq!(empty, 6);
    }

    #[test]
    fn test_level_node_gets_separating_plane() {
        let mut lumps = lumps_with_boxes(&[
            SolidBox::solid(1, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]),
            SolidBox::solid(2, [128.0, 0.0, 0.0], [192.0, 64.0, 64.0]),
        ]);
        crate::testmap::join_levels(&mut lumps, 1, 2, 3);
        let tile = MapTile::new(&lumps, 0, [0.0; 3]).unwrap();
        let heads = tile.trace_heads();

        let thead = heads.theads.iter().find(|h| h.level == 3).unwrap();
        let root = heads.tnodes[thead.tnode as usize];
        assert_eq!(root.plane_type, PLANE_X);
        assert_eq!(root.dist, 96.0);
        // the box with the lower bounds sits behind the plane
        assert!(matches!(root.children, [TChild::Node(_), TChild::Node(_)]));
    }

    #[test]
    fn test_level_node_falls_back_to_split_node() {
        let mut lumps = lumps_with_boxes(&[
            SolidBox::solid(1, [0.0, 0.0, 0.0], [64.0, 64.0, 64.0]),
            SolidBox::solid(2, [32.0, 32.0, 128.0], [96.0, 96.0, 192.0]),
        ]);
        crate::testmap::join_levels(&mut lumps, 1, 2, 3);
        let tile = MapTile::new(&lumps, 0, [0.0; 3]).unwrap();
        let heads = tile.trace_heads();

        let thead = heads.theads.iter().find(|h| h.level == 3).unwrap();
        let root = heads.tnodes[thead.tnode as usize];
        assert_eq!(root.plane_type, PLANE_NONE);
    }

    #[test]
    fn test_leaf_below_level_node_is_an_error() {
        let mut lumps = lumps_with_boxes(&[SolidBox::solid(1, [0.0; 3], [64.0; 3])]);
        crate::testmap::join_levels(&mut lumps, 1, 1, 3);
        let level_node = lumps.nodes.len() - 1;
        lumps.nodes[level_node].children[1] = LEAFNODE;
        match MapTile::new(&lumps, 0, [0.0; 3]) {
            Err(CmError::UnexpectedLeaf { node, .. }) => assert_eq!(node, level_node),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
