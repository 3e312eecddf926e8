// dtile.rs - compiler side tile traced straight from the disk records

use std::ops::Range;

use crate::common::com_dprintf;
use crate::error::CmResult;
use crate::q_shared::{Aabb, CSurface, Contents, LevelMask, Trace, Vec3, LEVEL_LASTLIGHTBLOCKING};
use crate::qfiles::{BspLumps, DPlane, PLANENUM_LEAF};
use crate::tnode::{build_tracing_nodes, TChild, TraceHeads, TraceTile};
use crate::trace::{test_line_r, tile_box_trace, TraceContext};

/// A single, unshifted tile as the map compiler sees it. The disk records
/// are used as they are; only the tracing trees are built on top.
#[derive(Debug, Clone)]
pub struct DMapTile {
    lumps: BspLumps,
    heads: TraceHeads,
}

impl DMapTile {
    pub fn new(lumps: BspLumps) -> CmResult<Self> {
        lumps.validate()?;
        let headnodes: Vec<i32> = lumps.models.iter().map(|m| m.headnode).collect();

        let mut tile = Self {
            lumps,
            heads: TraceHeads::default(),
        };
        tile.heads = build_tracing_nodes(&tile, &headnodes)?;

        com_dprintf(&format!(
            "{}: {} tracing nodes for {} theads\n",
            tile.lumps.name,
            tile.heads.tnodes.len(),
            tile.heads.theads.len()
        ));
        Ok(tile)
    }

    pub fn lumps(&self) -> &BspLumps {
        &self.lumps
    }

    /// Line test against the light blocking heads only. The compiler fires
    /// many lines at the same target, so the head that blocked last time
    /// is tried first. `hint` is updated with the head that blocked.
    pub fn test_line_single_tile(&self, start: &Vec3, stop: &Vec3, hint: &mut usize) -> bool {
        let heads = &self.heads;

        if let Some(h) = heads.theads.get(*hint) {
            if h.level <= LEVEL_LASTLIGHTBLOCKING
                && test_line_r(&heads.tnodes, TChild::Node(h.tnode), start, stop)
            {
                return true;
            }
        }

        for (i, h) in heads.theads.iter().enumerate() {
            if i == *hint || h.level > LEVEL_LASTLIGHTBLOCKING {
                continue;
            }
            if test_line_r(&heads.tnodes, TChild::Node(h.tnode), start, stop) {
                *hint = i;
                return true;
            }
        }
        false
    }

    /// Box trace through the one tile, tagged as tile 0.
    pub fn single_tile_box_trace(
        &self,
        ctx: &mut TraceContext,
        start: &Vec3,
        end: &Vec3,
        bbox: &Aabb,
        levelmask: LevelMask,
        contentmask: Contents,
        brushreject: Contents,
    ) -> Trace {
        let mut tr = tile_box_trace(ctx, self, start, end, bbox, levelmask, contentmask, brushreject);
        tr.map_tile = Some(0);
        tr
    }
}

impl TraceTile for DMapTile {
    type Plane = DPlane;

    fn name(&self) -> &str {
        &self.lumps.name
    }

    fn num_nodes(&self) -> usize {
        self.lumps.nodes.len()
    }

    fn num_leafs(&self) -> usize {
        self.lumps.leafs.len()
    }

    fn num_brushes(&self) -> usize {
        self.lumps.brushes.len()
    }

    #[inline]
    fn node_plane(&self, node: usize) -> Option<&DPlane> {
        let planenum = self.lumps.nodes[node].planenum;
        if planenum == PLANENUM_LEAF {
            None
        } else {
            Some(&self.lumps.planes[planenum as usize])
        }
    }

    #[inline]
    fn node_children(&self, node: usize) -> [i32; 2] {
        self.lumps.nodes[node].children
    }

    fn node_bounds(&self, node: usize) -> (Vec3, Vec3) {
        let n = &self.lumps.nodes[node];
        (
            [n.mins[0] as f32, n.mins[1] as f32, n.mins[2] as f32],
            [n.maxs[0] as f32, n.maxs[1] as f32, n.maxs[2] as f32],
        )
    }

    #[inline]
    fn leaf_contents(&self, leaf: usize) -> Contents {
        Contents::from_bits_retain(self.lumps.leafs[leaf].contentflags)
    }

    #[inline]
    fn leaf_brushes(&self, leaf: usize) -> &[u16] {
        let l = &self.lumps.leafs[leaf];
        let first = l.firstleafbrush as usize;
        &self.lumps.leafbrushes[first..first + l.numleafbrushes as usize]
    }

    #[inline]
    fn brush_contents(&self, brush: usize) -> Contents {
        Contents::from_bits_retain(self.lumps.brushes[brush].contentflags)
    }

    #[inline]
    fn brush_sides(&self, brush: usize) -> Range<usize> {
        let b = &self.lumps.brushes[brush];
        let first = b.firstside.max(0) as usize;
        first..first + b.numsides.max(0) as usize
    }

    #[inline]
    fn side_planenum(&self, side: usize) -> usize {
        self.lumps.brushsides[side].planenum as usize
    }

    #[inline]
    fn plane(&self, planenum: usize) -> &DPlane {
        &self.lumps.planes[planenum]
    }

    fn side_surface(&self, side: usize) -> Option<CSurface> {
        let texinfo = self.lumps.brushsides[side].texinfo;
        if texinfo < 0 {
            return None;
        }
        let tex = &self.lumps.texinfo[texinfo as usize];
        Some(CSurface {
            texinfo: texinfo as usize,
            flags: tex.surface_flags,
            value: tex.value,
        })
    }

    fn trace_heads(&self) -> &TraceHeads {
        &self.heads
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::q_shared::{LEVEL_ACTORCLIP, LEVEL_LIGHTCLIP, MASK_SOLID};
    use crate::qfiles::MAX_LEAFS;
    use crate::testmap::{lumps_with_boxes, SolidBox};
    use crate::tile::MapTile;

    fn three_walls() -> DMapTile {
        DMapTile::new(lumps_with_boxes(&[
            SolidBox::solid(1, [100.0, -64.0, -64.0], [150.0, 64.0, 64.0]),
            SolidBox::new(LEVEL_LIGHTCLIP as usize, [300.0, -64.0, -64.0], [350.0, 64.0, 64.0], Contents::LIGHTCLIP),
            SolidBox::new(LEVEL_ACTORCLIP as usize, [500.0, -64.0, -64.0], [550.0, 64.0, 64.0], Contents::ACTORCLIP),
        ]))
        .unwrap()
    }

    #[test]
    fn test_hint_is_updated_with_blocking_head() {
        let tile = three_walls();
        // theads are ordered by level: 1, lightclip, actorclip
        assert_eq!(tile.trace_heads().theads.len(), 3);

        let mut hint = 2;
        assert!(tile.test_line_single_tile(&[200.0, 0.0, 0.0], &[400.0, 0.0, 0.0], &mut hint));
        assert_eq!(hint, 1);

        // hinted head blocks first, hint stays
        assert!(tile.test_line_single_tile(&[250.0, 0.0, 0.0], &[380.0, 0.0, 0.0], &mut hint));
        assert_eq!(hint, 1);

        assert!(tile.test_line_single_tile(&[0.0, 0.0, 0.0], &[200.0, 0.0, 0.0], &mut hint));
        assert_eq!(hint, 0);
    }

    #[test]
    fn test_actorclip_does_not_block_light() {
        let tile = three_walls();
        let mut hint = 2;
        assert!(!tile.test_line_single_tile(&[450.0, 0.0, 0.0], &[600.0, 0.0, 0.0], &mut hint));
        assert_eq!(hint, 2);

        // a hint past the end of the heads is ignored
        let mut hint = 99;
        assert!(!tile.test_line_single_tile(&[0.0, 200.0, 0.0], &[600.0, 200.0, 0.0], &mut hint));
        assert_eq!(hint, 99);
    }

    #[test]
    fn test_single_tile_box_trace_matches_runtime_tile() {
        let lumps = lumps_with_boxes(&[SolidBox::solid(1, [100.0, -64.0, -64.0], [150.0, 64.0, 64.0])]);
        let dtile = DMapTile::new(lumps.clone()).unwrap();
        let tile = MapTile::new(&lumps, 0, [0.0; 3]).unwrap();
        let bbox = Aabb::new([-8.0; 3], [8.0; 3]);
        let mut ctx = TraceContext::with_leaf_capacity(MAX_LEAFS);

        let a = dtile.single_tile_box_trace(&mut ctx, &[0.0; 3], &[300.0, 0.0, 0.0], &bbox, LevelMask::all(), MASK_SOLID, Contents::empty());
        let b = tile_box_trace(&mut ctx, &tile, &[0.0; 3], &[300.0, 0.0, 0.0], &bbox, LevelMask::all(), MASK_SOLID, Contents::empty());

        assert_eq!(a.map_tile, Some(0));
        assert_eq!(a.fraction, b.fraction);
        assert_eq!(a.endpos, b.endpos);
        assert!((a.endpos[0] - 92.0).abs() < 0.1, "endpos {:?}", a.endpos);
        assert_eq!(a.surface.map(|s| s.value), Some(7));
    }
}
