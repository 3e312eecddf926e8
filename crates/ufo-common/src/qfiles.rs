// qfiles.rs - BSP tile records as handed over by the map loader

use crate::error::{CmError, CmResult};
use crate::q_shared::{vector_length, TracePlane, Vec3};

// ============================================================
// BSP limits
// ============================================================

pub const MAX_MAPTILES: usize = 64;

// Upper design bounds
pub const MAX_MAP_MODELS: usize = 1024;
pub const MAX_MAP_BRUSHES: usize = 16384;
pub const MAX_MAP_TEXINFO: usize = 16384;
pub const MAX_MAP_PLANES: usize = 65536;
pub const MAX_MAP_NODES: usize = 65536;
pub const MAX_MAP_BRUSHSIDES: usize = 65536;
pub const MAX_MAP_LEAFS: usize = 65536;
pub const MAX_MAP_LEAFBRUSHES: usize = 65536;

/// Capacity of the position test leaf list unless configured otherwise.
pub const MAX_LEAFS: usize = 1024;

/// Node `planenum` of the planeless level nodes that join the level trees.
pub const PLANENUM_LEAF: i32 = -1;

/// Child values `<= LEAFNODE` are leafs: leaf = `LEAFNODE - child`.
pub const LEAFNODE: i32 = -1;

// ============================================================
// Records
// ============================================================

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DModel {
    pub mins: [f32; 3],
    pub maxs: [f32; 3],
    pub origin: [f32; 3],
    pub headnode: i32,
    pub firstface: i32,
    pub numfaces: i32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DPlane {
    pub normal: [f32; 3],
    pub dist: f32,
    pub plane_type: i32,
}

impl TracePlane for DPlane {
    #[inline]
    fn normal(&self) -> &Vec3 {
        &self.normal
    }

    #[inline]
    fn dist(&self) -> f32 {
        self.dist
    }

    #[inline]
    fn plane_type(&self) -> u8 {
        self.plane_type as u8
    }
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DNode {
    /// `PLANENUM_LEAF` for level nodes, which only carry bounds
    pub planenum: i32,
    /// negative numbers are -(leafs+1), not nodes
    pub children: [i32; 2],
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstface: u16,
    pub numfaces: u16,
}

#[derive(Debug, Clone)]
#[repr(C)]
pub struct TexInfo {
    pub vecs: [[f32; 4]; 2],
    pub surface_flags: u32,
    pub value: u32,
    pub texture: [u8; 32],
}

impl Default for TexInfo {
    fn default() -> Self {
        Self {
            vecs: [[0.0; 4]; 2],
            surface_flags: 0,
            value: 0,
            texture: [0; 32],
        }
    }
}

impl TexInfo {
    pub fn texture_name(&self) -> &str {
        let len = self.texture.iter().position(|&b| b == 0).unwrap_or(self.texture.len());
        std::str::from_utf8(&self.texture[..len]).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DLeaf {
    pub contentflags: u32,
    pub area: i16,
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstleafbrush: u16,
    pub numleafbrushes: u16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DBrushSide {
    pub planenum: u16,
    /// -1 means no texinfo (null surface)
    pub texinfo: i16,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DBrush {
    pub firstside: i32,
    pub numsides: i32,
    pub contentflags: u32,
}

/// The decoded lumps of one BSP tile.
#[derive(Debug, Clone, Default)]
pub struct BspLumps {
    pub name: String,
    pub planes: Vec<DPlane>,
    pub nodes: Vec<DNode>,
    pub leafs: Vec<DLeaf>,
    pub leafbrushes: Vec<u16>,
    pub brushes: Vec<DBrush>,
    pub brushsides: Vec<DBrushSide>,
    pub texinfo: Vec<TexInfo>,
    /// level models first, then the inline models
    pub models: Vec<DModel>,
}

impl BspLumps {
    /// Checks the lump sizes against the map limits and every cross
    /// reference between the lumps, so the tracer can index blindly.
    pub fn validate(&self) -> CmResult<()> {
        let limits: [(&'static str, usize, usize); 8] = [
            ("plane", self.planes.len(), MAX_MAP_PLANES),
            ("node", self.nodes.len(), MAX_MAP_NODES),
            ("leaf", self.leafs.len(), MAX_MAP_LEAFS),
            ("leafbrush", self.leafbrushes.len(), MAX_MAP_LEAFBRUSHES),
            ("brush", self.brushes.len(), MAX_MAP_BRUSHES),
            ("brushside", self.brushsides.len(), MAX_MAP_BRUSHSIDES),
            ("texinfo", self.texinfo.len(), MAX_MAP_TEXINFO),
            ("model", self.models.len(), MAX_MAP_MODELS),
        ];
        for (lump, count, max) in limits {
            if count > max {
                return Err(CmError::LumpOverflow {
                    tile: self.name.clone(),
                    lump,
                    count,
                    max,
                });
            }
        }

        let check = |what: &'static str, index: i64, count: usize| -> CmResult<()> {
            if index < 0 || index as usize >= count {
                return Err(CmError::IndexOutOfRange {
                    tile: self.name.clone(),
                    what,
                    index,
                    count,
                });
            }
            Ok(())
        };

        for (i, plane) in self.planes.iter().enumerate() {
            if (vector_length(&plane.normal) - 1.0).abs() > 0.01 {
                return Err(CmError::NonUnitNormal {
                    tile: self.name.clone(),
                    plane: i,
                });
            }
        }

        for node in &self.nodes {
            if node.planenum != PLANENUM_LEAF {
                check("plane", node.planenum as i64, self.planes.len())?;
            }
            for &child in &node.children {
                if child <= LEAFNODE {
                    check("leaf", (LEAFNODE - child) as i64, self.leafs.len())?;
                } else {
                    check("node", child as i64, self.nodes.len())?;
                }
            }
        }

        self.check_node_cycles()?;

        for leaf in &self.leafs {
            let last = leaf.firstleafbrush as i64 + leaf.numleafbrushes as i64;
            if leaf.numleafbrushes > 0 {
                check("leafbrush", last - 1, self.leafbrushes.len())?;
            }
        }

        for &brush in &self.leafbrushes {
            check("brush", brush as i64, self.brushes.len())?;
        }

        for brush in &self.brushes {
            if brush.numsides < 0 {
                check("brushside count", brush.numsides as i64, self.brushsides.len())?;
            }
            if brush.numsides > 0 {
                check("brushside", brush.firstside as i64, self.brushsides.len())?;
                check(
                    "brushside",
                    brush.firstside as i64 + brush.numsides as i64 - 1,
                    self.brushsides.len(),
                )?;
            }
        }

        for side in &self.brushsides {
            check("plane", side.planenum as i64, self.planes.len())?;
            if side.texinfo != -1 {
                check("texinfo", side.texinfo as i64, self.texinfo.len())?;
            }
        }

        for model in &self.models {
            if model.headnode != LEAFNODE {
                check("headnode", model.headnode as i64, self.nodes.len())?;
            }
        }

        Ok(())
    }

    /// Node children may share subtrees but must never lead back to an
    /// ancestor. Child indices have to be range checked already.
    fn check_node_cycles(&self) -> CmResult<()> {
        const OPEN: u8 = 1;
        const DONE: u8 = 2;

        let mut state = vec![0u8; self.nodes.len()];
        // (node, next child to look at)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..self.nodes.len() {
            if state[root] != 0 {
                continue;
            }
            state[root] = OPEN;
            stack.push((root, 0));

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                if next == 2 {
                    state[node] = DONE;
                    stack.pop();
                    continue;
                }
                top.1 += 1;

                let child = self.nodes[node].children[next];
                if child <= LEAFNODE {
                    continue;
                }
                let child = child as usize;
                match state[child] {
                    0 => {
                        state[child] = OPEN;
                        stack.push((child, 0));
                    }
                    OPEN => {
                        return Err(CmError::NodeCycle {
                            tile: self.name.clone(),
                            node: child,
                        })
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
