// testmap.rs - hand built BSP lumps for tests

use crate::q_shared::{plane_type_for_normal, Contents, Vec3, NUM_REGULAR_MODELS};
use crate::qfiles::{
    BspLumps, DBrush, DBrushSide, DLeaf, DModel, DNode, DPlane, TexInfo, LEAFNODE, PLANENUM_LEAF,
};

/// One axis aligned brush, placed in the level model `level`.
#[derive(Debug, Clone, Copy)]
pub struct SolidBox {
    pub level: usize,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub contents: Contents,
}

impl SolidBox {
    pub fn solid(level: usize, mins: Vec3, maxs: Vec3) -> Self {
        Self::new(level, mins, maxs, Contents::SOLID)
    }

    pub fn new(level: usize, mins: Vec3, maxs: Vec3, contents: Contents) -> Self {
        Self {
            level,
            mins,
            maxs,
            contents,
        }
    }
}

fn to_i16(v: &Vec3) -> [i16; 3] {
    [v[0] as i16, v[1] as i16, v[2] as i16]
}

/// Appends the six face planes, the node chain and a leaf listing `brush`.
/// Returns the first node and the first plane of the chain.
fn push_box_nodes(lumps: &mut BspLumps, mins: &Vec3, maxs: &Vec3, contents: Contents, brush: usize) -> (usize, usize) {
    let plane_base = lumps.planes.len();
    let node_base = lumps.nodes.len();
    let leaf = lumps.leafs.len();

    for i in 0..6 {
        let side = i & 1;
        let axis = i >> 1;
        let dist = if side == 0 { maxs[axis] } else { mins[axis] };

        let mut normal = [0.0f32; 3];
        normal[axis] = 1.0;
        push_plane_pair(lumps, normal, dist);

        let mut children = [0i32; 2];
        children[side] = LEAFNODE;
        children[side ^ 1] = if i != 5 {
            (node_base + i + 1) as i32
        } else {
            LEAFNODE - leaf as i32
        };
        lumps.nodes.push(DNode {
            planenum: (plane_base + i * 2) as i32,
            children,
            mins: to_i16(mins),
            maxs: to_i16(maxs),
            ..Default::default()
        });
    }

    lumps.leafs.push(DLeaf {
        contentflags: contents.bits(),
        firstleafbrush: lumps.leafbrushes.len() as u16,
        numleafbrushes: 1,
        ..Default::default()
    });
    lumps.leafbrushes.push(brush as u16);

    (node_base, plane_base)
}

/// Pushes the plane and its flipped twin.
fn push_plane_pair(lumps: &mut BspLumps, normal: Vec3, dist: f32) -> usize {
    let planenum = lumps.planes.len();
    lumps.planes.push(DPlane {
        normal,
        dist,
        plane_type: plane_type_for_normal(&normal) as i32,
    });
    let back = [-normal[0], -normal[1], -normal[2]];
    lumps.planes.push(DPlane {
        normal: back,
        dist: -dist,
        plane_type: plane_type_for_normal(&back) as i32,
    });
    planenum
}

/// Appends a box brush with its node chain. Returns the first node.
fn push_box(lumps: &mut BspLumps, mins: &Vec3, maxs: &Vec3, contents: Contents) -> usize {
    let brush = lumps.brushes.len();
    let (node, plane_base) = push_box_nodes(lumps, mins, maxs, contents, brush);

    let firstside = lumps.brushsides.len();
    for i in 0..6 {
        // outward facing plane of each face
        lumps.brushsides.push(DBrushSide {
            planenum: (plane_base + i * 2 + (i & 1)) as u16,
            texinfo: 0,
        });
    }
    lumps.brushes.push(DBrush {
        firstside: firstside as i32,
        numsides: 6,
        contentflags: contents.bits(),
    });

    node
}

/// Lumps with one box brush per entry. Leaf 0 is the empty outside; each
/// box becomes the level model of its `level`.
pub fn lumps_with_boxes(boxes: &[SolidBox]) -> BspLumps {
    let mut lumps = BspLumps {
        name: "+test".into(),
        leafs: vec![DLeaf::default()],
        texinfo: vec![TexInfo {
            surface_flags: 0x10,
            value: 7,
            ..Default::default()
        }],
        models: vec![
            DModel {
                headnode: LEAFNODE,
                ..Default::default()
            };
            NUM_REGULAR_MODELS
        ],
        ..Default::default()
    };

    for b in boxes {
        let head = push_box(&mut lumps, &b.mins, &b.maxs, b.contents);
        let model = &mut lumps.models[b.level];
        model.headnode = head as i32;
        model.mins = b.mins;
        model.maxs = b.maxs;
    }

    lumps
}

/// Lumps with the single box `b` below a level head on the plane
/// (`normal`, `dist`). Behind the plane sits the box chain; in front a
/// second chain whose leaf spans `front_mins..b.maxs` and lists the same
/// brush, so the brush is found in two leafs.
pub fn lumps_with_split_box(b: SolidBox, normal: Vec3, dist: f32, front_mins: Vec3) -> BspLumps {
    let mut lumps = lumps_with_boxes(&[b]);
    let back = lumps.models[b.level].headnode;
    let (front, _) = push_box_nodes(&mut lumps, &front_mins, &b.maxs, b.contents, 0);
    let planenum = push_plane_pair(&mut lumps, normal, dist);

    let mut mins = b.mins;
    for i in 0..3 {
        mins[i] = mins[i].min(front_mins[i]);
    }
    lumps.nodes.push(DNode {
        planenum: planenum as i32,
        children: [front as i32, back],
        mins: to_i16(&mins),
        maxs: to_i16(&b.maxs),
        ..Default::default()
    });
    lumps.models[b.level].headnode = (lumps.nodes.len() - 1) as i32;
    lumps
}

/// Joins the trees of levels `a` and `b` below a planeless level node that
/// becomes the head of level `c`.
pub fn join_levels(lumps: &mut BspLumps, a: usize, b: usize, c: usize) {
    let ma = lumps.models[a];
    let mb = lumps.models[b];

    let mut mins = [0.0f32; 3];
    let mut maxs = [0.0f32; 3];
    for i in 0..3 {
        mins[i] = ma.mins[i].min(mb.mins[i]);
        maxs[i] = ma.maxs[i].max(mb.maxs[i]);
    }

    lumps.nodes.push(DNode {
        planenum: PLANENUM_LEAF,
        children: [ma.headnode, mb.headnode],
        mins: to_i16(&mins),
        maxs: to_i16(&maxs),
        ..Default::default()
    });
    let node = (lumps.nodes.len() - 1) as i32;

    lumps.models[a].headnode = LEAFNODE;
    lumps.models[b].headnode = LEAFNODE;
    let model = &mut lumps.models[c];
    model.headnode = node;
    model.mins = mins;
    model.maxs = maxs;
}

/// Adds an inline model made of one box. The box is given relative to the
/// model origin. Returns the model index.
pub fn add_inline_box(lumps: &mut BspLumps, mins: Vec3, maxs: Vec3, contents: Contents, origin: Vec3) -> usize {
    let head = push_box(lumps, &mins, &maxs, contents);
    lumps.models.push(DModel {
        mins,
        maxs,
        origin,
        headnode: head as i32,
        ..Default::default()
    });
    lumps.models.len() - 1
}
