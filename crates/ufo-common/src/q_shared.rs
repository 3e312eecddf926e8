// q_shared.rs - foundational types and math shared by every module

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

pub const PITCH: usize = 0;
pub const YAW: usize = 1;
pub const ROLL: usize = 2;

// ============================================================
// Epsilons
// ============================================================

/// Plane side tolerance used when splitting line segments.
pub const ON_EPSILON: f32 = 0.1;
/// 1/32 epsilon to keep floating point happy in the hull checker.
pub const DIST_EPSILON: f32 = 0.03125;
pub const EQUAL_EPSILON: f32 = 0.001;
pub const PLANESIDE_EPSILON: f32 = 0.001;

// ============================================================
// Grid units
// ============================================================

pub const UNIT_SIZE: f32 = 32.0;
pub const UNIT_HEIGHT: f32 = 64.0;

// ============================================================
// Content flags
// ============================================================

bitflags::bitflags! {
    /// Brush and leaf content bits. Unknown bits coming from map data are kept.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Contents: u32 {
        const SOLID       = 0x0000_0001;
        const WINDOW      = 0x0000_0002;
        const LADDER      = 0x0000_0004;
        const WATER       = 0x0000_0020;
        const LEVEL_1     = 0x0000_0100;
        const LEVEL_2     = 0x0000_0200;
        const LEVEL_3     = 0x0000_0400;
        const LEVEL_4     = 0x0000_0800;
        const LEVEL_5     = 0x0000_1000;
        const LEVEL_6     = 0x0000_2000;
        const LEVEL_7     = 0x0000_4000;
        const LEVEL_8     = 0x0000_8000;
        const ACTORCLIP   = 0x0001_0000;
        const PASSABLE    = 0x0002_0000;
        const TERRAIN     = 0x0004_0000;
        const LIGHTCLIP   = 0x0008_0000;
        const ACTOR       = 0x0010_0000;
        const ORIGIN      = 0x0100_0000;
        const WEAPONCLIP  = 0x0200_0000;
        const DEADACTOR   = 0x0400_0000;
        const DETAIL      = 0x0800_0000;
        const TRANSLUCENT = 0x1000_0000;

        const _ = !0;
    }
}

pub const MASK_ALL: Contents = Contents::from_bits_retain(u32::MAX);
pub const MASK_SOLID: Contents = Contents::SOLID.union(Contents::WINDOW);
pub const MASK_IMPASSABLE: Contents = MASK_SOLID.union(Contents::ACTORCLIP);
pub const MASK_CLIP: Contents = Contents::ACTORCLIP
    .union(Contents::WEAPONCLIP)
    .union(Contents::LIGHTCLIP);
pub const MASK_VISIBILITY: Contents = Contents::SOLID.union(Contents::WATER);

/// Leaf contents that make a tracing-node leaf blocking for line tests.
pub const MASK_LINE_BLOCKING: Contents = Contents::SOLID.union(MASK_CLIP);

// ============================================================
// Levels
// ============================================================

/// Levels 0..=255 are combinations of the eight visible levels.
pub const LEVEL_LASTVISIBLE: u32 = 255;
pub const LEVEL_LIGHTCLIP: u32 = 256;
pub const LEVEL_LASTLIGHTBLOCKING: u32 = 256;
pub const LEVEL_WEAPONCLIP: u32 = 257;
pub const LEVEL_ACTORCLIP: u32 = 258;
pub const LEVEL_STEPON: u32 = 259;
pub const LEVEL_TRACING: u32 = 260;
pub const LEVEL_MAX: u32 = 261;

/// The first models of every tile hold the per-level world geometry.
pub const NUM_REGULAR_MODELS: usize = LEVEL_MAX as usize;

bitflags::bitflags! {
    /// Which levels (and clip layers) a trace looks at.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct LevelMask: u32 {
        const LEVEL_1    = 0x001;
        const LEVEL_2    = 0x002;
        const LEVEL_3    = 0x004;
        const LEVEL_4    = 0x008;
        const LEVEL_5    = 0x010;
        const LEVEL_6    = 0x020;
        const LEVEL_7    = 0x040;
        const LEVEL_8    = 0x080;
        const ACTORCLIP  = 0x100;
        const WEAPONCLIP = 0x200;

        const _ = !0;
    }
}

pub const TL_FLAG_REGULAR_LEVELS: LevelMask = LevelMask::from_bits_retain(0x0FF);
pub const TL_FLAG_ACTORCLIP: LevelMask = LevelMask::ACTORCLIP;
pub const TL_FLAG_WEAPONCLIP: LevelMask = LevelMask::WEAPONCLIP;
pub const TL_FLAG_ALL: LevelMask = LevelMask::from_bits_retain(0x300);
/// Mask to trace against all the visible levels (1-8) and the actor clip.
pub const TRACING_ALL_VISIBLE_LEVELS: LevelMask = LevelMask::from_bits_retain(0x1FF);

// ============================================================
// Plane
// ============================================================

pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_ANYX: u8 = 3;
pub const PLANE_ANYY: u8 = 4;
pub const PLANE_ANYZ: u8 = 5;
/// Tracing nodes only: no plane, test both children.
pub const PLANE_NONE: u8 = 6;

pub const PSIDE_FRONT: i32 = 1;
pub const PSIDE_BACK: i32 = 2;
pub const PSIDE_BOTH: i32 = PSIDE_FRONT | PSIDE_BACK;

/// Read access to a plane, shared by the runtime and the disk representation.
pub trait TracePlane {
    fn normal(&self) -> &Vec3;
    fn dist(&self) -> f32;
    fn plane_type(&self) -> u8;

    #[inline]
    fn is_axial(&self) -> bool {
        self.plane_type() < 3
    }

    /// Bit `i` set when normal component `i` is negative.
    fn signbits(&self) -> u8 {
        signbits_for_plane(self.normal())
    }

    fn to_cplane(&self) -> CPlane {
        CPlane::new(*self.normal(), self.dist())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: u8,
    pub signbits: u8,
}

impl Default for CPlane {
    fn default() -> Self {
        Self {
            normal: [0.0; 3],
            dist: 0.0,
            plane_type: PLANE_X,
            signbits: 0,
        }
    }
}

impl CPlane {
    pub fn new(normal: Vec3, dist: f32) -> Self {
        Self {
            normal,
            dist,
            plane_type: plane_type_for_normal(&normal),
            signbits: signbits_for_plane(&normal),
        }
    }
}

impl TracePlane for CPlane {
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
        self.plane_type
    }

    #[inline]
    fn signbits(&self) -> u8 {
        self.signbits
    }

    fn to_cplane(&self) -> CPlane {
        *self
    }
}

/// Only planes facing a positive axis are axial: the fast paths read
/// `p[type] - dist` and would get the sign wrong otherwise.
pub fn plane_type_for_normal(normal: &Vec3) -> u8 {
    if normal[0] == 1.0 {
        return PLANE_X;
    }
    if normal[1] == 1.0 {
        return PLANE_Y;
    }
    if normal[2] == 1.0 {
        return PLANE_Z;
    }

    let ax = normal[0].abs();
    let ay = normal[1].abs();
    let az = normal[2].abs();
    if ax >= ay && ax >= az {
        PLANE_ANYX
    } else if ay >= ax && ay >= az {
        PLANE_ANYY
    } else {
        PLANE_ANYZ
    }
}

/// One bit per negative normal component, for fast box classification.
pub fn signbits_for_plane(normal: &Vec3) -> u8 {
    let mut bits = 0u8;
    for (j, n) in normal.iter().enumerate() {
        if *n < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

/// Returns PSIDE_FRONT, PSIDE_BACK or PSIDE_BOTH. A box lying on an axial
/// plane within PLANESIDE_EPSILON returns 0 and is treated as both by callers.
pub fn box_on_plane_side<P: TracePlane + ?Sized>(mins: &Vec3, maxs: &Vec3, plane: &P) -> i32 {
    let normal = plane.normal();
    let dist = plane.dist();

    // axial planes are easy
    if plane.is_axial() {
        let t = plane.plane_type() as usize;
        let mut side = 0;
        if maxs[t] > dist + PLANESIDE_EPSILON {
            side |= PSIDE_FRONT;
        }
        if mins[t] < dist - PLANESIDE_EPSILON {
            side |= PSIDE_BACK;
        }
        return side;
    }

    // leading and trailing corners of the box
    let signbits = plane.signbits();
    let mut corners = [[0.0f32; 3]; 2];
    for i in 0..3 {
        if signbits & (1 << i) != 0 {
            corners[0][i] = mins[i];
            corners[1][i] = maxs[i];
        } else {
            corners[1][i] = mins[i];
            corners[0][i] = maxs[i];
        }
    }
    let dist1 = dot_product(normal, &corners[0]) - dist;
    let dist2 = dot_product(normal, &corners[1]) - dist;

    let mut side = 0;
    if dist1 >= PLANESIDE_EPSILON {
        side = PSIDE_FRONT;
    }
    if dist2 < PLANESIDE_EPSILON {
        side |= PSIDE_BACK;
    }
    side
}

// ============================================================
// Surface
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CSurface {
    /// index of the texinfo this surface came from
    pub texinfo: usize,
    pub flags: u32,
    pub value: u32,
}

// ============================================================
// Trace
// ============================================================

/// Result of sweeping a box through the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// if true, plane is not valid
    pub allsolid: bool,
    /// if true, the initial point was in a solid area
    pub startsolid: bool,
    /// 1.0 = didn't hit anything, 0.0 = blocked at the start
    pub fraction: f32,
    pub endpos: Vec3,
    /// surface plane at impact
    pub plane: CPlane,
    pub planenum: Option<usize>,
    /// `None` is the null surface
    pub surface: Option<CSurface>,
    /// contents of the brush that was hit
    pub contents: Contents,
    pub leafnum: Option<usize>,
    pub map_tile: Option<usize>,
    /// inline model number, only set by the entity traces
    pub model: Option<usize>,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            allsolid: false,
            startsolid: false,
            fraction: 1.0,
            endpos: [0.0; 3],
            plane: CPlane::default(),
            planenum: None,
            surface: None,
            contents: Contents::empty(),
            leafnum: None,
            map_tile: None,
            model: None,
        }
    }
}

/// Axis aligned box, used for the trace extents.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aabb {
    pub mins: Vec3,
    pub maxs: Vec3,
}

impl Aabb {
    pub const fn new(mins: Vec3, maxs: Vec3) -> Self {
        Self { mins, maxs }
    }

    pub const fn point() -> Self {
        Self {
            mins: VEC3_ORIGIN,
            maxs: VEC3_ORIGIN,
        }
    }
}

// ============================================================
// MATHLIB - Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Point at `frac` along the segment from `p1` to `p2`.
#[inline]
pub fn vector_interpolation(p1: &Vec3, p2: &Vec3, frac: f32) -> Vec3 {
    [
        p1[0] + frac * (p2[0] - p1[0]),
        p1[1] + frac * (p2[1] - p1[1]),
        p1[2] + frac * (p2[2] - p1[2]),
    ]
}

pub fn vector_compare(v1: &Vec3, v2: &Vec3) -> bool {
    v1[0] == v2[0] && v1[1] == v2[1] && v1[2] == v2[2]
}

pub fn vector_compare_eps(v1: &Vec3, v2: &Vec3, epsilon: f32) -> bool {
    (0..3).all(|i| (v1[i] - v2[i]).abs() <= epsilon)
}

#[inline]
pub fn vector_not_empty(v: &Vec3) -> bool {
    v[0] != 0.0 || v[1] != 0.0 || v[2] != 0.0
}

pub fn vector_length_sqr(v: &Vec3) -> f32 {
    dot_product(v, v)
}

pub fn vector_length(v: &Vec3) -> f32 {
    vector_length_sqr(v).sqrt()
}

/// True if `v1` is nearer to `comp` than `v2` is.
pub fn vector_nearer(v1: &Vec3, v2: &Vec3, comp: &Vec3) -> bool {
    let d1 = vector_subtract(comp, v1);
    let d2 = vector_subtract(comp, v2);
    vector_length_sqr(&d1) < vector_length_sqr(&d2)
}

pub fn vector_center_from_mins_maxs(mins: &Vec3, maxs: &Vec3) -> Vec3 {
    [
        (mins[0] + maxs[0]) / 2.0,
        (mins[1] + maxs[1]) / 2.0,
        (mins[2] + maxs[2]) / 2.0,
    ]
}

pub fn add_point_to_bounds(v: &Vec3, mins: &mut Vec3, maxs: &mut Vec3) {
    for i in 0..3 {
        if v[i] < mins[i] {
            mins[i] = v[i];
        }
        if v[i] > maxs[i] {
            maxs[i] = v[i];
        }
    }
}

// ============================================================
// Angle functions
// ============================================================

pub fn angle_vectors(
    angles: &Vec3,
    forward: Option<&mut Vec3>,
    right: Option<&mut Vec3>,
    up: Option<&mut Vec3>,
) {
    let angle_yaw = angles[YAW].to_radians();
    let sy = angle_yaw.sin();
    let cy = angle_yaw.cos();

    let angle_pitch = angles[PITCH].to_radians();
    let sp = angle_pitch.sin();
    let cp = angle_pitch.cos();

    let angle_roll = angles[ROLL].to_radians();
    let sr = angle_roll.sin();
    let cr = angle_roll.cos();

    if let Some(fwd) = forward {
        fwd[0] = cp * cy;
        fwd[1] = cp * sy;
        fwd[2] = -sp;
    }
    if let Some(r) = right {
        r[0] = -sr * sp * cy + -cr * -sy;
        r[1] = -sr * sp * sy + -cr * cy;
        r[2] = -sr * cp;
    }
    if let Some(u) = up {
        u[0] = cr * sp * cy + -sr * -sy;
        u[1] = cr * sp * sy + -sr * cy;
        u[2] = cr * cp;
    }
}

/// Convenience version of angle_vectors that returns a tuple (forward, right, up).
pub fn angle_vectors_tuple(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let mut forward = [0.0f32; 3];
    let mut right = [0.0f32; 3];
    let mut up = [0.0f32; 3];
    angle_vectors(angles, Some(&mut forward), Some(&mut right), Some(&mut up));
    (forward, right, up)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_type_for_normal() {
        assert_eq!(plane_type_for_normal(&[1.0, 0.0, 0.0]), PLANE_X);
        assert_eq!(plane_type_for_normal(&[0.0, 1.0, 0.0]), PLANE_Y);
        assert_eq!(plane_type_for_normal(&[0.0, -1.0, 0.0]), PLANE_ANYY);
        assert_eq!(plane_type_for_normal(&[0.0, 0.0, 1.0]), PLANE_Z);
        let d = std::f32::consts::FRAC_1_SQRT_2;
        assert_eq!(plane_type_for_normal(&[d, d, 0.0]), PLANE_ANYX);
        assert_eq!(plane_type_for_normal(&[0.1, 0.2, 0.97]), PLANE_ANYZ);
    }

    #[test]
    fn test_signbits() {
        assert_eq!(signbits_for_plane(&[1.0, 0.0, 0.0]), 0);
        assert_eq!(signbits_for_plane(&[-1.0, 0.0, 0.0]), 1);
        assert_eq!(signbits_for_plane(&[-0.5, -0.5, -0.7]), 7);
    }

    #[test]
    fn test_box_on_plane_side_axial() {
        let plane = CPlane::new([1.0, 0.0, 0.0], 100.0);
        let side = |lo: f32, hi: f32| box_on_plane_side(&[lo, 0.0, 0.0], &[hi, 1.0, 1.0], &plane);
        assert_eq!(side(120.0, 140.0), PSIDE_FRONT);
        assert_eq!(side(40.0, 60.0), PSIDE_BACK);
        assert_eq!(side(90.0, 110.0), PSIDE_BOTH);
        // touching the plane from the front
        assert_eq!(side(100.0, 110.0), PSIDE_FRONT);
    }

    #[test]
    fn test_box_on_plane_side_general() {
        let d = std::f32::consts::FRAC_1_SQRT_2;
        let plane = CPlane::new([d, d, 0.0], 0.0);
        assert_eq!(box_on_plane_side(&[10.0, 10.0, 0.0], &[20.0, 20.0, 1.0], &plane), PSIDE_FRONT);
        assert_eq!(box_on_plane_side(&[-20.0, -20.0, 0.0], &[-10.0, -10.0, 1.0], &plane), PSIDE_BACK);
        assert_eq!(box_on_plane_side(&[-5.0, -5.0, 0.0], &[5.0, 5.0, 1.0], &plane), PSIDE_BOTH);
        // the flipped plane is not axial and takes the general path
        let back = CPlane::new([-1.0, 0.0, 0.0], -100.0);
        assert!(!back.is_axial());
        assert_eq!(box_on_plane_side(&[40.0, 0.0, 0.0], &[60.0, 1.0, 1.0], &back), PSIDE_FRONT);
    }

    #[test]
    fn test_box_on_plane_side_reads_cached_signbits() {
        let d = std::f32::consts::FRAC_1_SQRT_2;
        let plane = CPlane::new([-d, d, 0.0], 0.0);
        assert_eq!(plane.signbits, 1);
        assert_eq!(TracePlane::signbits(&plane), 1);
        // the leading corner is picked from the cached bits
        assert_eq!(box_on_plane_side(&[-20.0, 10.0, 0.0], &[-10.0, 20.0, 1.0], &plane), PSIDE_FRONT);

        assert_eq!(box_on_plane_side(&[-10.0, -10.0, 0.0], &[10.0, 10.0, 1.0], &plane), PSIDE_BOTH);

        // clearing the bits makes the straddling box look like it only touches the plane
        let mut stale = plane;
        stale.signbits = 0;
        assert_eq!(box_on_plane_side(&[-10.0, -10.0, 0.0], &[10.0, 10.0, 1.0], &stale), PSIDE_BACK);
    }

    #[test]
    fn test_mask_all_keeps_unknown_bits() {
        assert_eq!(MASK_ALL.bits(), u32::MAX);
        assert!(MASK_ALL.contains(Contents::SOLID | Contents::WEAPONCLIP));
        let raw = Contents::from_bits_retain(0x4000_0000);
        assert!(MASK_ALL.intersects(raw));
    }

    #[test]
    fn test_vector_nearer() {
        let origin = [0.0, 0.0, 0.0];
        assert!(vector_nearer(&[1.0, 0.0, 0.0], &[2.0, 0.0, 0.0], &origin));
        assert!(!vector_nearer(&[3.0, 0.0, 0.0], &[0.0, 2.0, 0.0], &origin));
    }

    #[test]
    fn test_vector_interpolation_endpoints() {
        let a = [0.0, 10.0, -4.0];
        let b = [100.0, 10.0, 4.0];
        assert_eq!(vector_interpolation(&a, &b, 0.0), a);
        assert_eq!(vector_interpolation(&a, &b, 1.0), b);
        assert_eq!(vector_interpolation(&a, &b, 0.5), [50.0, 10.0, 0.0]);
    }

    #[test]
    fn test_angle_vectors_yaw_90() {
        let (forward, right, up) = angle_vectors_tuple(&[0.0, 90.0, 0.0]);
        assert!(vector_compare_eps(&forward, &[0.0, 1.0, 0.0], 1e-6));
        assert!(vector_compare_eps(&right, &[1.0, 0.0, 0.0], 1e-6));
        assert!(vector_compare_eps(&up, &[0.0, 0.0, 1.0], 1e-6));
    }
}
