// cmodel.rs - assembled map tiles, inline models and entity aware traces

use std::cell::RefCell;

use parking_lot::RwLock;
use rayon::prelude::*;

use crate::common::{com_dprintf, com_error, ErrorCode};
use crate::cvar::{cvar_get, cvar_init};
use crate::error::{CmError, CmResult};
use crate::q_shared::{
    vector_add, vector_nearer, vector_not_empty, vector_subtract, Aabb, Contents, LevelMask, Trace,
    Vec3, MASK_ALL, MASK_VISIBILITY, NUM_REGULAR_MODELS, UNIT_HEIGHT, UNIT_SIZE,
};
use crate::qfiles::{BspLumps, MAX_MAPTILES};
use crate::tile::{CBspModel, MapTile};
use crate::tnode::TraceTile;
use crate::trace::{
    hinted_transformed_box_trace as transformed_trace, tile_box_trace, tile_test_line,
    tile_test_line_dm, ModelTransform, TraceContext,
};

// ============================================================
// Bounds helpers
// ============================================================

/// World bounds an inline model can occupy. A rotated model may turn
/// around its origin, so it gets a cube reaching the farthest corner.
pub fn calculate_bounding_box(model: &CBspModel) -> (Vec3, Vec3) {
    if !vector_not_empty(&model.angles) {
        return (
            vector_add(&model.origin, &model.mins),
            vector_add(&model.origin, &model.maxs),
        );
    }

    let mut radius = 0.0f32;
    for i in 0..3 {
        let v = model.mins[i].abs().max(model.maxs[i].abs());
        radius += v * v;
    }
    let radius = radius.sqrt();
    let offset = [radius; 3];
    (
        vector_subtract(&model.origin, &offset),
        vector_add(&model.origin, &offset),
    )
}

/// True if both ends of the line lie on the same outer side of the model
/// bounds along some axis.
pub fn line_misses_model(start: &Vec3, stop: &Vec3, model: &CBspModel) -> bool {
    let (amins, amaxs) = calculate_bounding_box(model);
    (0..3).any(|i| {
        (start[i] > amaxs[i] && stop[i] > amaxs[i]) || (start[i] < amins[i] && stop[i] < amins[i])
    })
}

/// `*n` names inline model `n`, counted from 1 across all tiles.
fn inline_number(name: &str) -> CmResult<i64> {
    let num: i64 = name
        .strip_prefix('*')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| CmError::BadInlineModelName(name.to_string()))?;
    if num < 1 {
        return Err(CmError::BadInlineModelNumber(num));
    }
    Ok(num)
}

// ============================================================
// Box trace batches
// ============================================================

/// One box trace request for the batch entry points.
#[derive(Debug, Clone, Copy)]
pub struct BoxQuery {
    pub start: Vec3,
    pub end: Vec3,
    pub bbox: Aabb,
    pub levelmask: LevelMask,
    pub contentmask: Contents,
    pub brushreject: Contents,
}

// ============================================================
// MapTiles
// ============================================================

/// All tiles of the loaded map. Geometry is read-only after loading; only
/// inline model placement changes while the map is up.
#[derive(Debug, Clone, Default)]
pub struct MapTiles {
    tiles: Vec<MapTile>,
}

impl MapTiles {
    /// Half a grid cell around the tile bounds.
    const TILE_PADDING: Vec3 = [UNIT_SIZE / 2.0, UNIT_SIZE / 2.0, UNIT_HEIGHT / 2.0];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile(&self, idx: usize) -> Option<&MapTile> {
        self.tiles.get(idx)
    }

    pub fn tiles(&self) -> &[MapTile] {
        &self.tiles
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    /// Builds one tile moved by `shift` and appends it.
    pub fn add_tile(&mut self, lumps: &BspLumps, shift: Vec3) -> CmResult<usize> {
        if self.tiles.len() >= MAX_MAPTILES {
            return Err(CmError::TooManyTiles { max: MAX_MAPTILES });
        }
        let idx = self.tiles.len();
        self.tiles.push(MapTile::new(lumps, idx, shift)?);
        Ok(idx)
    }

    /// Builds several tiles in parallel and appends them in order. Nothing
    /// is appended if any of them fails.
    pub fn load_tiles(&mut self, tiles: &[(BspLumps, Vec3)]) -> CmResult<()> {
        if self.tiles.len() + tiles.len() > MAX_MAPTILES {
            return Err(CmError::TooManyTiles { max: MAX_MAPTILES });
        }
        let base = self.tiles.len();
        let built: Vec<MapTile> = tiles
            .par_iter()
            .enumerate()
            .map(|(i, (lumps, shift))| MapTile::new(lumps, base + i, *shift))
            .collect::<CmResult<_>>()?;

        com_dprintf(&format!("loaded {} map tiles\n", built.len()));
        self.tiles.extend(built);
        Ok(())
    }

    // ========================================================
    // Inline models
    // ========================================================

    pub fn num_inline_models(&self) -> usize {
        self.tiles.iter().map(|t| t.num_inline_models()).sum()
    }

    /// Model number, tile and model slot of an inline model.
    fn locate(&self, name: &str) -> CmResult<(i64, usize, usize)> {
        let num = inline_number(name)?;
        let mut rest = (num - 1) as usize;
        for (t, tile) in self.tiles.iter().enumerate() {
            let count = tile.num_inline_models();
            if rest < count {
                return Ok((num, t, NUM_REGULAR_MODELS + rest));
            }
            rest -= count;
        }
        Err(CmError::BadInlineModelNumber(num))
    }

    pub fn inline_model(&self, name: &str) -> CmResult<&CBspModel> {
        let (_, t, m) = self.locate(name)?;
        Ok(&self.tiles[t].models[m])
    }

    /// Places an inline model, e.g. a door that was opened.
    pub fn set_inline_model_orientation(&mut self, name: &str, origin: &Vec3, angles: &Vec3) -> CmResult<()> {
        let (_, t, m) = self.locate(name)?;
        let model = &mut self.tiles[t].models[m];
        model.origin = *origin;
        model.angles = *angles;
        Ok(())
    }

    /// Inline models of an entity list that may be traced.
    fn traceable_models<'a>(
        &'a self,
        list: &'a [&'a str],
    ) -> impl Iterator<Item = CmResult<(i64, &'a CBspModel)>> + 'a {
        list.iter().filter_map(move |name| {
            let (num, t, m) = match self.locate(name) {
                Ok(found) => found,
                Err(e) => return Some(Err(e)),
            };
            let tile = &self.tiles[t];
            let model = &tile.models[m];
            // no nodes of its own
            if model.headnode < 0 || model.headnode as usize >= tile.num_nodes() {
                return None;
            }
            Some(Ok((num, model)))
        })
    }

    // ========================================================
    // Line tests
    // ========================================================

    /// True if any tile blocks the line.
    pub fn test_line(&self, start: &Vec3, stop: &Vec3, levelmask: LevelMask) -> bool {
        self.tiles.iter().any(|t| tile_test_line(t, start, stop, levelmask))
    }

    /// Nearest point where a tile blocks the line.
    pub fn test_line_dm(&self, start: &Vec3, stop: &Vec3, levelmask: LevelMask) -> Option<Vec3> {
        let mut best: Option<Vec3> = None;
        for tile in &self.tiles {
            if let Some(hit) = tile_test_line_dm(tile, start, stop, levelmask) {
                if best.map_or(true, |b| vector_nearer(&hit, &b, start)) {
                    best = Some(hit);
                }
            }
        }
        best
    }

    /// Independent line tests run in parallel.
    pub fn test_lines(&self, lines: &[(Vec3, Vec3)], levelmask: LevelMask) -> Vec<bool> {
        lines
            .par_iter()
            .map(|(start, stop)| self.test_line(start, stop, levelmask))
            .collect()
    }

    // ========================================================
    // Box traces
    // ========================================================

    /// Box trace against every tile the swept box may touch. The nearest
    /// hit wins and is tagged with its tile.
    pub fn complete_box_trace(
        &self,
        ctx: &mut TraceContext,
        start: &Vec3,
        end: &Vec3,
        bbox: &Aabb,
        levelmask: LevelMask,
        contentmask: Contents,
        brushreject: Contents,
    ) -> Trace {
        let mut smin = [0.0f32; 3];
        let mut smax = [0.0f32; 3];
        let mut emin = [0.0f32; 3];
        let mut emax = [0.0f32; 3];
        for i in 0..3 {
            let lo = bbox.mins[i].min(bbox.maxs[i]);
            let hi = bbox.mins[i].max(bbox.maxs[i]);
            smin[i] = start[i] + lo;
            smax[i] = start[i] + hi;
            emin[i] = end[i] + lo;
            emax[i] = end[i] + hi;
        }

        let mut best: Option<Trace> = None;
        for (idx, tile) in self.tiles.iter().enumerate() {
            let wmins = vector_subtract(&tile.world_mins, &Self::TILE_PADDING);
            let wmaxs = vector_add(&tile.world_maxs, &Self::TILE_PADDING);

            // completely outside of the tile
            let outside = (0..3).any(|i| {
                (smax[i] < wmins[i] && emax[i] < wmins[i]) || (smin[i] > wmaxs[i] && emin[i] > wmaxs[i])
            });
            if outside {
                continue;
            }

            let mut newtr = tile_box_trace(ctx, tile, start, end, bbox, levelmask, contentmask, brushreject);
            newtr.map_tile = Some(idx);

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

    /// Independent box traces run in parallel, one context per worker.
    pub fn complete_box_traces(&self, queries: &[BoxQuery]) -> Vec<Trace> {
        queries
            .par_iter()
            .map_init(TraceContext::new, |ctx, q| {
                self.complete_box_trace(ctx, &q.start, &q.end, &q.bbox, q.levelmask, q.contentmask, q.brushreject)
            })
            .collect()
    }

    /// Transformed box trace through one node of the given tile.
    pub fn hinted_transformed_box_trace(
        &self,
        ctx: &mut TraceContext,
        tile: usize,
        start: &Vec3,
        end: &Vec3,
        bbox: &Aabb,
        headnode: usize,
        contentmask: Contents,
        brushreject: Contents,
        transform: &ModelTransform,
        fraction: f32,
    ) -> Trace {
        let map_tile = match self.tiles.get(tile) {
            Some(t) => t,
            None => com_error(
                ErrorCode::Fatal,
                &format!("hinted_transformed_box_trace: tile {} of {} requested", tile, self.tiles.len()),
            ),
        };
        transformed_trace(
            ctx,
            map_tile,
            tile,
            start,
            end,
            bbox,
            headnode,
            contentmask,
            brushreject,
            transform,
            fraction,
        )
    }

    fn model_trace(
        &self,
        ctx: &mut TraceContext,
        model: &CBspModel,
        start: &Vec3,
        end: &Vec3,
        bbox: &Aabb,
        contentmask: Contents,
        brushreject: Contents,
        fraction: f32,
    ) -> Trace {
        self.hinted_transformed_box_trace(
            ctx,
            model.tile,
            start,
            end,
            bbox,
            model.headnode as usize,
            contentmask,
            brushreject,
            &model.transform(),
            fraction,
        )
    }

    // ========================================================
    // Entity traces
    // ========================================================

    /// Line test against the world and the listed inline models.
    pub fn ent_test_line(
        &self,
        ctx: &mut TraceContext,
        start: &Vec3,
        stop: &Vec3,
        levelmask: LevelMask,
        list: &[&str],
    ) -> CmResult<bool> {
        if self.test_line(start, stop, levelmask) {
            return Ok(true);
        }

        for entry in self.traceable_models(list) {
            let (_, model) = entry?;
            if line_misses_model(start, stop, model) {
                continue;
            }
            let tr = self.model_trace(ctx, model, start, stop, &Aabb::point(), MASK_VISIBILITY, Contents::empty(), 1.0);
            if tr.startsolid || tr.fraction < 1.0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Like `test_line_dm`, with the listed inline models. Returns the
    /// nearest blocking point.
    pub fn ent_test_line_dm(
        &self,
        ctx: &mut TraceContext,
        start: &Vec3,
        stop: &Vec3,
        levelmask: LevelMask,
        list: &[&str],
    ) -> CmResult<Option<Vec3>> {
        let mut hit = self.test_line_dm(start, stop, levelmask);
        let mut end = hit.unwrap_or(*stop);

        for entry in self.traceable_models(list) {
            let (_, model) = entry?;
            if line_misses_model(start, stop, model) {
                continue;
            }
            let tr = self.model_trace(ctx, model, start, &end, &Aabb::point(), MASK_ALL, Contents::empty(), 1.0);
            if tr.startsolid {
                return Ok(Some(*start));
            }
            // anything left on the shortened line is nearer
            if tr.fraction < 1.0 {
                end = tr.endpos;
                hit = Some(end);
            }
        }
        Ok(hit)
    }

    /// Box trace against the world and the listed inline models. A hit on
    /// an inline model carries the model number.
    pub fn ent_complete_box_trace(
        &self,
        ctx: &mut TraceContext,
        start: &Vec3,
        end: &Vec3,
        bbox: &Aabb,
        levelmask: LevelMask,
        contentmask: Contents,
        brushreject: Contents,
        list: &[&str],
    ) -> CmResult<Trace> {
        let mut trace = self.complete_box_trace(ctx, start, end, bbox, levelmask, contentmask, brushreject);
        if list.is_empty() || trace.fraction == 0.0 {
            return Ok(trace);
        }

        // the whole volume swept by the box
        let mut bmins = [0.0f32; 3];
        let mut bmaxs = [0.0f32; 3];
        for i in 0..3 {
            bmins[i] = start[i].min(end[i]) + bbox.mins[i];
            bmaxs[i] = start[i].max(end[i]) + bbox.maxs[i];
        }

        for entry in self.traceable_models(list) {
            let (num, model) = entry?;
            let (amins, amaxs) = calculate_bounding_box(model);
            if (0..3).any(|i| bmins[i] > amaxs[i] || bmaxs[i] < amins[i]) {
                continue;
            }

            let mut newtr = self.model_trace(ctx, model, start, end, bbox, contentmask, brushreject, trace.fraction);
            newtr.model = Some(num as usize);

            // memorize the trace with the minimal fraction
            if newtr.fraction == 0.0 {
                return Ok(newtr);
            }
            if newtr.fraction < trace.fraction {
                trace = newtr;
            }
        }
        Ok(trace)
    }
}

// ============================================================
// Global singleton
// ============================================================

static MAP_TILES: RwLock<Option<MapTiles>> = parking_lot::const_rwlock(None);

thread_local! {
    static TRACE_CTX: RefCell<TraceContext> = RefCell::new(TraceContext::new());
}

/// Registers the collision model cvars.
pub fn cmodel_init() {
    cvar_init();
    cvar_get("developer", "0", 0);
    cvar_get("cm_maxleafs", "1024", 0);
}

/// Access the loaded map. Returns None if no map is loaded.
pub fn with_map_tiles<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&MapTiles) -> R,
{
    MAP_TILES.read().as_ref().map(f)
}

fn with_trace_ctx<F, R>(f: F) -> R
where
    F: FnOnce(&mut TraceContext) -> R,
{
    TRACE_CTX.with(|ctx| f(&mut ctx.borrow_mut()))
}

/// Replaces the loaded map by the given tiles.
pub fn cm_load_map(tiles: &[(BspLumps, Vec3)]) -> CmResult<()> {
    let mut map = MapTiles::new();
    map.load_tiles(tiles)?;
    *MAP_TILES.write() = Some(map);
    Ok(())
}

pub fn cm_add_map_tile(lumps: &BspLumps, shift: Vec3) -> CmResult<usize> {
    MAP_TILES.write().get_or_insert_with(MapTiles::new).add_tile(lumps, shift)
}

pub fn cm_unload_map() {
    *MAP_TILES.write() = None;
}

pub fn cm_num_tiles() -> usize {
    with_map_tiles(|m| m.num_tiles()).unwrap_or(0)
}

pub fn cm_num_inline_models() -> usize {
    with_map_tiles(|m| m.num_inline_models()).unwrap_or(0)
}

/// Returns a copy of the named inline model.
pub fn cm_inline_model(name: &str) -> CmResult<CBspModel> {
    with_map_tiles(|m| m.inline_model(name).copied()).unwrap_or(Err(CmError::NoMap))
}

pub fn cm_set_inline_model_orientation(name: &str, origin: &Vec3, angles: &Vec3) -> CmResult<()> {
    MAP_TILES
        .write()
        .as_mut()
        .ok_or(CmError::NoMap)?
        .set_inline_model_orientation(name, origin, angles)
}

pub fn cm_test_line(start: &Vec3, stop: &Vec3, levelmask: LevelMask) -> bool {
    with_map_tiles(|m| m.test_line(start, stop, levelmask)).unwrap_or(false)
}

pub fn cm_test_line_dm(start: &Vec3, stop: &Vec3, levelmask: LevelMask) -> Option<Vec3> {
    with_map_tiles(|m| m.test_line_dm(start, stop, levelmask)).flatten()
}

pub fn cm_complete_box_trace(
    start: &Vec3,
    end: &Vec3,
    bbox: &Aabb,
    levelmask: LevelMask,
    contentmask: Contents,
    brushreject: Contents,
) -> Trace {
    with_map_tiles(|m| {
        with_trace_ctx(|ctx| m.complete_box_trace(ctx, start, end, bbox, levelmask, contentmask, brushreject))
    })
    .unwrap_or_else(|| Trace {
        endpos: *end,
        ..Default::default()
    })
}

pub fn cm_ent_complete_box_trace(
    start: &Vec3,
    end: &Vec3,
    bbox: &Aabb,
    levelmask: LevelMask,
    contentmask: Contents,
    brushreject: Contents,
    list: &[&str],
) -> CmResult<Trace> {
    with_map_tiles(|m| {
        with_trace_ctx(|ctx| m.ent_complete_box_trace(ctx, start, end, bbox, levelmask, contentmask, brushreject, list))
    })
    .unwrap_or(Err(CmError::NoMap))
}

// ============================================================
// Tests
// ============================================================
