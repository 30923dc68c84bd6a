//! Pre-scaled tile bitmaps for the camera scales the track actually uses.
//!
//! Rescaling every visible tile on every frame is the dominant cost when a
//! track adjustment holds a fractional scale for minutes. This cache is
//! built once, single-threaded, before rendering starts and is read-only
//! afterwards: for each distinct residual scale it stores a shrunk copy of
//! every tile the track can touch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};

use crate::tiles::TileId;
use crate::tiles::cache::TileCache;

/// Lookup tolerance on the residual scale.
const SCALE_EPSILON: f64 = 0.01;

struct ScaleEntry {
    residual_scale: f64,
    tiles: HashMap<TileId, Arc<Pixmap>>,
}

/// Read-only set of pre-scaled tiles, keyed by quantized residual scale.
#[derive(Default)]
pub struct ScaledTileCache {
    entries: Vec<ScaleEntry>,
}

impl ScaledTileCache {
    /// Pre-scale `tiles` for every distinct scale in `scales`.
    ///
    /// Each scale is first decomposed the same way the telemetry processor
    /// does, so the key is the residual in [1, 2). Residuals within 1% of
    /// 1.0 need no pre-scaling; duplicates within the lookup tolerance are
    /// built once. Tiles that cannot be fetched are skipped with a warning
    /// (the base cache will be asked again at render time).
    pub fn build(cache: &TileCache, tiles: &BTreeSet<TileId>, scales: &[f64]) -> Self {
        let mut out = Self::default();

        for &scale in scales {
            let zoom_out = if scale > 1.0 { scale.log2().floor() } else { 0.0 };
            let residual = scale / 2f64.powf(zoom_out);
            let factor = 1.0 / residual;
            if (factor - 1.0).abs() < SCALE_EPSILON {
                continue;
            }
            if out.entry_for(residual).is_some() {
                continue;
            }

            tracing::info!(residual, factor, tiles = tiles.len(), "pre-scaling tiles");
            let mut scaled = HashMap::with_capacity(tiles.len());
            for &tile in tiles {
                let base = match cache.fetch(tile) {
                    Ok(img) => img,
                    Err(e) => {
                        tracing::warn!(?tile, error = %e, "skipping tile during pre-scale");
                        continue;
                    }
                };
                if let Some(img) = rescale(&base, factor) {
                    scaled.insert(tile, Arc::new(img));
                }
            }
            out.entries.push(ScaleEntry {
                residual_scale: residual,
                tiles: scaled,
            });
        }

        out
    }

    /// The pre-scaled bitmap for `tile` at `residual_scale`, if this exact
    /// scale (within tolerance) was built.
    pub fn lookup(&self, residual_scale: f64, tile: TileId) -> Option<Arc<Pixmap>> {
        self.entry_for(residual_scale)
            .and_then(|e| e.tiles.get(&tile).cloned())
    }

    /// True when `residual_scale` has a pre-built entry at all.
    pub fn covers(&self, residual_scale: f64) -> bool {
        self.entry_for(residual_scale).is_some()
    }

    fn entry_for(&self, residual_scale: f64) -> Option<&ScaleEntry> {
        self.entries
            .iter()
            .find(|e| (e.residual_scale - residual_scale).abs() < SCALE_EPSILON)
    }
}

/// Shrink a tile by `factor` (in (0, 1]) with bilinear filtering.
fn rescale(src: &Pixmap, factor: f64) -> Option<Pixmap> {
    let w = (f64::from(src.width()) * factor) as u32;
    let h = (f64::from(src.height()) * factor) as u32;
    let mut dst = Pixmap::new(w.max(1), h.max(1))?;
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    dst.draw_pixmap(
        0,
        0,
        src.as_ref(),
        &paint,
        Transform::from_scale(factor as f32, factor as f32),
        None,
    );
    Some(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::cache::TileCacheConfig;
    use crate::tiles::{TILE_SIZE, resolve_style};

    fn seeded_cache(dir: &std::path::Path, tile: TileId) -> TileCache {
        let cache = TileCache::new(TileCacheConfig {
            style: resolve_style("default").unwrap(),
            dir: dir.to_path_buf(),
            hi_res: false,
            brightness: 0.0,
            contrast: 1.0,
            offline: true,
        });
        let mut img = Pixmap::new(TILE_SIZE, TILE_SIZE).unwrap();
        img.fill(tiny_skia::Color::from_rgba8(200, 50, 50, 255));
        let path = dir
            .join("default")
            .join(tile.z.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.png", tile.y));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, img.encode_png().unwrap()).unwrap();
        cache
    }

    #[test]
    fn builds_shrunk_tiles_for_fractional_scales() {
        let dir = tempfile::tempdir().unwrap();
        let tile = TileId { z: 10, x: 1, y: 2 };
        let cache = seeded_cache(dir.path(), tile);
        let mut tiles = BTreeSet::new();
        tiles.insert(tile);

        // Scale 3.0 decomposes to residual 1.5, factor 1/1.5.
        let scaled = ScaledTileCache::build(&cache, &tiles, &[3.0]);
        assert!(scaled.covers(1.5));
        let img = scaled.lookup(1.5, tile).unwrap();
        assert_eq!(img.width(), (f64::from(TILE_SIZE) / 1.5) as u32);

        // Lookup tolerance.
        assert!(scaled.lookup(1.505, tile).is_some());
        assert!(scaled.lookup(1.52, tile).is_none());
    }

    #[test]
    fn near_unity_scales_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let tile = TileId { z: 10, x: 1, y: 2 };
        let cache = seeded_cache(dir.path(), tile);
        let mut tiles = BTreeSet::new();
        tiles.insert(tile);

        // 1.0 exactly and 2.0 (residual 1.0) both need no resampling.
        let scaled = ScaledTileCache::build(&cache, &tiles, &[1.0, 2.0, 1.005]);
        assert!(!scaled.covers(1.0));
        assert!(scaled.lookup(1.0, tile).is_none());
    }

    #[test]
    fn duplicate_scales_build_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let tile = TileId { z: 10, x: 1, y: 2 };
        let cache = seeded_cache(dir.path(), tile);
        let mut tiles = BTreeSet::new();
        tiles.insert(tile);

        let scaled = ScaledTileCache::build(&cache, &tiles, &[1.5, 3.0, 1.502]);
        assert_eq!(scaled.entries.len(), 1);
    }
}
