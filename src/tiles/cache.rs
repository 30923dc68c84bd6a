//! The tile cache: memory, then disk, then network.
//!
//! One cache instance is shared by reference across all render workers.
//! Internal synchronization keeps `fetch` safe to call concurrently; two
//! workers missing on the same key at the same time may both download it,
//! which is an accepted idempotent race (either result may land first).

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tiny_skia::Pixmap;

use crate::foundation::error::{TrackcastError, TrackcastResult};
use crate::tiles::{MapStyle, TILE_SIZE, TileId};

/// Minimum delay between network fetches, globally (~20 requests/sec).
const FETCH_DELAY: Duration = Duration::from_millis(50);
/// Per-request network timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(3);
/// Hard cap on a downloaded tile body.
const MAX_TILE_BYTES: u64 = 8 * 1024 * 1024;

const USER_AGENT: &str = concat!("trackcast/", env!("CARGO_PKG_VERSION"));

/// Everything that shapes tile acquisition for one run.
#[derive(Clone, Debug)]
pub struct TileCacheConfig {
    pub style: MapStyle,
    /// Root of the on-disk cache (`<dir>/<style>/<z>/<x>/<y>.png`).
    pub dir: PathBuf,
    /// Request 512 px tiles and hard-fail on any other size.
    pub hi_res: bool,
    /// Additive brightness in [-1, 1]; 0 is neutral.
    pub brightness: f64,
    /// Multiplicative contrast around mid-gray; 1 is neutral.
    pub contrast: f64,
    /// Never touch the network; a tile absent from memory and disk is a
    /// per-tile error.
    pub offline: bool,
}

/// Shared tile store. Memory hits are lock-then-clone of an [`Arc`];
/// everything slower goes through disk and, unless offline, the network.
pub struct TileCache {
    cfg: TileCacheConfig,
    mem: Mutex<HashMap<TileId, std::sync::Arc<Pixmap>>>,
    agent: ureq::Agent,
    last_fetch: Mutex<Instant>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TileCache {
    pub fn new(cfg: TileCacheConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build();
        Self {
            cfg,
            mem: Mutex::new(HashMap::new()),
            agent,
            last_fetch: Mutex::new(Instant::now() - FETCH_DELAY),
        }
    }

    pub fn config(&self) -> &TileCacheConfig {
        &self.cfg
    }

    /// Edge length every fetched bitmap must have in hi-res mode.
    fn expected_size(&self) -> u32 {
        if self.cfg.hi_res { TILE_SIZE * 2 } else { TILE_SIZE }
    }

    fn disk_path(&self, tile: TileId) -> PathBuf {
        let file = if self.cfg.hi_res {
            format!("{}@2x.png", tile.y)
        } else {
            format!("{}.png", tile.y)
        };
        self.cfg
            .dir
            .join(&self.cfg.style.name)
            .join(tile.z.to_string())
            .join(tile.x.to_string())
            .join(file)
    }

    /// Resolve one tile: memory, then disk, then network. The returned
    /// bitmap already has brightness/contrast applied.
    pub fn fetch(&self, tile: TileId) -> TrackcastResult<std::sync::Arc<Pixmap>> {
        if let Some(img) = lock(&self.mem).get(&tile) {
            return Ok(img.clone());
        }

        let path = self.disk_path(tile);
        let bytes = if path.is_file() {
            std::fs::read(&path).map_err(|e| {
                TrackcastError::tile(format!("reading cached tile {}: {e}", path.display()))
            })?
        } else if self.cfg.offline {
            return Err(TrackcastError::tile(format!(
                "tile {tile:?} not cached and offline mode is on"
            )));
        } else {
            self.download(tile, &path)?
        };

        let mut img = self.decode_validated(&bytes, tile)?;
        self.adjust_brightness_contrast(&mut img);

        let img = std::sync::Arc::new(img);
        lock(&self.mem).insert(tile, img.clone());
        Ok(img)
    }

    /// Warm the cache for a whole tile set with bounded parallelism.
    ///
    /// Individual failures are logged and left for the renderer to blank
    /// out; a hi-res size mismatch means the style cannot serve this run at
    /// all, so it aborts the phase.
    pub fn prefetch(&self, tiles: &std::collections::BTreeSet<TileId>, workers: usize) -> TrackcastResult<()> {
        tracing::info!(tiles = tiles.len(), workers, "prefetching map tiles");
        let queue = Mutex::new(tiles.iter().copied());
        let abort: Mutex<Option<TrackcastError>> = Mutex::new(None);

        std::thread::scope(|s| {
            for _ in 0..workers.max(1) {
                s.spawn(|| {
                    loop {
                        if lock(&abort).is_some() {
                            return;
                        }
                        let Some(tile) = lock(&queue).next() else {
                            return;
                        };
                        match self.fetch(tile) {
                            Ok(_) => {}
                            Err(e @ TrackcastError::TileResolution(_)) => {
                                *lock(&abort) = Some(e);
                                return;
                            }
                            Err(e) => {
                                tracing::warn!(?tile, error = %e, "tile prefetch failed")
                            }
                        }
                    }
                });
            }
        });

        match abort.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Download one tile body, honoring the global inter-request delay, and
    /// persist the re-encoded PNG at `path` before returning the raw bytes.
    fn download(&self, tile: TileId, path: &Path) -> TrackcastResult<Vec<u8>> {
        self.throttle();

        let url = self.cfg.style.tile_url(tile, self.cfg.hi_res);
        let mut req = self.agent.get(&url);
        for (k, v) in &self.cfg.style.headers {
            req = req.set(k, v);
        }

        let resp = match req.call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(404, _)) if self.cfg.hi_res => {
                return Err(TrackcastError::tile_resolution(format!(
                    "style '{}' has no high-resolution tile at {url} (404)",
                    self.cfg.style.name
                )));
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(TrackcastError::tile(format!("{url}: status {code}")));
            }
            Err(e) => {
                return Err(TrackcastError::tile(format!("{url}: {e}")));
            }
        };

        let mut bytes = Vec::new();
        resp.into_reader()
            .take(MAX_TILE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| TrackcastError::tile(format!("{url}: {e}")))?;

        // Validate before persisting so a mis-sized tile never poisons the
        // disk cache; persist as PNG regardless of the wire format.
        let img = self.decode_validated(&bytes, tile)?;
        let png = img
            .encode_png()
            .map_err(|e| TrackcastError::tile(format!("re-encoding tile {tile:?}: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrackcastError::tile(format!("{}: {e}", parent.display())))?;
        }
        std::fs::write(path, &png)
            .map_err(|e| TrackcastError::tile(format!("{}: {e}", path.display())))?;

        Ok(bytes)
    }

    fn throttle(&self) {
        let mut last = lock(&self.last_fetch);
        let elapsed = last.elapsed();
        if elapsed < FETCH_DELAY {
            std::thread::sleep(FETCH_DELAY - elapsed);
        }
        *last = Instant::now();
    }

    fn decode_validated(&self, bytes: &[u8], tile: TileId) -> TrackcastResult<Pixmap> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| TrackcastError::tile(format!("decoding tile {tile:?}: {e}")))?
            .to_rgba8();
        let (w, h) = img.dimensions();

        let want = self.expected_size();
        if self.cfg.hi_res && (w != want || h != want) {
            return Err(TrackcastError::tile_resolution(format!(
                "style '{}' does not serve high-resolution tiles: got {w}x{h}, want {want}x{want}",
                self.cfg.style.name
            )));
        }

        let mut pixmap = Pixmap::new(w, h)
            .ok_or_else(|| TrackcastError::tile(format!("tile {tile:?} decoded to zero size")))?;
        for (dst, px) in pixmap.pixels_mut().iter_mut().zip(img.pixels()) {
            let [r, g, b, a] = px.0;
            *dst = tiny_skia::ColorU8::from_rgba(r, g, b, a).premultiply();
        }
        Ok(pixmap)
    }

    fn adjust_brightness_contrast(&self, img: &mut Pixmap) {
        let brightness = self.cfg.brightness;
        let contrast = self.cfg.contrast;
        if brightness == 0.0 && contrast == 1.0 {
            return;
        }

        let channel = |c: u8| -> u8 {
            let v = f64::from(c) + brightness * 255.0;
            let v = (v - 128.0) * contrast + 128.0;
            v.clamp(0.0, 255.0) as u8
        };
        for px in img.pixels_mut() {
            let c = px.demultiply();
            *px = tiny_skia::ColorU8::from_rgba(
                channel(c.red()),
                channel(c.green()),
                channel(c.blue()),
                c.alpha(),
            )
            .premultiply();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::resolve_style;

    fn offline_cache(dir: &Path, hi_res: bool) -> TileCache {
        TileCache::new(TileCacheConfig {
            style: resolve_style("default").unwrap(),
            dir: dir.to_path_buf(),
            hi_res,
            brightness: 0.0,
            contrast: 1.0,
            offline: true,
        })
    }

    fn write_tile(cache: &TileCache, tile: TileId, size: u32, color: tiny_skia::Color) {
        let mut img = Pixmap::new(size, size).unwrap();
        img.fill(color);
        let path = cache.disk_path(tile);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, img.encode_png().unwrap()).unwrap();
    }

    #[test]
    fn disk_hits_are_idempotent_offline() {
        let dir = tempfile::tempdir().unwrap();
        let cache = offline_cache(dir.path(), false);
        let tile = TileId { z: 3, x: 4, y: 5 };
        write_tile(&cache, tile, TILE_SIZE, tiny_skia::Color::from_rgba8(10, 20, 30, 255));

        let first = cache.fetch(tile).unwrap();
        let second = cache.fetch(tile).unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(first.data(), second.data());
        assert_eq!(first.width(), TILE_SIZE);
    }

    #[test]
    fn offline_miss_is_a_per_tile_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = offline_cache(dir.path(), false);
        let err = cache.fetch(TileId { z: 3, x: 4, y: 5 }).unwrap_err();
        assert!(matches!(err, TrackcastError::Tile(_)));
    }

    #[test]
    fn hi_res_size_mismatch_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = offline_cache(dir.path(), true);
        let tile = TileId { z: 3, x: 4, y: 5 };
        // A 256 px tile on disk where a 512 px one is required.
        write_tile(&cache, tile, TILE_SIZE, tiny_skia::Color::WHITE);

        let err = cache.fetch(tile).unwrap_err();
        assert!(matches!(err, TrackcastError::TileResolution(_)));
    }

    #[test]
    fn prefetch_aborts_on_resolution_mismatch_but_tolerates_misses() {
        let dir = tempfile::tempdir().unwrap();

        // Missing tiles offline: logged, not fatal.
        let cache = offline_cache(dir.path(), false);
        let mut tiles = std::collections::BTreeSet::new();
        tiles.insert(TileId { z: 3, x: 4, y: 5 });
        tiles.insert(TileId { z: 3, x: 4, y: 6 });
        assert!(cache.prefetch(&tiles, 4).is_ok());

        // A mis-sized hi-res tile: the whole phase fails.
        let cache = offline_cache(dir.path(), true);
        write_tile(&cache, TileId { z: 3, x: 4, y: 5 }, TILE_SIZE, tiny_skia::Color::WHITE);
        let err = cache.prefetch(&tiles, 4).unwrap_err();
        assert!(matches!(err, TrackcastError::TileResolution(_)));
    }

    #[test]
    fn brightness_and_contrast_apply_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = offline_cache(dir.path(), false).cfg;
        cfg.brightness = 0.2;
        cfg.contrast = 1.0;
        let cache = TileCache::new(cfg);

        let tile = TileId { z: 1, x: 0, y: 0 };
        write_tile(&cache, tile, TILE_SIZE, tiny_skia::Color::from_rgba8(100, 100, 100, 255));

        let img = cache.fetch(tile).unwrap();
        let px = img.pixels()[0].demultiply();
        // 100 + 0.2 * 255 = 151.
        assert_eq!(px.red(), 151);
        assert_eq!(px.alpha(), 255);
    }
}
