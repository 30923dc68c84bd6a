//! Map tiles: identity, style registry and track coverage.
//!
//! A tile is a square raster image addressed by (x, y, zoom) in the standard
//! web-map scheme. Styles map that address to a provider URL; the caches in
//! [`cache`] and [`scaled`] own the fetched bitmaps.

pub mod cache;
pub mod scaled;

use std::collections::BTreeSet;

use crate::foundation::error::{TrackcastError, TrackcastResult};
use crate::geo;
use crate::telemetry::TrackPoint;

/// Base tile edge in pixels; high-resolution tiles are exactly double.
pub const TILE_SIZE: u32 = 256;

/// Web-map tile address. `x`/`y` are signed: coverage boxes near the
/// antimeridian or the poles can step outside the nominal grid, and such
/// tiles simply fail to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId {
    pub z: u32,
    pub x: i32,
    pub y: i32,
}

/// A named tile provider: a URL template with `{z}`/`{x}`/`{y}` holes and
/// optional fixed request headers.
#[derive(Clone, Debug)]
pub struct MapStyle {
    pub name: String,
    pub url_template: String,
    pub headers: Vec<(String, String)>,
}

impl MapStyle {
    /// Fill the URL template for one tile. High-resolution mode rewrites the
    /// `.png` suffix to the conventional `@2x.png`.
    pub fn tile_url(&self, tile: TileId, hi_res: bool) -> String {
        let mut url = self
            .url_template
            .replacen("{z}", &tile.z.to_string(), 1)
            .replacen("{x}", &tile.x.to_string(), 1)
            .replacen("{y}", &tile.y.to_string(), 1);
        if hi_res {
            url = url.replacen(".png", "@2x.png", 1);
        }
        url
    }
}

/// Look up a built-in style by name, or treat a string containing `{z}` as a
/// custom URL template.
pub fn resolve_style(name: &str) -> TrackcastResult<MapStyle> {
    let style = |name: &str, url: &str, headers: &[(&str, &str)]| MapStyle {
        name: name.to_string(),
        url_template: url.to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    };

    match name {
        "default" => Ok(style(
            "default",
            "https://tile.openstreetmap.org/{z}/{x}/{y}.png",
            &[],
        )),
        "cyclosm" => Ok(style(
            "cyclosm",
            "https://c.tile-cyclosm.openstreetmap.fr/cyclosm/{z}/{x}/{y}.png",
            &[],
        )),
        "toner" => Ok(style(
            "toner",
            "https://tiles.stadiamaps.com/tiles/stamen_toner/{z}/{x}/{y}.png",
            &[("Referer", "https://mc.bbbike.org/")],
        )),
        "positron" => Ok(style(
            "positron",
            "https://d.basemaps.cartocdn.com/light_all/{z}/{x}/{y}.png",
            &[],
        )),
        custom if custom.contains("{z}") => Ok(style("custom", custom, &[])),
        other => Err(TrackcastError::config(format!(
            "unknown map style '{other}' (and not a URL template)"
        ))),
    }
}

/// Every tile the circular widget can touch anywhere along the track, at
/// each point's own effective zoom. The set is ordered, so prefetch walks
/// tiles in a deterministic, spatially coherent order.
pub fn tiles_for_track(
    points: &[TrackPoint],
    widget_size: u32,
    tile_size: u32,
) -> BTreeSet<TileId> {
    let mut tiles = BTreeSet::new();
    let widget_radius = f64::from(widget_size) / 2.0;

    for p in points {
        let radius_px = widget_radius * p.residual_scale;
        let (tx, ty) = geo::tile_coords(p.lat, p.lon, p.tile_zoom);
        let world_x = tx * f64::from(tile_size);
        let world_y = ty * f64::from(tile_size);

        let x_min = ((world_x - radius_px) / f64::from(tile_size)).floor() as i32;
        let x_max = ((world_x + radius_px) / f64::from(tile_size)).floor() as i32;
        let y_min = ((world_y - radius_px) / f64::from(tile_size)).floor() as i32;
        let y_max = ((world_y + radius_px) / f64::from(tile_size)).floor() as i32;

        for x in x_min..=x_max {
            for y in y_min..=y_max {
                tiles.insert(TileId { z: p.tile_zoom, x, y });
            }
        }
    }

    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_registry_resolves_and_rejects() {
        assert_eq!(resolve_style("default").unwrap().name, "default");
        assert_eq!(resolve_style("positron").unwrap().name, "positron");
        assert!(!resolve_style("toner").unwrap().headers.is_empty());
        assert!(resolve_style("no-such-style").is_err());

        let custom = resolve_style("https://example.org/{z}/{x}/{y}.png").unwrap();
        assert_eq!(custom.name, "custom");
    }

    #[test]
    fn tile_url_substitutes_once_and_rewrites_2x() {
        let style = resolve_style("default").unwrap();
        let tile = TileId { z: 15, x: 17000, y: 11000 };
        assert_eq!(
            style.tile_url(tile, false),
            "https://tile.openstreetmap.org/15/17000/11000.png"
        );
        assert_eq!(
            style.tile_url(tile, true),
            "https://tile.openstreetmap.org/15/17000/11000@2x.png"
        );
    }

    #[test]
    fn coverage_includes_every_tile_under_the_widget() {
        // One point dead center of a tile, widget smaller than the tile:
        // exactly that tile plus nothing else at scale 1.
        let mut p = crate::telemetry::TrackPoint::test_default();
        p.tile_zoom = 15;
        let tiles = tiles_for_track(&[p], 200, TILE_SIZE);
        // Lat/lon 0,0 sits on a 4-tile corner, so the box spans 2x2.
        assert_eq!(tiles.len(), 4);
        assert!(tiles.contains(&TileId { z: 15, x: 16384, y: 16384 }));
        assert!(tiles.contains(&TileId { z: 15, x: 16383, y: 16383 }));
    }

    #[test]
    fn coverage_grows_with_residual_scale() {
        let mut p = crate::telemetry::TrackPoint::test_default();
        p.tile_zoom = 15;
        let base = tiles_for_track(&[p], 400, TILE_SIZE).len();
        p.residual_scale = 1.9;
        let scaled = tiles_for_track(&[p], 400, TILE_SIZE).len();
        assert!(scaled > base, "{scaled} <= {base}");
    }
}
