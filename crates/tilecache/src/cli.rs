//! CLI argument helpers and output formatters

use anyhow::{bail, Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};
use tilecache_core::cache::{CacheStats, MapTileSummary};
use tilecache_core::plan::format_bytes;
use tilecache_core::{DownloadPlan, Extent, SavedMapSummary};

// ============================================================================
// Argument Parsing
// ============================================================================

/// Parse an extent given as `left,bottom,right,top`
pub fn parse_extent(s: &str) -> Result<Extent> {
    let values = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid extent value '{}'", part.trim()))
        })
        .collect::<Result<Vec<f64>>>()?;

    let [left, bottom, right, top] = values[..] else {
        bail!(
            "Extent needs 4 values (left,bottom,right,top), got {}",
            values.len()
        );
    };

    let extent = Extent::new(left, bottom, right, top);
    if !extent.is_valid() {
        bail!("Extent {} is not an ordered rectangle", s);
    }
    Ok(extent)
}

// ============================================================================
// Formatters
// ============================================================================

fn header(table: &mut Table, columns: &[&str], no_color: bool) {
    if no_color {
        table.set_header(columns.to_vec());
    } else {
        table.set_header(
            columns
                .iter()
                .map(|c| Cell::new(c).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    }
}

/// Format saved maps as table (human) or JSON
pub fn format_maps_table(maps: &[SavedMapSummary], json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(maps).unwrap_or_else(|_| "[]".to_string());
    }

    if maps.is_empty() {
        return "No saved maps.".to_string();
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    header(
        &mut table,
        &["Name", "Zoom", "Tiles", "Cached", "Saved", "Centre"],
        no_color,
    );

    for map in maps {
        let details = &map.details;
        table.add_row(Row::from(vec![
            map.name.clone(),
            format!("{}-{}", details.min_zoom, details.max_zoom),
            details.tile_count.to_string(),
            map.cached_tiles.to_string(),
            details.saved_at.format("%Y-%m-%d %H:%M").to_string(),
            format!("{:.0}, {:.0}", details.poi.x, details.poi.y),
        ]));
    }

    table.to_string()
}

/// Format cache statistics with the per-map breakdown
pub fn format_stats(
    stats: &CacheStats,
    summaries: &[MapTileSummary],
    json: bool,
    no_color: bool,
) -> String {
    if json {
        let value = serde_json::json!({
            "stats": stats,
            "maps": summaries,
        });
        return serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string());
    }

    let mut lines = vec![
        format!("Tiles:            {}", stats.total_tiles),
        format!(
            "Payload:          {}",
            format_bytes(stats.total_payload_bytes as u64)
        ),
        format!("Maps:             {}", stats.map_count),
    ];

    if !summaries.is_empty() {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        header(&mut table, &["Map", "Tiles", "Payload"], no_color);
        for summary in summaries {
            table.add_row(Row::from(vec![
                summary.map_name.clone(),
                summary.tile_count.to_string(),
                format_bytes(summary.payload_bytes as u64),
            ]));
        }
        lines.push(String::new());
        lines.push(table.to_string());
    }

    lines.join("\n")
}

/// Describe a download plan, one line per zoom level
pub fn format_plan(plan: &DownloadPlan) -> String {
    let mut lines = vec![format!(
        "Map '{}': {} tiles, about {}",
        plan.map_name,
        plan.tile_count,
        format_bytes(plan.estimated_bytes)
    )];

    for range in &plan.ranges {
        lines.push(format!(
            "  z{:<3} columns {}-{}  rows {}-{}  ({} tiles)",
            range.zoom,
            range.min_column,
            range.max_column,
            range.min_row,
            range.max_row,
            range.tile_count()
        ));
    }

    if let Some(first) = plan.requests().next() {
        lines.push(format!("  first tile: {}", first.url));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tilecache_core::{MapPoint, SavedMapDetails, TileGrid};

    #[test]
    fn test_parse_extent() {
        let extent = parse_extent("322499.9, 676321.0,323715.9,677925.0").unwrap();
        assert_eq!(extent.left, 322_499.9);
        assert_eq!(extent.top, 677_925.0);
    }

    #[test]
    fn test_parse_extent_invalid() {
        assert!(parse_extent("1,2,3").is_err());
        assert!(parse_extent("1,2,x,4").is_err());
        assert!(parse_extent("10,0,0,10").is_err());
    }

    #[test]
    fn test_format_maps_table_empty() {
        assert_eq!(format_maps_table(&[], false, true), "No saved maps.");
        assert_eq!(format_maps_table(&[], true, true), "[]");
    }

    #[test]
    fn test_format_maps_table() {
        let maps = vec![SavedMapSummary {
            name: "name-name".to_string(),
            details: SavedMapDetails {
                poi: MapPoint { x: 1.0, y: 2.0 },
                extent: Extent::new(0.0, 0.0, 2.0, 4.0),
                min_zoom: 8,
                max_zoom: 9,
                tile_count: 29,
                saved_at: Utc::now(),
            },
            cached_tiles: 28,
        }];

        let table = format_maps_table(&maps, false, true);
        assert!(table.contains("name-name"));
        assert!(table.contains("8-9"));

        let json = format_maps_table(&maps, true, true);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["cached_tiles"], 28);
    }

    #[test]
    fn test_format_stats_json() {
        let stats = CacheStats {
            total_tiles: 3,
            total_payload_bytes: 30,
            map_count: 1,
        };
        let summaries = vec![MapTileSummary {
            map_name: "m".to_string(),
            tile_count: 3,
            payload_bytes: 30,
        }];

        let parsed: serde_json::Value =
            serde_json::from_str(&format_stats(&stats, &summaries, true, true)).unwrap();
        assert_eq!(parsed["stats"]["total_tiles"], 3);
        assert_eq!(parsed["maps"][0]["map_name"], "m");

        let text = format_stats(&stats, &summaries, false, true);
        assert!(text.contains("Tiles:            3"));
    }

    #[test]
    fn test_format_plan() {
        let plan = DownloadPlan::build(
            "m",
            &TileGrid::default(),
            Extent::new(0.0, 0.0, 1000.0, 1000.0),
            10,
            10,
            "http://t",
            "png",
            1024,
        )
        .unwrap();

        let text = format_plan(&plan);
        assert!(text.starts_with("Map 'm': 16 tiles"));
        assert!(text.contains("first tile: http://t/10/0/0.png"));
    }
}
