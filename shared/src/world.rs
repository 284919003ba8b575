//! World geometry provider: tile walkability, building AABBs and plot records.

use crate::protocol::PlotRecord;
use log::info;
use std::path::Path;
use thiserror::Error;

pub const TILE_SIZE: f32 = 16.0;

const DEFAULT_COLS: usize = 64;
const DEFAULT_ROWS: usize = 48;

/// Geometry queries consumed by the movement integrator.
pub trait WorldQuery {
    fn width_px(&self) -> f32;
    fn height_px(&self) -> f32;
    /// Whether the terrain under the point can be walked on.
    fn is_walkable(&self, x: f32, y: f32) -> bool;
    /// Whether the rectangle overlaps any building.
    fn building_blocks(&self, x: f32, y: f32, w: f32, h: f32) -> bool;
}

/// Land plots announced to clients once, on their first packet.
pub trait PlotSource {
    fn plots(&self) -> &[PlotRecord];
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("failed to read world file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("world has no tile rows")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Grass,
    Path,
    Water,
    Rock,
}

impl Tile {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(Tile::Grass),
            ',' => Some(Tile::Path),
            '~' => Some(Tile::Water),
            '#' => Some(Tile::Rock),
            _ => None,
        }
    }

    pub fn walkable(self) -> bool {
        matches!(self, Tile::Grass | Tile::Path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Aabb {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn intersects(&self, x: f32, y: f32, w: f32, h: f32) -> bool {
        !(x + w <= self.x || self.x + self.w <= x || y + h <= self.y || self.y + self.h <= y)
    }
}

#[derive(Debug, Clone)]
pub struct TileWorld {
    cols: usize,
    rows: usize,
    tiles: Vec<Tile>,
    buildings: Vec<Aabb>,
    plots: Vec<PlotRecord>,
}

impl TileWorld {
    pub fn new(cols: usize, rows: usize, tiles: Vec<Tile>) -> Self {
        debug_assert_eq!(tiles.len(), cols * rows);
        Self {
            cols,
            rows,
            tiles,
            buildings: Vec::new(),
            plots: Vec::new(),
        }
    }

    /// Open grass field of `cols` x `rows` tiles.
    pub fn open(cols: usize, rows: usize) -> Self {
        Self::new(cols, rows, vec![Tile::Grass; cols * rows])
    }

    /// The built-in map used when no world file is given.
    pub fn builtin() -> Self {
        let mut world = Self::open(DEFAULT_COLS, DEFAULT_ROWS);
        for row in 10..14 {
            for col in 20..26 {
                world.set_tile(col, row, Tile::Water);
            }
        }
        for col in 0..DEFAULT_COLS {
            world.set_tile(col, 30, Tile::Path);
        }
        world.add_building(Aabb::new(320.0, 64.0, 96.0, 64.0));
        world.add_building(Aabb::new(640.0, 320.0, 128.0, 96.0));
        world.add_plot(PlotRecord {
            plot_id: 1,
            tile_x: 4,
            tile_y: 34,
            width: 6,
            height: 6,
            owner: PlotRecord::pack_text("unclaimed"),
            label: PlotRecord::pack_text("meadow"),
        });
        world
    }

    pub fn load(path: &Path) -> Result<Self, WorldError> {
        let text = std::fs::read_to_string(path)?;
        let world = Self::parse(&text)?;
        info!(
            "Loaded world {} ({}x{} tiles, {} buildings, {} plots)",
            path.display(),
            world.cols,
            world.rows,
            world.buildings.len(),
            world.plots.len()
        );
        Ok(world)
    }

    /// Parses the ASCII world format.
    ///
    /// Tile rows use `.` grass, `,` path, `~` water and `#` rock. Directive
    /// lines are `building <x> <y> <w> <h>` in pixels and
    /// `plot <id> <tile_x> <tile_y> <w> <h> <owner> <label...>`. Lines starting
    /// with `;` are comments.
    pub fn parse(text: &str) -> Result<Self, WorldError> {
        let mut rows: Vec<Vec<Tile>> = Vec::new();
        let mut buildings = Vec::new();
        let mut plots = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            let parse_err = |message: String| WorldError::Parse {
                line: line_no,
                message,
            };

            if let Some(rest) = line.strip_prefix("building ") {
                let nums = parse_numbers::<f32>(rest, 4).map_err(parse_err)?;
                buildings.push(Aabb::new(nums[0], nums[1], nums[2], nums[3]));
            } else if let Some(rest) = line.strip_prefix("plot ") {
                plots.push(parse_plot(rest).map_err(parse_err)?);
            } else {
                let row = line
                    .chars()
                    .map(|c| Tile::from_char(c).ok_or_else(|| format!("unknown tile '{}'", c)))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(parse_err)?;
                if let Some(first) = rows.first() {
                    if first.len() != row.len() {
                        return Err(parse_err(format!(
                            "row has {} tiles, expected {}",
                            row.len(),
                            first.len()
                        )));
                    }
                }
                rows.push(row);
            }
        }

        let cols = rows.first().map(|r| r.len()).ok_or(WorldError::Empty)?;
        let row_count = rows.len();
        let mut world = Self::new(cols, row_count, rows.into_iter().flatten().collect());
        world.buildings = buildings;
        world.plots = plots;
        Ok(world)
    }

    pub fn set_tile(&mut self, col: usize, row: usize, tile: Tile) {
        if col < self.cols && row < self.rows {
            self.tiles[row * self.cols + col] = tile;
        }
    }

    pub fn tile_at(&self, x: f32, y: f32) -> Option<Tile> {
        if !(x >= 0.0 && y >= 0.0) {
            return None;
        }
        let col = (x / TILE_SIZE) as usize;
        let row = (y / TILE_SIZE) as usize;
        if col >= self.cols || row >= self.rows {
            return None;
        }
        Some(self.tiles[row * self.cols + col])
    }

    pub fn add_building(&mut self, building: Aabb) {
        self.buildings.push(building);
    }

    pub fn add_plot(&mut self, plot: PlotRecord) {
        self.plots.push(plot);
    }

    pub fn buildings(&self) -> &[Aabb] {
        &self.buildings
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }
}

impl WorldQuery for TileWorld {
    fn width_px(&self) -> f32 {
        self.cols as f32 * TILE_SIZE
    }

    fn height_px(&self) -> f32 {
        self.rows as f32 * TILE_SIZE
    }

    fn is_walkable(&self, x: f32, y: f32) -> bool {
        self.tile_at(x, y).is_some_and(Tile::walkable)
    }

    fn building_blocks(&self, x: f32, y: f32, w: f32, h: f32) -> bool {
        self.buildings.iter().any(|b| b.intersects(x, y, w, h))
    }
}

impl PlotSource for TileWorld {
    fn plots(&self) -> &[PlotRecord] {
        &self.plots
    }
}

fn parse_numbers<T: std::str::FromStr>(text: &str, count: usize) -> Result<Vec<T>, String> {
    let values = text
        .split_whitespace()
        .map(|s| s.parse::<T>().map_err(|_| format!("invalid number '{}'", s)))
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != count {
        return Err(format!("expected {} numbers, found {}", count, values.len()));
    }
    Ok(values)
}

fn parse_plot(text: &str) -> Result<PlotRecord, String> {
    let mut parts = text.split_whitespace();
    let mut next_field = |name: &str| parts.next().ok_or_else(|| format!("missing {}", name));

    let plot_id = next_field("plot id")?
        .parse::<u32>()
        .map_err(|e| e.to_string())?;
    let mut dims = [0u16; 4];
    for (slot, name) in dims.iter_mut().zip(["tile_x", "tile_y", "width", "height"]) {
        *slot = next_field(name)?.parse::<u16>().map_err(|e| e.to_string())?;
    }
    let owner = next_field("owner")?.to_string();
    let label = parts.collect::<Vec<_>>().join(" ");

    Ok(PlotRecord {
        plot_id,
        tile_x: dims[0],
        tile_y: dims[1],
        width: dims[2],
        height: dims[3],
        owner: PlotRecord::pack_text(&owner),
        label: PlotRecord::pack_text(&label),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
; tiny test map
building 16 0 16 16
plot 7 0 1 2 1 bob.eth north field
....
.~..
....
";

    #[test]
    fn test_parse_sample_world() {
        let world = TileWorld::parse(SAMPLE).unwrap();
        assert_eq!(world.dimensions(), (4, 3));
        assert_eq!(world.width_px(), 64.0);
        assert_eq!(world.height_px(), 48.0);
        assert_eq!(world.buildings().len(), 1);
        assert_eq!(world.plots()[0].plot_id, 7);
        assert_eq!(world.plots()[0].owner_str(), "bob.eth");
        assert_eq!(world.plots()[0].label_str(), "north field");
    }

    #[test]
    fn test_walkability() {
        let world = TileWorld::parse(SAMPLE).unwrap();
        assert!(world.is_walkable(0.0, 0.0));
        assert!(!world.is_walkable(20.0, 20.0));
        assert!(!world.is_walkable(-0.5, 0.0));
        assert!(!world.is_walkable(64.0, 0.0));
        assert!(!world.is_walkable(f32::NAN, 0.0));
    }

    #[test]
    fn test_building_overlap_is_exclusive_at_edges() {
        let world = TileWorld::parse(SAMPLE).unwrap();
        assert!(world.building_blocks(16.0, 0.0, 1.0, 1.0));
        assert!(!world.building_blocks(15.0, 0.0, 1.0, 1.0));
        assert!(!world.building_blocks(32.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(TileWorld::parse(""), Err(WorldError::Empty)));
        assert!(matches!(
            TileWorld::parse("...\n.."),
            Err(WorldError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            TileWorld::parse("..x"),
            Err(WorldError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            TileWorld::parse("building 1 2 3\n..."),
            Err(WorldError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_builtin_origin_is_clear() {
        let world = TileWorld::builtin();
        assert!(world.is_walkable(0.0, 0.0));
        assert!(world.is_walkable(31.0, 15.0));
        assert!(!world.building_blocks(0.0, 0.0, 32.0, 16.0));
    }
}
