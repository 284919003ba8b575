use crate::peers::PeerMap;
use macroquad::prelude::*;
use shared::protocol::PlotRecord;
use shared::world::{Tile, TileWorld, TILE_SIZE};
use shared::{Direction, Vector2, WorldQuery, PLAYER_SIZE};

/// Per-frame values shown in the HUD
#[derive(Debug, Clone)]
pub struct UiConfig {
    pub session_id: u32,
    pub pending_moves: usize,
    pub peer_count: usize,
    pub plot_count: usize,
}

pub struct Renderer {
    offset: Vec2,
}

impl Renderer {
    pub fn new() -> Self {
        Renderer { offset: Vec2::ZERO }
    }

    pub fn render(
        &mut self,
        world: &TileWorld,
        plots: &[PlotRecord],
        local: Option<(Vector2, Direction)>,
        peers: &PeerMap,
        now_ns: i64,
        config: UiConfig,
    ) {
        clear_background(Color::from_rgba(26, 26, 26, 255));

        if let Some((pos, _)) = local {
            self.follow(world, pos);
        }

        self.draw_tiles(world);
        self.draw_buildings(world);
        self.draw_plots(plots);

        for (&session_id, peer) in peers {
            let color = if peer.is_animating(now_ns) {
                Color::from_rgba(255, 120, 120, 255)
            } else {
                Color::from_rgba(255, 68, 68, 255)
            };
            self.draw_player(peer.pos, color);
            self.draw_facing(peer.pos, peer.dir);
            self.draw_player_id(peer.pos, session_id);
        }

        if let Some((pos, dir)) = local {
            self.draw_player(pos, GREEN);
            self.draw_facing(pos, dir);
            self.draw_player_id(pos, config.session_id);
        }

        self.draw_ui(config);
    }

    /// Centres the view on `pos` without showing space outside the world.
    fn follow(&mut self, world: &TileWorld, pos: Vector2) {
        let axis = |p: f32, screen: f32, extent: f32| {
            if extent <= screen {
                0.0
            } else {
                (p + PLAYER_SIZE / 2.0 - screen / 2.0).clamp(0.0, extent - screen)
            }
        };
        self.offset = vec2(
            axis(pos.x, screen_width(), world.width_px()),
            axis(pos.y, screen_height(), world.height_px()),
        );
    }

    fn to_screen(&self, x: f32, y: f32) -> (f32, f32) {
        (x - self.offset.x, y - self.offset.y)
    }

    fn draw_tiles(&self, world: &TileWorld) {
        let (cols, rows) = world.dimensions();
        let first_col = (self.offset.x / TILE_SIZE) as usize;
        let first_row = (self.offset.y / TILE_SIZE) as usize;
        let last_col = (((self.offset.x + screen_width()) / TILE_SIZE) as usize + 1).min(cols);
        let last_row = (((self.offset.y + screen_height()) / TILE_SIZE) as usize + 1).min(rows);

        for row in first_row..last_row {
            for col in first_col..last_col {
                let x = col as f32 * TILE_SIZE;
                let y = row as f32 * TILE_SIZE;
                let color = match world.tile_at(x, y) {
                    Some(Tile::Grass) => Color::from_rgba(58, 110, 52, 255),
                    Some(Tile::Path) => Color::from_rgba(150, 120, 80, 255),
                    Some(Tile::Water) => Color::from_rgba(40, 80, 160, 255),
                    Some(Tile::Rock) => Color::from_rgba(90, 90, 90, 255),
                    None => continue,
                };
                let (sx, sy) = self.to_screen(x, y);
                draw_rectangle(sx, sy, TILE_SIZE, TILE_SIZE, color);
            }
        }
    }

    fn draw_buildings(&self, world: &TileWorld) {
        for building in world.buildings() {
            let (sx, sy) = self.to_screen(building.x, building.y);
            draw_rectangle(sx, sy, building.w, building.h, Color::from_rgba(110, 70, 50, 255));
            draw_rectangle_lines(sx, sy, building.w, building.h, 2.0, BLACK);
        }
    }

    fn draw_plots(&self, plots: &[PlotRecord]) {
        for plot in plots {
            let (sx, sy) = self.to_screen(
                f32::from(plot.tile_x) * TILE_SIZE,
                f32::from(plot.tile_y) * TILE_SIZE,
            );
            let w = f32::from(plot.width) * TILE_SIZE;
            let h = f32::from(plot.height) * TILE_SIZE;
            draw_rectangle_lines(sx, sy, w, h, 2.0, YELLOW);
            draw_text(&plot.label_str(), sx + 3.0, sy + 12.0, 14.0, YELLOW);
        }
    }

    fn draw_player(&self, pos: Vector2, color: Color) {
        let (sx, sy) = self.to_screen(pos.x, pos.y);
        draw_rectangle(sx, sy, PLAYER_SIZE, PLAYER_SIZE, color);
        draw_rectangle_lines(sx, sy, PLAYER_SIZE, PLAYER_SIZE, 2.0, WHITE);
    }

    fn draw_facing(&self, pos: Vector2, dir: Direction) {
        let (sx, sy) = self.to_screen(pos.x, pos.y);
        let cx = sx + PLAYER_SIZE / 2.0;
        let cy = sy + PLAYER_SIZE / 2.0;
        let reach = PLAYER_SIZE / 2.0 + 4.0;
        let (dx, dy) = match dir {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
        };
        let tip_x = cx + dx * reach;
        let tip_y = cy + dy * reach;
        let arrow_size = 4.0;

        // perpendicular to the facing axis
        let px = -dy;
        let py = dx;
        let base_x = tip_x - dx * arrow_size;
        let base_y = tip_y - dy * arrow_size;
        draw_line(
            tip_x,
            tip_y,
            base_x + px * arrow_size,
            base_y + py * arrow_size,
            1.5,
            YELLOW,
        );
        draw_line(
            tip_x,
            tip_y,
            base_x - px * arrow_size,
            base_y - py * arrow_size,
            1.5,
            YELLOW,
        );
    }

    fn draw_player_id(&self, pos: Vector2, session_id: u32) {
        let id_color = match session_id % 8 {
            0 => WHITE,
            1 => RED,
            2 => GREEN,
            3 => BLUE,
            4 => YELLOW,
            5 => MAGENTA,
            6 => Color::from_rgba(0, 255, 255, 255),
            _ => Color::from_rgba(136, 136, 136, 255),
        };

        let (sx, sy) = self.to_screen(pos.x, pos.y);
        draw_rectangle(sx + PLAYER_SIZE / 2.0 - 2.0, sy - 8.0, 4.0, 4.0, id_color);
    }

    fn draw_ui(&self, config: UiConfig) {
        let lines = [
            format!("session {:08x}", config.session_id),
            format!("{} moves in flight", config.pending_moves),
            format!("{} peers", config.peer_count),
            format!("{} plots", config.plot_count),
        ];
        draw_rectangle(6.0, 6.0, 170.0, 16.0 * lines.len() as f32 + 8.0, Color::from_rgba(0, 0, 0, 160));
        for (i, line) in lines.iter().enumerate() {
            draw_text(line, 12.0, 22.0 + 16.0 * i as f32, 16.0, WHITE);
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}
