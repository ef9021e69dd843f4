//! Boundary to presentation layers.
//!
//! The simulation never does any drawing itself; it hands each frame to a
//! [`Renderer`] and lets it keep whatever animation state it needs.

use crate::{
    Position,
    grid::{Cat, Character, FireFighter},
    map::Matrix,
    tile::{Tile, WallStyle},
};

/// Receives one frame of the simulation at a time.
pub trait Renderer {
    fn draw(&mut self, tiles: &Matrix<Tile>, agent: &FireFighter, target: &Cat);

    /// Called once per rendered frame after `draw`.
    fn animate(&mut self) {}
}

/// Renders frames as plain text, one character per tile.
#[derive(Debug, Default)]
pub struct TextRenderer {
    frames: Vec<String>,
}

impl TextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&str> {
        self.frames.last().map(String::as_str)
    }

    /// Removes and returns every frame drawn so far.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.frames)
    }
}

impl Renderer for TextRenderer {
    fn draw(&mut self, tiles: &Matrix<Tile>, agent: &FireFighter, target: &Cat) {
        self.frames.push(text_frame(tiles, agent, target));
    }
}

/// Symbol legend: `@` firefighter, `x` dead firefighter, `c` cat, `#` wall,
/// `W` window, `P` picture, `i` item, `*` fire, `.` floor.
pub fn text_frame(tiles: &Matrix<Tile>, agent: &FireFighter, target: &Cat) -> String {
    let mut out = String::with_capacity((tiles.width() + 1) * tiles.height());
    for y in 0..tiles.height() {
        for x in 0..tiles.width() {
            let position = Position { x, y };
            let symbol = if position == agent.position() {
                if agent.is_alive() { '@' } else { 'x' }
            } else if position == target.position() {
                'c'
            } else {
                tile_symbol(&tiles[position])
            };
            out.push(symbol);
        }
        out.push('\n');
    }
    out
}

fn tile_symbol(tile: &Tile) -> char {
    if tile.is_on_fire() {
        return '*';
    }
    match tile {
        Tile::Floor(_) => '.',
        Tile::Wall(wall) => match wall.style {
            WallStyle::Front | WallStyle::Top => '#',
            WallStyle::Window => 'W',
            WallStyle::Picture => 'P',
        },
        Tile::Item(item) if item.destroyed => '.',
        Tile::Item(_) => 'i',
    }
}
