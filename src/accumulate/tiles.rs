//! Progressive tile scheduler.
//!
//! Bounds per-frame work independent of resolution: each frame hands out at
//! most `tiles_per_frame` tiles, continuing where the previous frame stopped
//! and wrapping around once every tile of the image has been visited.

/// Pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Tile {
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.y0..self.y1).flat_map(move |y| (self.x0..self.x1).map(move |x| (x, y)))
    }

    pub fn pixel_count(&self) -> usize {
        ((self.x1 - self.x0) * (self.y1 - self.y0)) as usize
    }
}

#[derive(Debug, Clone)]
pub struct TileScheduler {
    width: u32,
    height: u32,
    tile_size: u32,
    /// 0 = every tile every frame
    tiles_per_frame: u32,
    cursor: usize,
    passes: u64,
    frame_complete: bool,
}

impl TileScheduler {
    pub const DEFAULT_TILE_SIZE: u32 = 16;

    pub fn new(width: u32, height: u32, tile_size: u32, tiles_per_frame: u32) -> Self {
        Self {
            width,
            height,
            tile_size: tile_size.max(1),
            tiles_per_frame,
            cursor: 0,
            passes: 0,
            frame_complete: false,
        }
    }

    pub fn tiles_x(&self) -> u32 {
        self.width.div_ceil(self.tile_size)
    }

    pub fn tiles_y(&self) -> u32 {
        self.height.div_ceil(self.tile_size)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_x() as usize * self.tiles_y() as usize
    }

    /// Completed full passes over the image since the last reset.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// The last batch finished a full pass over the image.
    pub fn frame_complete(&self) -> bool {
        self.frame_complete
    }

    pub fn set_tiles_per_frame(&mut self, tiles_per_frame: u32) {
        self.tiles_per_frame = tiles_per_frame;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.reset();
    }

    /// Restart progress from the first tile.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.passes = 0;
        self.frame_complete = false;
    }

    fn tile(&self, index: usize) -> Tile {
        let tx = (index % self.tiles_x() as usize) as u32;
        let ty = (index / self.tiles_x() as usize) as u32;
        let x0 = tx * self.tile_size;
        let y0 = ty * self.tile_size;
        Tile {
            x0,
            y0,
            x1: (x0 + self.tile_size).min(self.width),
            y1: (y0 + self.tile_size).min(self.height),
        }
    }

    /// Tiles to trace this frame.
    pub fn next_tiles(&mut self) -> Vec<Tile> {
        let total = self.tile_count();
        self.frame_complete = false;
        if total == 0 {
            return Vec::new();
        }
        let budget = match self.tiles_per_frame {
            0 => total,
            n => (n as usize).min(total),
        };

        let mut tiles = Vec::with_capacity(budget);
        for _ in 0..budget {
            tiles.push(self.tile(self.cursor));
            self.cursor += 1;
            if self.cursor == total {
                self.cursor = 0;
                self.passes += 1;
                self.frame_complete = true;
            }
        }
        tiles
    }
}
