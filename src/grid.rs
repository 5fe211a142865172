use anyhow::{bail, Context, Result};
use std::fs;

/// Obstacle map, immutable after construction. Cells are stored row-major,
/// zero = free. Any coordinate outside the map counts as an obstacle.
#[derive(Debug, Clone)]
pub struct Grid {
    pub width: i32,
    pub height: i32,
    cells: Vec<u8>,
}

impl Grid {
    /// Parse the ASCII map format: first line `W H`, then W*H characters in
    /// {'0', '1'} (whitespace ignored), row-major, '0' free.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let width: i32 = tokens
            .next()
            .context("map is missing the width field")?
            .parse()
            .context("map width is not an integer")?;
        let height: i32 = tokens
            .next()
            .context("map is missing the height field")?
            .parse()
            .context("map height is not an integer")?;
        if width <= 0 || height <= 0 {
            bail!("map dimensions {width}x{height} are not positive");
        }

        let total = (width as usize) * (height as usize);
        let mut cells = Vec::with_capacity(total);
        for token in tokens {
            for ch in token.chars() {
                match ch {
                    '0' => cells.push(0),
                    '1' => cells.push(1),
                    _ => bail!("unexpected map character {ch:?}"),
                }
            }
        }
        if cells.len() != total {
            bail!(
                "map body has {} cells, expected {}",
                cells.len(),
                total
            );
        }

        Ok(Grid {
            width,
            height,
            cells,
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading map file {path}"))?;
        Self::parse(&text)
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    /// Out-of-bounds cells count as obstacles.
    pub fn is_obstacle(&self, x: i32, y: i32) -> bool {
        if !self.in_bounds(x, y) {
            return true;
        }
        self.cells[(y * self.width + x) as usize] != 0
    }

    pub fn plane(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}
