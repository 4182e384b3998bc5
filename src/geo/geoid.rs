//! Geoid undulation lookup on a 15 arc-minute grid.
//!
//! The grid has the layout of the EGM96 `WW15MGH.DAC` file: 721 rows from 90°N
//! to 90°S, each with 1440 columns from 0° to 359.75°E. Each post is a
//! big-endian signed 16 bit integer in centimeters.

use std::path::Path;

use byteorder::{
    BigEndian,
    ByteOrder,
};

pub const ROWS: usize = 721;
pub const COLUMNS: usize = 1440;

/// Grid spacing in degrees
pub const SPACING: f64 = 0.25;

/// Expected file size in bytes.
pub const GRID_SIZE: usize = ROWS * COLUMNS * 2;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("invalid geoid grid size: expected {GRID_SIZE} bytes, but got {size}")]
    InvalidSize { size: usize },
}

pub struct GeoidGrid {
    posts: Vec<i16>,
}

impl GeoidGrid {
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() != GRID_SIZE {
            return Err(Error::InvalidSize { size: data.len() });
        }

        let mut posts = vec![0; ROWS * COLUMNS];
        BigEndian::read_i16_into(data, &mut posts);

        Ok(Self { posts })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = tokio::fs::read(path).await?;
        Self::from_bytes(&data)
    }

    /// Grid where every post has the same value.
    #[cfg(test)]
    pub fn constant(centimeters: i16) -> Self {
        Self {
            posts: vec![centimeters; ROWS * COLUMNS],
        }
    }

    fn post(&self, row: usize, column: usize) -> f64 {
        f64::from(self.posts[row * COLUMNS + column])
    }

    /// Geoid undulation in meters, bilinearly interpolated from the 4
    /// surrounding posts.
    ///
    /// Longitudes are wrapped into [0°, 360°), latitudes are clamped to ±90°.
    pub fn undulation(&self, latitude: f64, longitude: f64) -> f64 {
        let latitude = latitude.clamp(-90.0, 90.0);
        let longitude = longitude.rem_euclid(360.0);

        let row = (90.0 - latitude) / SPACING;
        let column = longitude / SPACING;

        let row_0 = (row.floor() as usize).min(ROWS - 1);
        let row_1 = (row_0 + 1).min(ROWS - 1);
        let column_0 = (column.floor() as usize) % COLUMNS;
        let column_1 = (column_0 + 1) % COLUMNS;

        let row_fraction = row - row.floor();
        let column_fraction = column - column.floor();

        let centimeters = (1.0 - row_fraction) * (1.0 - column_fraction) * self.post(row_0, column_0)
            + (1.0 - row_fraction) * column_fraction * self.post(row_0, column_1)
            + row_fraction * (1.0 - column_fraction) * self.post(row_1, column_0)
            + row_fraction * column_fraction * self.post(row_1, column_1);

        centimeters / 100.0
    }
}

impl std::fmt::Debug for GeoidGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoidGrid")
            .field("rows", &ROWS)
            .field("columns", &COLUMNS)
            .finish_non_exhaustive()
    }
}
