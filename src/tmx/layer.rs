use super::chunk::{merge_chunks, parse_csv, Chunk};
use super::properties::parse_attr;
use super::TmxError;
use crate::property::Properties;

/// Tile layer with a dense grid anchored at `(offset_x, offset_y)` in tile coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct TmxLayer {
    pub name: String,
    /// Document order, used as draw order.
    pub z: usize,
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub opacity: f32,
    pub visible: bool,
    pub data: Vec<u32>,
    pub properties: Properties,
}

impl TmxLayer {
    /// Parses the first tile layer found in an xml fragment or full map document.
    pub fn parse(xml: &str) -> Result<Self, TmxError> {
        super::map::parse_layers(xml)?
            .into_iter()
            .next()
            .ok_or(TmxError::NoLayer)
    }

    /// Tile at a grid cell, 0 outside the grid.
    pub fn tile(&self, x: i64, y: i64) -> u32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0;
        }
        self.data[(y as usize) * self.width as usize + x as usize]
    }

    /// Tile at a map cell, taking the layer offset into account.
    pub fn tile_at(&self, world_x: i32, world_y: i32) -> u32 {
        self.tile(
            world_x as i64 - self.offset_x as i64,
            world_y as i64 - self.offset_y as i64,
        )
    }
}

/// Collects a `<layer>` while its children stream in.
#[derive(Default)]
pub(super) struct LayerBuilder {
    pub name: String,
    pub z: usize,
    pub width: u32,
    pub height: u32,
    pub opacity: f32,
    pub visible: bool,
    pub chunks: Vec<Chunk>,
    pub raw: Option<String>,
    pub properties: Properties,
}

impl LayerBuilder {
    pub fn from_attributes(attrs: Vec<(String, String)>, z: usize) -> Result<Self, TmxError> {
        let mut builder = LayerBuilder {
            z,
            opacity: 1.0,
            visible: true,
            ..Default::default()
        };
        for (key, value) in attrs {
            match key.as_str() {
                "name" => builder.name = value,
                "width" => builder.width = parse_attr(&key, &value)?,
                "height" => builder.height = parse_attr(&key, &value)?,
                "opacity" => builder.opacity = parse_attr(&key, &value)?,
                "visible" => builder.visible = value.trim() != "0",
                _ => {}
            }
        }
        Ok(builder)
    }

    pub fn finish(self) -> Result<TmxLayer, TmxError> {
        let (width, height, offset_x, offset_y, data) = if !self.chunks.is_empty() {
            let merged = merge_chunks(&self.chunks)?;
            (
                merged.width,
                merged.height,
                merged.offset_x,
                merged.offset_y,
                merged.data,
            )
        } else {
            let expected = self.width as usize * self.height as usize;
            let raw = match self.raw {
                Some(raw) => raw,
                None if expected == 0 => String::new(),
                None => return Err(TmxError::MissingData(self.name)),
            };
            let data = parse_csv(&raw)?;
            if data.len() != expected {
                return Err(TmxError::DataLength {
                    expected,
                    found: data.len(),
                });
            }
            (self.width, self.height, 0, 0, data)
        };

        Ok(TmxLayer {
            name: self.name,
            z: self.z,
            width,
            height,
            offset_x,
            offset_y,
            opacity: self.opacity,
            visible: self.visible,
            data,
            properties: self.properties,
        })
    }
}
