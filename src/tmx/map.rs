use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::chunk::Chunk;
use super::layer::{LayerBuilder, TmxLayer};
use super::properties::{attributes, parse_attr, parse_property};
use super::TmxError;
use crate::property::Properties;

/// Parsed map document, tile layers in document order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TmxMap {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub infinite: bool,
    pub layers: Vec<TmxLayer>,
    pub properties: Properties,
}

impl TmxMap {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TmxError> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|source| TmxError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&xml)
    }

    pub fn parse(xml: &str) -> Result<Self, TmxError> {
        let mut parser = Parser::default();
        parser.run(xml)?;
        Ok(parser.map)
    }

    pub fn layer(&self, name: &str) -> Option<&TmxLayer> {
        self.layers.iter().find(|l| l.name == name)
    }
}

pub(super) fn parse_layers(xml: &str) -> Result<Vec<TmxLayer>, TmxError> {
    Ok(TmxMap::parse(xml)?.layers)
}

/// Element currently open in the document.
enum Scope {
    Map,
    Layer,
    Data,
    Chunk,
    Properties { on_layer: bool },
    Other,
}

#[derive(Default)]
struct Parser {
    map: TmxMap,
    scopes: Vec<Scope>,
    layer: Option<LayerBuilder>,
    chunk: Option<Chunk>,
    text: String,
}

impl Parser {
    fn run(&mut self, xml: &str) -> Result<(), TmxError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let scope = self.open(&e)?;
                    self.scopes.push(scope);
                }
                Event::Empty(e) => {
                    let scope = self.open(&e)?;
                    self.close(scope)?;
                }
                Event::Text(e) => {
                    if matches!(self.scopes.last(), Some(Scope::Data | Scope::Chunk)) {
                        self.text.push_str(&e.unescape()?);
                    }
                }
                Event::End(_) => {
                    if let Some(scope) = self.scopes.pop() {
                        self.close(scope)?;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(())
    }

    fn open(&mut self, e: &BytesStart<'_>) -> Result<Scope, TmxError> {
        let parent_is_map = matches!(self.scopes.last(), None | Some(Scope::Map));
        let scope = match e.name().as_ref() {
            b"map" => {
                for (key, value) in attributes(e)? {
                    match key.as_str() {
                        "width" => self.map.width = parse_attr(&key, &value)?,
                        "height" => self.map.height = parse_attr(&key, &value)?,
                        "tilewidth" => self.map.tile_width = parse_attr(&key, &value)?,
                        "tileheight" => self.map.tile_height = parse_attr(&key, &value)?,
                        "infinite" => self.map.infinite = value.trim() == "1",
                        _ => {}
                    }
                }
                Scope::Map
            }
            b"layer" if self.layer.is_none() => {
                let z = self.map.layers.len();
                self.layer = Some(LayerBuilder::from_attributes(attributes(e)?, z)?);
                Scope::Layer
            }
            b"data" if self.layer.is_some() => {
                for (key, value) in attributes(e)? {
                    if key == "encoding" && value != "csv" {
                        return Err(TmxError::UnsupportedEncoding(value));
                    }
                    if key == "compression" {
                        return Err(TmxError::UnsupportedEncoding(value));
                    }
                }
                self.text.clear();
                Scope::Data
            }
            b"chunk" if matches!(self.scopes.last(), Some(Scope::Data)) => {
                let mut chunk = Chunk {
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 0,
                    data: Vec::new(),
                };
                for (key, value) in attributes(e)? {
                    match key.as_str() {
                        "x" => chunk.x = parse_attr(&key, &value)?,
                        "y" => chunk.y = parse_attr(&key, &value)?,
                        "width" => chunk.width = parse_attr(&key, &value)?,
                        "height" => chunk.height = parse_attr(&key, &value)?,
                        _ => {}
                    }
                }
                self.chunk = Some(chunk);
                self.text.clear();
                Scope::Chunk
            }
            b"properties" => match self.scopes.last() {
                Some(Scope::Layer) => Scope::Properties { on_layer: true },
                _ if parent_is_map => Scope::Properties { on_layer: false },
                _ => Scope::Other,
            },
            b"property" => {
                if let Some(Scope::Properties { on_layer }) = self.scopes.last() {
                    let on_layer = *on_layer;
                    if let Some((name, value)) = parse_property(e)? {
                        match self.layer.as_mut() {
                            Some(layer) if on_layer => layer.properties.set(name, value),
                            _ => self.map.properties.set(name, value),
                        }
                    }
                }
                Scope::Other
            }
            _ => Scope::Other,
        };
        Ok(scope)
    }

    fn close(&mut self, scope: Scope) -> Result<(), TmxError> {
        match scope {
            Scope::Layer => {
                if let Some(builder) = self.layer.take() {
                    self.map.layers.push(builder.finish()?);
                }
            }
            Scope::Data => {
                if let Some(layer) = self.layer.as_mut() {
                    if layer.chunks.is_empty() {
                        layer.raw = Some(std::mem::take(&mut self.text));
                    }
                }
            }
            Scope::Chunk => {
                if let Some(mut chunk) = self.chunk.take() {
                    let expected = chunk.width as usize * chunk.height as usize;
                    chunk.data = super::chunk::parse_csv(&self.text)?;
                    if chunk.data.is_empty() {
                        chunk.data = vec![0; expected];
                    }
                    self.text.clear();
                    if let Some(layer) = self.layer.as_mut() {
                        layer.chunks.push(chunk);
                    }
                }
            }
            Scope::Map | Scope::Properties { .. } | Scope::Other => {}
        }
        Ok(())
    }
}
