//! Slice extraction from an Inkscape SVG document.
//!
//! The document is scanned once, in document order. Rectangles are slices
//! only when they sit inside the layer labelled `slices` or one of its
//! sublayers; the layer's visibility does not matter, so the layer can be
//! hidden to keep the rectangles out of the rendered images.

use crate::error::SliceError;
use crate::slice::{Rect, Slice};
use crate::units::parse_coordinate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Label of the layer whose rectangles are slices.
pub const SLICES_LAYER: &str = "slices";

const GROUP_MODE_ATTR: &str = "inkscape:groupmode";
const LABEL_ATTR: &str = "inkscape:label";

/// Result of scanning a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceDocument {
    /// Page bounds with origin `(0, 0)`.
    pub page: Rect,
    pub slices: Vec<Slice>,
}

/// Extracts slices from SVG source text.
///
/// # Errors
///
/// - [`SliceError::DocumentParse`] for malformed XML
/// - [`SliceError::UnsupportedUnit`], [`SliceError::MissingIdentifier`],
///   [`SliceError::MissingAttribute`], [`SliceError::InvalidHotspot`] for bad slices
/// - [`SliceError::NoSlicesFound`] when the document holds no slice at all
pub fn extract_slices(source: &str) -> Result<SliceDocument, SliceError> {
    let mut extractor = SliceExtractor::new(source);
    let mut reader = Reader::from_str(source);
    let mut open_elements = 0usize;

    loop {
        let pos = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|e| {
            extractor.parse_error(e.to_string(), reader.error_position() as usize)
        })?;

        match event {
            Event::Start(e) => {
                open_elements += 1;
                let attrs = collect_attributes(&e, &reader)
                    .map_err(|msg| extractor.parse_error(msg, pos))?;
                extractor.start_element(local_name(&e).as_str(), &attrs, pos)?;
            }
            Event::Empty(e) => {
                let attrs = collect_attributes(&e, &reader)
                    .map_err(|msg| extractor.parse_error(msg, pos))?;
                let name = local_name(&e);
                extractor.start_element(name.as_str(), &attrs, pos)?;
                extractor.end_element(name.as_str());
            }
            Event::End(e) => {
                open_elements = open_elements.saturating_sub(1);
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                extractor.end_element(&name);
            }
            Event::Eof => {
                if open_elements > 0 {
                    return Err(extractor.parse_error(
                        "unexpected end of document, unclosed elements remain".to_string(),
                        source.len(),
                    ));
                }
                break;
            }
            _ => (),
        }
    }

    extractor.finish()
}

/// Reads and extracts slices from an SVG file.
pub fn extract_slices_from_file(path: &Path) -> Result<SliceDocument, SliceError> {
    let source =
        std::fs::read_to_string(path).map_err(|e| SliceError::Io(path.to_path_buf(), e))?;
    let document = extract_slices(&source)?;
    debug!(
        "Extracted {} slices from {} (page {}x{})",
        document.slices.len(),
        path.display(),
        document.page.width(),
        document.page.height()
    );
    Ok(document)
}

type Attributes = HashMap<String, String>;

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn collect_attributes(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Attributes, String> {
    let mut attrs = Attributes::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| e.to_string())?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, pos: usize) -> (usize, usize) {
    let prefix = &source.as_bytes()[..pos.min(source.len())];
    let line = prefix.iter().filter(|&&b| b == b'\n').count() + 1;
    let col = match prefix.iter().rposition(|&b| b == b'\n') {
        Some(nl) => prefix.len() - nl,
        None => prefix.len() + 1,
    };
    (line, col)
}

/// Scan state for one document.
struct SliceExtractor<'a> {
    source: &'a str,
    page: Rect,
    seen_root: bool,
    /// One entry per open `<g>`: whether it entered the slices subtree.
    groups: Vec<bool>,
    /// Number of open layers belonging to the slices subtree.
    layer_depth: usize,
    slices: Vec<Slice>,
    names: HashSet<String>,
}

impl<'a> SliceExtractor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            page: Rect::default(),
            seen_root: false,
            groups: Vec::new(),
            layer_depth: 0,
            slices: Vec::new(),
            names: HashSet::new(),
        }
    }

    fn in_slices_layer(&self) -> bool {
        self.layer_depth > 0
    }

    fn parse_error(&self, message: String, pos: usize) -> SliceError {
        let (line, column) = line_col(self.source, pos);
        SliceError::DocumentParse {
            message,
            line,
            column,
        }
    }

    fn start_element(&mut self, name: &str, attrs: &Attributes, pos: usize) -> Result<(), SliceError> {
        match name {
            "svg" if !self.seen_root => self.start_svg(attrs, pos),
            "g" => {
                self.start_group(attrs);
                Ok(())
            }
            "rect" if self.in_slices_layer() => self.start_rect(attrs, pos),
            _ => Ok(()),
        }
    }

    fn end_element(&mut self, name: &str) {
        if name != "g" {
            return;
        }
        if self.groups.pop() == Some(true) {
            self.layer_depth -= 1;
        }
    }

    fn start_svg(&mut self, attrs: &Attributes, pos: usize) -> Result<(), SliceError> {
        self.seen_root = true;

        let view_box: Option<Vec<f64>> = attrs.get("viewBox").map(|vb| {
            vb.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .filter_map(|t| t.parse().ok())
                .collect()
        });
        let view_box = view_box.filter(|v| v.len() == 4);

        let width = match attrs.get("width") {
            Some(w) => self.coordinate(w, "width", "svg", pos)?,
            None => view_box.as_ref().map_or(0.0, |v| v[2]),
        };
        let height = match attrs.get("height") {
            Some(h) => self.coordinate(h, "height", "svg", pos)?,
            None => view_box.as_ref().map_or(0.0, |v| v[3]),
        };

        self.page = Rect::new(0.0, 0.0, width, height);
        Ok(())
    }

    fn start_group(&mut self, attrs: &Attributes) {
        let is_layer = attrs.get(GROUP_MODE_ATTR).map(String::as_str) == Some("layer");
        let enters = is_layer
            && (self.in_slices_layer()
                || attrs.get(LABEL_ATTR).map(String::as_str) == Some(SLICES_LAYER));

        if enters {
            self.layer_depth += 1;
        }
        self.groups.push(enters);
    }

    fn start_rect(&mut self, attrs: &Attributes, pos: usize) -> Result<(), SliceError> {
        let Some(name) = attrs.get("id").filter(|id| !id.trim().is_empty()) else {
            let (line, column) = line_col(self.source, pos);
            return Err(SliceError::MissingIdentifier {
                element: "rect".to_string(),
                line,
                column,
            });
        };

        let required = |attribute: &str| {
            attrs.get(attribute).ok_or_else(|| SliceError::MissingAttribute {
                name: name.clone(),
                attribute: attribute.to_string(),
            })
        };

        let x = match attrs.get("x") {
            Some(v) => self.coordinate(v, "x", name, pos)?,
            None => 0.0,
        };
        let y = match attrs.get("y") {
            Some(v) => self.coordinate(v, "y", name, pos)?,
            None => 0.0,
        };
        let width = self.dimension(required("width")?, "width", name, pos)?;
        let height = self.dimension(required("height")?, "height", name, pos)?;

        if self.names.contains(name) {
            let (line, column) = line_col(self.source, pos);
            return Err(SliceError::DuplicateIdentifier {
                name: name.clone(),
                line,
                column,
            });
        }

        let slice = Slice {
            rect: Rect::from_origin_size(x, y, width, height),
            name: name.clone(),
            hotspot: attrs.get("hotspot").cloned(),
            symlinks: attrs.get("symlinks").cloned(),
        };
        slice.hotspot_coordinates()?;

        self.names.insert(slice.name.clone());
        self.slices.push(slice);
        Ok(())
    }

    fn coordinate(
        &self,
        value: &str,
        attribute: &str,
        element: &str,
        pos: usize,
    ) -> Result<f64, SliceError> {
        parse_coordinate(value).map_err(|e| {
            let (line, column) = line_col(self.source, pos);
            SliceError::UnsupportedUnit {
                value: e.0,
                attribute: attribute.to_string(),
                element: element.to_string(),
                line,
                column,
            }
        })
    }

    /// A width or height; negative extents are rejected.
    fn dimension(
        &self,
        value: &str,
        attribute: &str,
        name: &str,
        pos: usize,
    ) -> Result<f64, SliceError> {
        let parsed = self.coordinate(value, attribute, name, pos)?;
        if parsed < 0.0 {
            let (line, column) = line_col(self.source, pos);
            return Err(SliceError::NegativeDimension {
                name: name.to_string(),
                attribute: attribute.to_string(),
                value: parsed,
                line,
                column,
            });
        }
        Ok(parsed)
    }

    fn finish(self) -> Result<SliceDocument, SliceError> {
        if self.slices.is_empty() {
            return Err(SliceError::NoSlicesFound);
        }
        Ok(SliceDocument {
            page: self.page,
            slices: self.slices,
        })
    }
}
