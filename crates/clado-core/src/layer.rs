//! Layer definitions for the board canvas.
//!
//! A layer is a single node drawn on the canvas. Layers are plain data: the
//! shared document stores them field by field, so every editable attribute is
//! also addressable as a [`LayerField`].

use kurbo::{Point, Rect};
use peniko::Color;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a layer.
pub type LayerId = Uuid;

/// Unique identifier for an edge between two layers.
pub type EdgeId = Uuid;

/// Default width of a freshly placed layer.
pub const DEFAULT_LAYER_WIDTH: f64 = 100.0;
/// Default height of a freshly placed layer.
pub const DEFAULT_LAYER_HEIGHT: f64 = 50.0;
/// Smallest width or height a resize may produce.
pub const MIN_LAYER_SIZE: f64 = 10.0;

/// RGB colour triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0)
    }

    pub const fn white() -> Self {
        Self::new(255, 255, 255)
    }

    /// Parse a `#rgb` or `#rrggbb` hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        match hex.len() {
            3 => {
                let r = u8::from_str_radix(&hex[0..1], 16).ok()? * 17;
                let g = u8::from_str_radix(&hex[1..2], 16).ok()? * 17;
                let b = u8::from_str_radix(&hex[2..3], 16).ok()? * 17;
                Some(Self::new(r, g, b))
            }
            6 => {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                Some(Self::new(r, g, b))
            }
            _ => None,
        }
    }

    /// Format as a lowercase `#rrggbb` string.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Color> for Rgb {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
        }
    }
}

impl From<Rgb> for Color {
    fn from(color: Rgb) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, 255)
    }
}

/// The kind of a layer. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Text,
    Note,
    Rectangle,
    Ellipse,
    #[default]
    Node,
}

impl LayerKind {
    pub const ALL: [LayerKind; 5] = [
        LayerKind::Text,
        LayerKind::Note,
        LayerKind::Rectangle,
        LayerKind::Ellipse,
        LayerKind::Node,
    ];

    /// Human readable name, as shown in the toolbar.
    pub fn display_name(&self) -> &'static str {
        match self {
            LayerKind::Text => "Text",
            LayerKind::Note => "Sticky Note",
            LayerKind::Rectangle => "Rectangle",
            LayerKind::Ellipse => "Ellipse",
            LayerKind::Node => "Node",
        }
    }

    /// Label a new layer of this kind starts with.
    pub fn default_label(&self) -> &'static str {
        match self {
            LayerKind::Text => "Text Node",
            LayerKind::Note => "Sticky Note",
            LayerKind::Rectangle => "Rectangle",
            LayerKind::Ellipse => "Ellipse",
            LayerKind::Node => "Node",
        }
    }

    /// Fill colour a new layer of this kind starts with.
    pub fn default_fill(&self) -> Rgb {
        match self {
            LayerKind::Text => Rgb::new(0xf0, 0xf0, 0xf0),
            LayerKind::Note => Rgb::new(0xfe, 0xf3, 0xc7),
            LayerKind::Rectangle => Rgb::new(0xdb, 0xea, 0xfe),
            LayerKind::Ellipse => Rgb::new(0xdc, 0xfc, 0xe7),
            LayerKind::Node => Rgb::new(0xf9, 0xfa, 0xfb),
        }
    }

    /// Size a new layer of this kind is placed with.
    pub fn default_size(&self) -> (f64, f64) {
        (DEFAULT_LAYER_WIDTH, DEFAULT_LAYER_HEIGHT)
    }
}

/// An editable attribute of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerField {
    X,
    Y,
    Width,
    Height,
    Fill,
    Value,
    Rank,
}

impl LayerField {
    pub const ALL: [LayerField; 7] = [
        LayerField::X,
        LayerField::Y,
        LayerField::Width,
        LayerField::Height,
        LayerField::Fill,
        LayerField::Value,
        LayerField::Rank,
    ];
}

/// The value of a single layer field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    X(f64),
    Y(f64),
    Width(f64),
    Height(f64),
    Fill(Rgb),
    Value(Option<String>),
    Rank(f64),
}

impl FieldValue {
    /// The field this value belongs to.
    pub fn field(&self) -> LayerField {
        match self {
            FieldValue::X(_) => LayerField::X,
            FieldValue::Y(_) => LayerField::Y,
            FieldValue::Width(_) => LayerField::Width,
            FieldValue::Height(_) => LayerField::Height,
            FieldValue::Fill(_) => LayerField::Fill,
            FieldValue::Value(_) => LayerField::Value,
            FieldValue::Rank(_) => LayerField::Rank,
        }
    }
}

/// A shape on the board canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub(crate) id: LayerId,
    pub(crate) kind: LayerKind,
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub fill: Rgb,
    /// Optional text content (label, note text).
    pub value: Option<String>,
    /// Paint order; larger ranks are drawn on top.
    pub rank: f64,
}

impl Layer {
    /// Create a new layer with a fresh id and the kind's default style.
    pub fn new(kind: LayerKind, bounds: Rect) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            x: bounds.x0,
            y: bounds.y0,
            width: bounds.width(),
            height: bounds.height(),
            fill: kind.default_fill(),
            value: Some(kind.default_label().to_string()),
            rank: 0.0,
        }
    }

    /// Create a layer of the kind's default size, centred on `center`.
    pub fn placed(kind: LayerKind, center: Point) -> Self {
        let (width, height) = kind.default_size();
        let origin = Point::new(center.x - width / 2.0, center.y - height / 2.0);
        Self::new(kind, Rect::from_origin_size(origin, (width, height)))
    }

    /// Reconstruct a layer with a specific id (for the document store and storage).
    pub(crate) fn reconstruct(id: LayerId, kind: LayerKind) -> Self {
        Self {
            id,
            kind,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            fill: kind.default_fill(),
            value: None,
            rank: 0.0,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    /// Top-left corner.
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// Check whether a canvas point lies on this layer.
    pub fn hit_test(&self, point: Point) -> bool {
        let bounds = self.bounds();
        match self.kind {
            LayerKind::Ellipse => {
                let rx = bounds.width() / 2.0;
                let ry = bounds.height() / 2.0;
                if rx <= 0.0 || ry <= 0.0 {
                    return false;
                }
                let center = bounds.center();
                let dx = (point.x - center.x) / rx;
                let dy = (point.y - center.y) / ry;
                dx * dx + dy * dy <= 1.0
            }
            _ => bounds.contains(point),
        }
    }

    /// Read one field.
    pub fn field(&self, field: LayerField) -> FieldValue {
        match field {
            LayerField::X => FieldValue::X(self.x),
            LayerField::Y => FieldValue::Y(self.y),
            LayerField::Width => FieldValue::Width(self.width),
            LayerField::Height => FieldValue::Height(self.height),
            LayerField::Fill => FieldValue::Fill(self.fill),
            LayerField::Value => FieldValue::Value(self.value.clone()),
            LayerField::Rank => FieldValue::Rank(self.rank),
        }
    }

    /// Write one field.
    pub fn apply(&mut self, value: &FieldValue) {
        match value {
            FieldValue::X(x) => self.x = *x,
            FieldValue::Y(y) => self.y = *y,
            FieldValue::Width(w) => self.width = *w,
            FieldValue::Height(h) => self.height = *h,
            FieldValue::Fill(fill) => self.fill = *fill,
            FieldValue::Value(value) => self.value = value.clone(),
            FieldValue::Rank(rank) => self.rank = *rank,
        }
    }

    /// All fields, in [`LayerField::ALL`] order.
    pub fn fields(&self) -> Vec<FieldValue> {
        LayerField::ALL.iter().map(|&f| self.field(f)).collect()
    }
}

/// A directed connection between two layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub(crate) id: EdgeId,
    pub source: LayerId,
    pub target: LayerId,
}

impl Edge {
    pub fn new(source: LayerId, target: LayerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            target,
        }
    }

    pub(crate) fn reconstruct(id: EdgeId, source: LayerId, target: LayerId) -> Self {
        Self { id, source, target }
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placed_layer_is_centered() {
        let layer = Layer::placed(LayerKind::Rectangle, Point::new(120.0, 80.0));
        assert!((layer.x - 70.0).abs() < f64::EPSILON);
        assert!((layer.y - 55.0).abs() < f64::EPSILON);
        assert!((layer.width - 100.0).abs() < f64::EPSILON);
        assert!((layer.height - 50.0).abs() < f64::EPSILON);
        assert_eq!(layer.fill, Rgb::new(0xdb, 0xea, 0xfe));
        assert_eq!(layer.value.as_deref(), Some("Rectangle"));
    }

    #[test]
    fn test_field_roundtrip() {
        let mut layer = Layer::new(LayerKind::Note, Rect::new(0.0, 0.0, 10.0, 10.0));
        layer.apply(&FieldValue::Width(42.0));
        layer.apply(&FieldValue::Value(None));
        assert_eq!(layer.field(LayerField::Width), FieldValue::Width(42.0));
        assert_eq!(layer.field(LayerField::Value), FieldValue::Value(None));
        assert_eq!(layer.fields().len(), LayerField::ALL.len());
    }

    #[test]
    fn test_ellipse_hit_test() {
        let layer = Layer::new(LayerKind::Ellipse, Rect::new(0.0, 0.0, 100.0, 50.0));
        assert!(layer.hit_test(Point::new(50.0, 25.0)));
        // Inside the bounding box, outside the ellipse.
        assert!(!layer.hit_test(Point::new(2.0, 2.0)));

        let rect = Layer::new(LayerKind::Rectangle, Rect::new(0.0, 0.0, 100.0, 50.0));
        assert!(rect.hit_test(Point::new(2.0, 2.0)));
    }

    #[test]
    fn test_hex_colors() {
        assert_eq!(Rgb::from_hex("#fef3c7"), Some(Rgb::new(0xfe, 0xf3, 0xc7)));
        assert_eq!(Rgb::from_hex("#fff"), Some(Rgb::white()));
        assert_eq!(Rgb::from_hex("fff"), None);
        assert_eq!(Rgb::new(1, 2, 255).to_hex(), "#0102ff");
    }

    #[test]
    fn test_peniko_conversion() {
        let rgb = Rgb::new(10, 20, 30);
        let color: Color = rgb.into();
        assert_eq!(Rgb::from(color), rgb);
    }
}
