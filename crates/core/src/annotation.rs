//! Annotation data model
//!
//! Annotations are drawn over an exhibit image in image-local pixel space.
//! Each annotation is a freehand drawing, a shape outline, or a text note
//! anchored at a point.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for an annotation
///
/// Generated using UUID v4; stable across export and import.
pub type AnnotationId = uuid::Uuid;

/// Image-local coordinate
///
/// Origin is the top-left corner of the image, units are source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// Create a new point
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another point
    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Kind of annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    /// Freehand stroke
    Drawing,
    /// Outline such as a rectangle or arrow
    Shape,
    /// Text note
    Text,
}

impl AnnotationKind {
    /// Minimum number of points an annotation of this kind needs
    pub fn min_points(self) -> usize {
        match self {
            AnnotationKind::Drawing | AnnotationKind::Shape => 2,
            AnnotationKind::Text => 1,
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnnotationKind::Drawing => "drawing",
            AnnotationKind::Shape => "shape",
            AnnotationKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// RGBA color, serialized as `#rrggbb` or `#rrggbbaa`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    /// Create a new color
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        match digits.len() {
            3 => {
                let short = |i: usize| {
                    u8::from_str_radix(digits.get(i..i + 1)?, 16)
                        .ok()
                        .map(|v| v * 17)
                };
                Some(Self::rgb(short(0)?, short(1)?, short(2)?))
            }
            6 => Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Self::new(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => None,
        }
    }

    /// Hex form, with alpha only when not opaque
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| format!("invalid color: {value:?}"))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// Visual styling for an annotation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnotationStyle {
    pub color: Color,

    /// Stroke width in pixels
    pub width: f32,

    /// Opacity (0.0 = transparent, 1.0 = opaque)
    pub opacity: f32,
}

impl AnnotationStyle {
    /// Create a style
    pub fn new(color: Color, width: f32, opacity: f32) -> Self {
        Self {
            color,
            width,
            opacity,
        }
    }

    /// Red 2px stroke, the usual markup style
    pub fn red_markup() -> Self {
        Self::new(Color::RED, 2.0, 1.0)
    }

    /// Wide translucent yellow stroke
    pub fn highlighter() -> Self {
        Self::new(Color::YELLOW, 12.0, 0.4)
    }
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self::new(Color::BLACK, 2.0, 1.0)
    }
}

/// Errors for annotation validation and store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnnotationError {
    #[error("{kind} annotation needs at least {required} points, got {actual}")]
    TooFewPoints {
        kind: AnnotationKind,
        required: usize,
        actual: usize,
    },

    #[error("text annotation has no text")]
    MissingText,

    #[error("{kind} annotation must not carry text")]
    UnexpectedText { kind: AnnotationKind },

    #[error("point {index} is not a finite coordinate")]
    InvalidPoint { index: usize },

    #[error("opacity {0} is outside 0.0..=1.0")]
    InvalidOpacity(f32),

    #[error("stroke width {0} is negative or not finite")]
    InvalidWidth(f32),

    #[error("annotation not found: {0}")]
    NotFound(AnnotationId),

    #[error("duplicate annotation id: {0}")]
    DuplicateId(AnnotationId),
}

/// Result type for annotation operations
pub type AnnotationResult<T> = Result<T, AnnotationError>;

/// A single annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,

    #[serde(rename = "type")]
    pub kind: AnnotationKind,

    /// Ordered points; a text annotation is anchored at its first point
    pub points: Vec<Point>,

    pub style: AnnotationStyle,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Annotation {
    /// Create a freehand drawing
    pub fn drawing(points: Vec<Point>, style: AnnotationStyle) -> Self {
        Self::with_kind(AnnotationKind::Drawing, points, style, None)
    }

    /// Create a shape outline
    pub fn shape(points: Vec<Point>, style: AnnotationStyle) -> Self {
        Self::with_kind(AnnotationKind::Shape, points, style, None)
    }

    /// Create a text note at `position`
    pub fn text(position: Point, text: impl Into<String>, style: AnnotationStyle) -> Self {
        Self::with_kind(
            AnnotationKind::Text,
            vec![position],
            style,
            Some(text.into()),
        )
    }

    fn with_kind(
        kind: AnnotationKind,
        points: Vec<Point>,
        style: AnnotationStyle,
        text: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            kind,
            points,
            style,
            text,
        }
    }

    /// Check the shape invariants for this annotation's kind
    ///
    /// Drawings and shapes need two points, text needs one point and a
    /// non-empty string. Only text annotations may carry text.
    pub fn validate(&self) -> AnnotationResult<()> {
        let required = self.kind.min_points();
        if self.points.len() < required {
            return Err(AnnotationError::TooFewPoints {
                kind: self.kind,
                required,
                actual: self.points.len(),
            });
        }
        if let Some(index) = self.points.iter().position(|p| !p.is_finite()) {
            return Err(AnnotationError::InvalidPoint { index });
        }

        match (self.kind, self.text.as_deref()) {
            (AnnotationKind::Text, None) => return Err(AnnotationError::MissingText),
            (AnnotationKind::Text, Some(text)) if text.trim().is_empty() => {
                return Err(AnnotationError::MissingText)
            }
            (AnnotationKind::Text, Some(_)) | (_, None) => {}
            (kind, Some(_)) => return Err(AnnotationError::UnexpectedText { kind }),
        }

        if !(0.0..=1.0).contains(&self.style.opacity) {
            return Err(AnnotationError::InvalidOpacity(self.style.opacity));
        }
        if !self.style.width.is_finite() || self.style.width < 0.0 {
            return Err(AnnotationError::InvalidWidth(self.style.width));
        }
        Ok(())
    }

    /// Bounding box as `(min_x, min_y, max_x, max_y)`
    ///
    /// Returns `None` for an annotation without points.
    pub fn bounding_box(&self) -> Option<(f32, f32, f32, f32)> {
        let first = self.points.first()?;
        let init = (first.x, first.y, first.x, first.y);
        Some(self.points.iter().skip(1).fold(
            init,
            |(min_x, min_y, max_x, max_y), p| {
                (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
            },
        ))
    }

    /// Apply a patch, returning the modified copy
    ///
    /// The id and kind never change.
    pub fn patched(&self, patch: &AnnotationPatch) -> Self {
        let mut next = self.clone();
        if let Some(points) = &patch.points {
            next.points = points.clone();
        }
        if let Some(style) = patch.style {
            next.style = style;
        }
        if let Some(text) = &patch.text {
            next.text = text.clone();
        }
        next
    }
}

/// Partial update for an existing annotation
///
/// `None` fields are left unchanged. `text: Some(None)` removes the text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationPatch {
    pub points: Option<Vec<Point>>,
    pub style: Option<AnnotationStyle>,
    pub text: Option<Option<String>>,
}

impl AnnotationPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the points
    pub fn points(mut self, points: Vec<Point>) -> Self {
        self.points = Some(points);
        self
    }

    /// Replace the style
    pub fn style(mut self, style: AnnotationStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// Replace the text
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(Some(text.into()));
        self
    }

    /// Check whether applying this patch would change nothing
    pub fn is_empty(&self) -> bool {
        self.points.is_none() && self.style.is_none() && self.text.is_none()
    }
}
