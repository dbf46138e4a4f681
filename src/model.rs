use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AnnotatorError, AnnotatorResult};

/// Upper bound of the normalized model coordinate space
pub const MODEL_SCALE: u16 = 1000;

/// Named-entity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "PERS", alias = "PERSON")]
    Person,
    #[serde(rename = "LOC", alias = "LOCATION")]
    Location,
    #[serde(rename = "ORG", alias = "ORGANIZATION")]
    Organization,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Person, Category::Location, Category::Organization];

    /// Short tag used in sidecar records and model prompts
    pub fn tag(&self) -> &'static str {
        match self {
            Category::Person => "PERS",
            Category::Location => "LOC",
            Category::Organization => "ORG",
        }
    }

    /// Fill color of rendered boxes, `#rrggbb`
    pub fn color(&self) -> &'static str {
        match self {
            Category::Person => "#e74c3c",
            Category::Location => "#2ecc71",
            Category::Organization => "#3498db",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_uppercase().as_str() {
            "PERS" | "PER" | "PERSON" => Some(Category::Person),
            "LOC" | "LOCATION" => Some(Category::Location),
            "ORG" | "ORGANIZATION" | "ORGANISATION" => Some(Category::Organization),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One extracted entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub category: Category,
    pub surface_form: String,
}

/// Entities of one page, grouped by category.
///
/// Boxes are correlated to entities by position in [`EntitySet::flatten`],
/// so insertion order inside each category is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitySet(BTreeMap<Category, Vec<String>>);

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category: Category, surface_form: impl Into<String>) {
        self.0.entry(category).or_default().push(surface_form.into());
    }

    pub fn names(&self, category: Category) -> &[String] {
        self.0.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattened sequence in category order, then insertion order
    pub fn flatten(&self) -> Vec<EntityRecord> {
        Category::ALL
            .iter()
            .flat_map(|category| {
                self.names(*category).iter().map(move |name| EntityRecord {
                    category: *category,
                    surface_form: name.clone(),
                })
            })
            .collect()
    }
}

/// Box corners in normalized model space, `[0, 1000]` on both axes.
///
/// Serialized as `[yMin, xMin, yMax, xMax]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i64; 4]", into = "[i64; 4]")]
pub struct ModelRect {
    pub y_min: u16,
    pub x_min: u16,
    pub y_max: u16,
    pub x_max: u16,
}

impl ModelRect {
    pub fn new(y_min: u16, x_min: u16, y_max: u16, x_max: u16) -> AnnotatorResult<Self> {
        let rect = Self {
            y_min,
            x_min,
            y_max,
            x_max,
        };
        rect.validate()?;
        Ok(rect)
    }

    /// Build from real-valued corners: rounded, clamped and reordered
    pub fn from_f64_clamped(y_min: f64, x_min: f64, y_max: f64, x_max: f64) -> Self {
        let clamp = |v: f64| -> u16 {
            if v.is_nan() {
                0
            } else {
                v.round().clamp(0.0, f64::from(MODEL_SCALE)) as u16
            }
        };
        let (y0, y1) = (clamp(y_min), clamp(y_max));
        let (x0, x1) = (clamp(x_min), clamp(x_max));
        Self {
            y_min: y0.min(y1),
            x_min: x0.min(x1),
            y_max: y0.max(y1),
            x_max: x0.max(x1),
        }
    }

    fn validate(&self) -> AnnotatorResult<()> {
        let coords = [self.y_min, self.x_min, self.y_max, self.x_max];
        if coords.iter().any(|c| *c > MODEL_SCALE) {
            return Err(AnnotatorError::InvalidCoordinates {
                message: format!("{:?} exceeds {}", coords, MODEL_SCALE),
            });
        }
        if self.y_min > self.y_max || self.x_min > self.x_max {
            return Err(AnnotatorError::InvalidCoordinates {
                message: format!("{:?} has inverted corners", coords),
            });
        }
        Ok(())
    }
}

impl TryFrom<[i64; 4]> for ModelRect {
    type Error = String;

    fn try_from(value: [i64; 4]) -> Result<Self, Self::Error> {
        let component = |v: i64| -> Result<u16, String> {
            if (0..=i64::from(MODEL_SCALE)).contains(&v) {
                Ok(v as u16)
            } else {
                Err(format!("coordinate {} outside [0, {}]", v, MODEL_SCALE))
            }
        };
        let [y_min, x_min, y_max, x_max] = value;
        ModelRect::new(
            component(y_min)?,
            component(x_min)?,
            component(y_max)?,
            component(x_max)?,
        )
        .map_err(|e| e.to_string())
    }
}

impl From<ModelRect> for [i64; 4] {
    fn from(rect: ModelRect) -> Self {
        [
            i64::from(rect.y_min),
            i64::from(rect.x_min),
            i64::from(rect.y_max),
            i64::from(rect.x_max),
        ]
    }
}

/// Located entity box as persisted in the sidecar record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub name: String,
    pub category: Category,
    pub coords: ModelRect,
}
