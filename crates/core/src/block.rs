//! Block data model
//!
//! Primitive blocks as delivered by the document-analysis service. Field
//! names on the wire are PascalCase (`Id`, `BlockType`, `Geometry`, ...);
//! serialized output uses the Rust field names.

use serde::{Deserialize, Deserializer, Serialize};

/// Unique identifier of a block within one document.
pub type BlockId = String;

/// Kind tag of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockKind {
    Page,
    Line,
    Word,
    Table,
    TableTitle,
    TableFooter,
    Cell,
    MergedCell,
    KeyValueSet,
    SelectionElement,
    /// Block types this crate does not reassemble (layout, query, signature...).
    #[serde(other)]
    Other,
}

impl BlockKind {
    /// Leaf content carried by tables and forms alike.
    pub fn is_leaf(&self) -> bool {
        matches!(self, BlockKind::Word | BlockKind::SelectionElement)
    }
}

/// Entity tag of a `KEY_VALUE_SET` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Key,
    Value,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStatus {
    Selected,
    NotSelected,
}

impl SelectionStatus {
    /// Literal used when a selection element is folded into a value.
    pub fn as_literal(&self) -> &'static str {
        match self {
            SelectionStatus::Selected => "TRUE",
            SelectionStatus::NotSelected => "FALSE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Child,
    Value,
    TableTitle,
    TableFooter,
    MergedCell,
    #[serde(other)]
    Other,
}

/// Ordered list of block ids a parent references under one relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "PascalCase"))]
pub struct Relationship {
    #[serde(rename(deserialize = "Type"))]
    pub kind: RelationshipType,
    #[serde(default)]
    pub ids: Vec<BlockId>,
}

/// Axis-aligned box in fractions of the page width/height.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "PascalCase"))]
pub struct BoundingBox {
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

const EPSILON: f64 = 1e-9;

impl BoundingBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox::new(left, top, right - left, bottom - top)
    }

    /// Whether `other` lies inside `self`, tolerating float rounding.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.left <= other.left + EPSILON
            && self.top <= other.top + EPSILON
            && self.right() + EPSILON >= other.right()
            && self.bottom() + EPSILON >= other.bottom()
    }
}

/// One atomic unit returned by the document-analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "PascalCase"))]
pub struct RawBlock {
    pub id: BlockId,
    #[serde(rename(deserialize = "BlockType"))]
    pub kind: BlockKind,
    /// Normalized to [0, 1]; the service reports 0-100.
    #[serde(default, deserialize_with = "percent_to_unit")]
    pub confidence: f64,
    #[serde(
        default,
        rename(deserialize = "Geometry"),
        deserialize_with = "geometry_bounds"
    )]
    pub bounds: BoundingBox,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_status: Option<SelectionStatus>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_span: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_span: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<EntityType>,
}

fn first_page() -> u32 {
    1
}

fn percent_to_unit<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok((raw / 100.0).clamp(0.0, 1.0))
}

fn geometry_bounds<'de, D>(deserializer: D) -> Result<BoundingBox, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Geometry {
        #[serde(default)]
        bounding_box: BoundingBox,
    }

    Geometry::deserialize(deserializer).map(|g| g.bounding_box)
}

impl RawBlock {
    /// Bare block of the given kind on page 1; the `with_*` methods fill the rest.
    pub fn new(id: impl Into<BlockId>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            kind,
            confidence: 1.0,
            bounds: BoundingBox::default(),
            relationships: Vec::new(),
            text: None,
            selection_status: None,
            page: 1,
            row_index: None,
            column_index: None,
            row_span: None,
            column_span: None,
            entity_types: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_relationship<I, S>(mut self, kind: RelationshipType, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<BlockId>,
    {
        self.relationships.push(Relationship {
            kind,
            ids: ids.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Shorthand for a `CHILD` relationship.
    pub fn with_children<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<BlockId>,
    {
        self.with_relationship(RelationshipType::Child, ids)
    }

    pub fn with_entity(mut self, entity: EntityType) -> Self {
        self.entity_types.push(entity);
        self
    }

    pub fn with_selection(mut self, status: SelectionStatus) -> Self {
        self.selection_status = Some(status);
        self
    }

    pub fn with_cell(mut self, row: u32, column: u32) -> Self {
        self.row_index = Some(row);
        self.column_index = Some(column);
        self.row_span = Some(1);
        self.column_span = Some(1);
        self
    }

    pub fn with_span(mut self, rows: u32, columns: u32) -> Self {
        self.row_span = Some(rows);
        self.column_span = Some(columns);
        self
    }

    /// Every referenced id, in declared order across all relationships.
    pub fn child_ids(&self) -> impl DoubleEndedIterator<Item = &BlockId> {
        self.relationships.iter().flat_map(|r| r.ids.iter())
    }

    /// Ids referenced under a single relationship type.
    pub fn ids_of(&self, kind: RelationshipType) -> impl Iterator<Item = &BlockId> {
        self.relationships
            .iter()
            .filter(move |r| r.kind == kind)
            .flat_map(|r| r.ids.iter())
    }

    pub fn has_entity(&self, entity: EntityType) -> bool {
        self.kind == BlockKind::KeyValueSet && self.entity_types.contains(&entity)
    }

    pub fn is_key(&self) -> bool {
        self.has_entity(EntityType::Key)
    }

    pub fn is_value(&self) -> bool {
        self.has_entity(EntityType::Value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_wire_block() {
        let json = r#"{
            "BlockType": "CELL",
            "Confidence": 87.5,
            "RowIndex": 2,
            "ColumnIndex": 3,
            "RowSpan": 1,
            "ColumnSpan": 2,
            "Geometry": {
                "BoundingBox": {"Width": 0.2, "Height": 0.05, "Left": 0.1, "Top": 0.4},
                "Polygon": [{"X": 0.1, "Y": 0.4}]
            },
            "Id": "cell-1",
            "Relationships": [{"Type": "CHILD", "Ids": ["w-1", "w-2"]}],
            "Page": 4
        }"#;

        let block: RawBlock = serde_json::from_str(json).unwrap();

        assert_eq!(block.id, "cell-1");
        assert_eq!(block.kind, BlockKind::Cell);
        assert!((block.confidence - 0.875).abs() < 1e-12);
        assert_eq!(block.bounds, BoundingBox::new(0.1, 0.4, 0.2, 0.05));
        assert_eq!(block.page, 4);
        assert_eq!(block.row_index, Some(2));
        assert_eq!(block.column_span, Some(2));
        assert_eq!(
            block.child_ids().cloned().collect::<Vec<_>>(),
            vec!["w-1", "w-2"]
        );
    }

    #[test]
    fn test_deserialize_key_value_set_and_defaults() {
        let json = r#"{
            "BlockType": "KEY_VALUE_SET",
            "Id": "kv-1",
            "EntityTypes": ["KEY"],
            "Relationships": [
                {"Type": "VALUE", "Ids": ["v-1"]},
                {"Type": "CHILD", "Ids": ["w-9"]}
            ]
        }"#;

        let block: RawBlock = serde_json::from_str(json).unwrap();

        assert!(block.is_key());
        assert!(!block.is_value());
        assert_eq!(block.page, 1);
        assert_eq!(block.confidence, 0.0);
        assert_eq!(
            block.ids_of(RelationshipType::Value).collect::<Vec<_>>(),
            vec!["v-1"]
        );
        assert_eq!(
            block.ids_of(RelationshipType::Child).collect::<Vec<_>>(),
            vec!["w-9"]
        );
    }

    #[test]
    fn test_unknown_block_type_is_other() {
        let json = r#"{"BlockType": "LAYOUT_TEXT", "Id": "l-1"}"#;
        let block: RawBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.kind, BlockKind::Other);
    }

    #[test]
    fn test_union_covers_both_boxes() {
        let a = BoundingBox::new(0.1, 0.2, 0.3, 0.1);
        let b = BoundingBox::new(0.35, 0.05, 0.4, 0.1);
        let u = a.union(&b);

        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert!((u.left - 0.1).abs() < 1e-12);
        assert!((u.top - 0.05).abs() < 1e-12);
        assert!((u.right() - 0.75).abs() < 1e-12);
        assert!((u.bottom() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_selection_literals() {
        assert_eq!(SelectionStatus::Selected.as_literal(), "TRUE");
        assert_eq!(SelectionStatus::NotSelected.as_literal(), "FALSE");
    }
}
