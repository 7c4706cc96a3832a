//! In-memory host document model
//!
//! Stands in for the authoring application's native document: element
//! storage, attribute get/set, creation primitives with four placement
//! strategies, and scoped transactions with snapshot rollback. Handles
//! (`ElementId`) are only valid for the lifetime of the open document;
//! cross-session identity travels through the external identifier attribute.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HostError;

/// Attribute key under which the external identifier is persisted on an element.
pub const ATTR_EXTERNAL_ID: &str = "Modelport.ApplicationId";

/// Opaque handle to a native element, valid for the open document only
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Native element kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Wall,
    Floor,
    Ceiling,
    Roof,
    Level,
    Grid,
    Opening,
    ModelCurve,
    Room,
    Stair,
    StairRun,
    StairLanding,
    Railing,
    CurtainGridLine,
    FamilyInstance,
    DirectShape,
    Group,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Wall => "wall",
            ElementKind::Floor => "floor",
            ElementKind::Ceiling => "ceiling",
            ElementKind::Roof => "roof",
            ElementKind::Level => "level",
            ElementKind::Grid => "grid",
            ElementKind::Opening => "opening",
            ElementKind::ModelCurve => "model curve",
            ElementKind::Room => "room",
            ElementKind::Stair => "stair",
            ElementKind::StairRun => "stair run",
            ElementKind::StairLanding => "stair landing",
            ElementKind::Railing => "railing",
            ElementKind::CurtainGridLine => "curtain grid line",
            ElementKind::FamilyInstance => "family instance",
            ElementKind::DirectShape => "direct shape",
            ElementKind::Group => "group",
        };
        f.write_str(name)
    }
}

/// Secondary category discriminator for kinds with overlapping native types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    General,
    Connections,
    RoomSeparation,
    SpaceSeparation,
}

/// A native element in the host document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    /// Stable unique id, assigned at creation and persisted with the document
    pub uid: String,
    pub kind: ElementKind,
    #[serde(default)]
    pub category: Category,
    pub name: String,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub level: Option<ElementId>,
    #[serde(default)]
    pub host: Option<ElementId>,
    /// Elements this one connects, for connection-like entities
    #[serde(default)]
    pub connected: Vec<ElementId>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Geometry placeholder; numeric conversion is delegated elsewhere
    #[serde(default)]
    pub footprint: Vec<[f64; 3]>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub base_point: Option<[f64; 3]>,
    #[serde(default)]
    pub rotation: f64,
    /// True when the element comes from a linked model
    #[serde(default)]
    pub linked: bool,
}

impl Element {
    pub fn external_id(&self) -> Option<&str> {
        self.attributes.get(ATTR_EXTERNAL_ID).map(String::as_str)
    }

    pub fn has_geometry(&self) -> bool {
        !self.footprint.is_empty()
    }

    /// Capability predicate for the generic fallback conversion path
    pub fn is_supported(&self) -> bool {
        self.has_geometry() || self.base_point.is_some()
    }
}

/// Specification for a new element, independent of placement
#[derive(Debug, Clone)]
pub struct NewElement {
    pub kind: ElementKind,
    pub category: Category,
    pub name: String,
    pub family: Option<String>,
    pub type_name: Option<String>,
    pub footprint: Vec<[f64; 3]>,
    pub material: Option<String>,
    pub base_point: Option<[f64; 3]>,
    pub rotation: f64,
}

impl NewElement {
    pub fn new(kind: ElementKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            category: Category::General,
            name: name.into(),
            family: None,
            type_name: None,
            footprint: Vec::new(),
            material: None,
            base_point: None,
            rotation: 0.0,
        }
    }
}

/// Placement strategy for element creation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Attached to an existing element
    HostedByElement(ElementId),
    /// Projected onto a face of an existing element's geometry
    OnFace { host: ElementId, point: [f64; 3] },
    /// Placed relative to a level
    OnLevel(ElementId),
    /// Free-standing
    Free,
}

/// The in-memory host document
///
/// Single-writer: all mutation goes through `&mut self` on one logical thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    elements: Vec<Element>,
    next_id: u64,
    #[serde(skip)]
    tx: Vec<TxScope>,
}

#[derive(Debug, Clone)]
struct TxScope {
    name: String,
    elements: Vec<Element>,
    next_id: u64,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn ids(&self) -> Vec<ElementId> {
        self.elements.iter().map(|e| e.id).collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.id == id)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.get(id).is_some()
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.uid == uid)
    }

    /// All elements whose attribute `key` equals `value`, in document order
    pub fn find_by_attribute(&self, key: &str, value: &str) -> Vec<ElementId> {
        self.elements
            .iter()
            .filter(|e| e.attributes.get(key).map(String::as_str) == Some(value))
            .map(|e| e.id)
            .collect()
    }

    pub fn attribute(&self, id: ElementId, key: &str) -> Option<&str> {
        self.get(id)?.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(
        &mut self,
        id: ElementId,
        key: &str,
        value: &str,
    ) -> Result<(), HostError> {
        let el = self.get_mut(id).ok_or(HostError::NotFound(id))?;
        el.attributes.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Create an element with the given placement strategy.
    ///
    /// Each strategy validates its own preconditions and fails without
    /// touching the document when they do not hold.
    pub fn create(&mut self, spec: NewElement, placement: Placement) -> Result<ElementId, HostError> {
        let (level, host) = match placement {
            Placement::HostedByElement(h) => {
                let host_el = self.get(h).ok_or(HostError::HostNotFound(h))?;
                (host_el.level, Some(h))
            }
            Placement::OnFace { host, .. } => {
                let host_el = self.get(host).ok_or(HostError::HostNotFound(host))?;
                if !host_el.has_geometry() {
                    return Err(HostError::NoFaceOnHost(host));
                }
                (host_el.level, Some(host))
            }
            Placement::OnLevel(l) => {
                let level_el = self.get(l).ok_or(HostError::NotFound(l))?;
                if level_el.kind != ElementKind::Level {
                    return Err(HostError::NotALevel(l));
                }
                (Some(l), None)
            }
            Placement::Free => (None, None),
        };

        let base_point = match placement {
            // Face placement projects the requested point onto the host
            Placement::OnFace { point, .. } => Some(point),
            _ => spec.base_point,
        };

        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.elements.push(Element {
            id,
            uid: uuid::Uuid::new_v4().to_string(),
            kind: spec.kind,
            category: spec.category,
            name: spec.name,
            family: spec.family,
            type_name: spec.type_name,
            level,
            host,
            connected: Vec::new(),
            attributes: BTreeMap::new(),
            footprint: spec.footprint,
            material: spec.material,
            base_point,
            rotation: spec.rotation,
            linked: false,
        });
        Ok(id)
    }

    /// Convenience for seeding documents: free placement, panics never
    pub fn add(&mut self, spec: NewElement) -> ElementId {
        self.create(spec, Placement::Free)
            .expect("free placement cannot fail")
    }

    pub fn delete(&mut self, id: ElementId) -> Result<(), HostError> {
        let before = self.elements.len();
        self.elements.retain(|e| e.id != id);
        if self.elements.len() == before {
            return Err(HostError::NotFound(id));
        }
        // detach dangling references
        for el in &mut self.elements {
            if el.level == Some(id) {
                el.level = None;
            }
            if el.host == Some(id) {
                el.host = None;
            }
            el.connected.retain(|&c| c != id);
        }
        Ok(())
    }

    /// The level whose elevation is nearest to `z`
    pub fn nearest_level(&self, z: f64) -> Option<ElementId> {
        self.elements
            .iter()
            .filter(|e| e.kind == ElementKind::Level)
            .min_by(|a, b| {
                let da = (a.base_point.map(|p| p[2]).unwrap_or(0.0) - z).abs();
                let db = (b.base_point.map(|p| p[2]).unwrap_or(0.0) - z).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|e| e.id)
    }

    /// True while inside a transaction scope
    pub fn is_modifiable(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Run `f` inside a scoped transaction.
    ///
    /// Opens a sub-scope if a transaction is already active, otherwise an
    /// owned one. Commits on `Ok`, restores the snapshot on `Err`.
    pub fn transaction<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Document) -> Result<T, HostError>,
    ) -> Result<T, HostError> {
        if self.is_modifiable() {
            debug!(name, "sub-transaction");
        } else {
            debug!(name, "transaction");
        }
        self.tx.push(TxScope {
            name: name.to_string(),
            elements: self.elements.clone(),
            next_id: self.next_id,
        });
        match f(self) {
            Ok(value) => {
                self.tx.pop();
                Ok(value)
            }
            Err(e) => {
                let scope = self.tx.pop().expect("transaction scope present");
                debug!(name = %scope.name, error = %e, "transaction rolled back");
                self.elements = scope.elements;
                self.next_id = scope.next_id;
                Err(e)
            }
        }
    }
}
