//! Interchange graph node model
//!
//! The transport-agnostic object graph exchanged between applications. Each
//! node is a tagged record: a closed set of typed bodies, an open map of
//! extra values, and named child links that are either inline or detached
//! (independently identified, cache-eligible). Nodes are immutable once
//! handed to a transport and read-only during inbound conversion.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extras key carrying the render appearance attached by the dispatcher
pub const RENDER_APPEARANCE: &str = "renderAppearance";

/// One node in the interchange graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// External stable identifier linking this node to its host counterpart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(flatten)]
    pub body: NodeBody,
    /// Open map of additional named values
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extras: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildLink>,
}

/// Named link to a child node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildLink {
    pub name: String,
    pub attachment: Attachment,
    pub node: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attachment {
    Inline,
    Detached,
}

/// Typed node bodies; the declared type tag is the serialized `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodeBody {
    Collection {
        name: String,
    },
    Level {
        name: String,
        elevation: f64,
    },
    Wall {
        base_line: [[f64; 3]; 2],
        height: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level_id: Option<String>,
    },
    Floor {
        outline: Vec<[f64; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level_id: Option<String>,
    },
    Opening {
        outline: Vec<[f64; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_id: Option<String>,
    },
    ModelCurve {
        points: Vec<[f64; 3]>,
    },
    RoomBoundary {
        points: Vec<[f64; 3]>,
    },
    Instance {
        family: String,
        type_name: String,
        #[serde(default)]
        base_point: [f64; 3],
        #[serde(default)]
        rotation: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_id: Option<String>,
    },
    /// Inter-element connection entity; its `connected_ids` are dependency
    /// keys that must resolve to host elements before placement
    Connection {
        family: String,
        type_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_point: Option<[f64; 3]>,
        #[serde(default)]
        rotation: f64,
        #[serde(default)]
        connected_ids: Vec<String>,
    },
    /// Minimal wrap of any supported element, carrying its display mesh
    Generic {
        source_kind: String,
        #[serde(default)]
        display_mesh: Vec<[f64; 3]>,
    },
}

impl Node {
    pub fn new(body: NodeBody) -> Self {
        Self {
            application_id: None,
            body,
            extras: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self
    }

    /// The declared type tag
    pub fn type_tag(&self) -> &'static str {
        match self.body {
            NodeBody::Collection { .. } => "Collection",
            NodeBody::Level { .. } => "Level",
            NodeBody::Wall { .. } => "Wall",
            NodeBody::Floor { .. } => "Floor",
            NodeBody::Opening { .. } => "Opening",
            NodeBody::ModelCurve { .. } => "ModelCurve",
            NodeBody::RoomBoundary { .. } => "RoomBoundary",
            NodeBody::Instance { .. } => "Instance",
            NodeBody::Connection { .. } => "Connection",
            NodeBody::Generic { .. } => "Generic",
        }
    }

    /// Aggregate containers never receive a render appearance of their own
    pub fn is_aggregate(&self) -> bool {
        matches!(self.body, NodeBody::Collection { .. })
    }

    pub fn has_render_appearance(&self) -> bool {
        self.extras.contains_key(RENDER_APPEARANCE)
    }

    /// External identifiers this node requires before inbound placement
    pub fn dependency_keys(&self) -> &[String] {
        match &self.body {
            NodeBody::Connection { connected_ids, .. } => connected_ids,
            _ => &[],
        }
    }

    /// Points standing in for displayable geometry, if the node has any
    pub fn display_points(&self) -> Option<Vec<[f64; 3]>> {
        match &self.body {
            NodeBody::Generic { display_mesh, .. } if !display_mesh.is_empty() => {
                Some(display_mesh.clone())
            }
            NodeBody::Wall { base_line, .. } => Some(base_line.to_vec()),
            NodeBody::Floor { outline, .. } | NodeBody::Opening { outline, .. }
                if !outline.is_empty() =>
            {
                Some(outline.clone())
            }
            NodeBody::ModelCurve { points } | NodeBody::RoomBoundary { points }
                if !points.is_empty() =>
            {
                Some(points.clone())
            }
            NodeBody::Instance { base_point, .. } => Some(vec![*base_point]),
            NodeBody::Connection { base_point, .. } => base_point.map(|p| vec![p]),
            _ => None,
        }
    }

    pub fn push_child(&mut self, name: impl Into<String>, attachment: Attachment, node: Node) {
        self.children.push(ChildLink {
            name: name.into(),
            attachment,
            node,
        });
    }
}
