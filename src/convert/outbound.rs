//! Outbound dispatch: host elements to interchange nodes
//!
//! Specific routines are matched on the element kind, with category
//! discriminators checked ahead of the enclosing kind's default routine.
//! Elements without a specific routine fall back to a minimal generic wrap
//! when the capability predicate allows; kinds that are produced as a side
//! effect of converting their logical parent are an explicit skip.

use serde_json::json;
use tracing::debug;

use crate::convert::{Outcome, Session};
use crate::host::{Category, Document, Element, ElementId, ElementKind};
use crate::interchange::{Attachment, Node, NodeBody, RENDER_APPEARANCE};

/// Route one host element to its conversion routine
pub fn convert_element(session: &mut Session, doc: &Document, id: ElementId) -> Outcome<Node> {
    let Some(el) = doc.get(id) else {
        return Outcome::Failed(format!("element {id} no longer exists in the document"));
    };

    if el.linked && !session.settings.include_linked_models() {
        return Outcome::Skipped(
            "enable linked model support from the settings to send this element".to_string(),
        );
    }

    debug!(%id, kind = %el.kind, "converting element");

    let result = match (el.kind, el.category) {
        // category discriminators come before the kind's default routine
        (ElementKind::FamilyInstance, Category::Connections) => connection_to_node(doc, el),
        (ElementKind::FamilyInstance, _) => instance_to_node(doc, el),
        (ElementKind::ModelCurve, Category::RoomSeparation) => room_boundary_to_node(el),
        (ElementKind::ModelCurve, _) => model_curve_to_node(el),
        (ElementKind::Wall, _) => wall_to_node(doc, el),
        (ElementKind::Floor, _) => floor_to_node(doc, el),
        (ElementKind::Level, _) => level_to_node(el),
        (ElementKind::Opening, _) => opening_to_node(doc, el),
        (ElementKind::Stair, _) => stair_to_node(doc, el),
        // produced by their logical parent; selecting them directly is a skip
        (ElementKind::StairRun, _) | (ElementKind::StairLanding, _) => {
            return Outcome::Skipped(
                "stair runs and landings are sent as part of the parent stair".to_string(),
            );
        }
        (ElementKind::CurtainGridLine, _) => {
            return Outcome::Skipped(
                "curtain grid lines are sent as part of the parent curtain wall".to_string(),
            );
        }
        _ => {
            if el.is_supported() {
                generic_to_node(session, el)
            } else {
                return Outcome::Skipped(format!(
                    "sending {} elements is not supported yet",
                    el.kind
                ));
            }
        }
    };

    match result {
        Ok(mut node) => {
            attach_render_appearance(session, el, &mut node);
            Outcome::Converted(node)
        }
        Err(reason) => Outcome::Failed(reason),
    }
}

/// Best-effort render appearance, only where no conversion routine set one
/// and the result is not an aggregate container
fn attach_render_appearance(session: &Session, el: &Element, node: &mut Node) {
    if !session.settings.attach_render_appearance() {
        return;
    }
    if node.is_aggregate() || node.has_render_appearance() {
        return;
    }
    if let Some(material) = el.material.as_deref() {
        node.extras
            .insert(RENDER_APPEARANCE.to_string(), json!({ "name": material }));
    }
}

fn level_uid(doc: &Document, level: Option<ElementId>) -> Option<String> {
    level.and_then(|l| doc.get(l)).map(|el| el.uid.clone())
}

fn level_to_node(el: &Element) -> Result<Node, String> {
    Ok(Node::new(NodeBody::Level {
        name: el.name.clone(),
        elevation: el.base_point.map(|p| p[2]).unwrap_or(0.0),
    })
    .with_application_id(&el.uid))
}

fn wall_to_node(doc: &Document, el: &Element) -> Result<Node, String> {
    if el.footprint.len() < 2 {
        return Err(format!("wall '{}' has no location line", el.name));
    }
    Ok(Node::new(NodeBody::Wall {
        base_line: [el.footprint[0], el.footprint[1]],
        height: el.footprint.iter().map(|p| p[2]).fold(0.0, f64::max),
        level_id: level_uid(doc, el.level),
    })
    .with_application_id(&el.uid))
}

fn floor_to_node(doc: &Document, el: &Element) -> Result<Node, String> {
    if el.footprint.is_empty() {
        return Err(format!("floor '{}' has no outline", el.name));
    }
    Ok(Node::new(NodeBody::Floor {
        outline: el.footprint.clone(),
        level_id: level_uid(doc, el.level),
    })
    .with_application_id(&el.uid))
}

fn opening_to_node(doc: &Document, el: &Element) -> Result<Node, String> {
    if el.footprint.is_empty() {
        return Err(format!("opening '{}' has no outline", el.name));
    }
    Ok(Node::new(NodeBody::Opening {
        outline: el.footprint.clone(),
        host_id: el.host.and_then(|h| doc.get(h)).map(|h| h.uid.clone()),
    })
    .with_application_id(&el.uid))
}

fn model_curve_to_node(el: &Element) -> Result<Node, String> {
    if el.footprint.is_empty() {
        return Err(format!("model curve '{}' has no geometry", el.name));
    }
    Ok(Node::new(NodeBody::ModelCurve {
        points: el.footprint.clone(),
    })
    .with_application_id(&el.uid))
}

fn room_boundary_to_node(el: &Element) -> Result<Node, String> {
    if el.footprint.is_empty() {
        return Err(format!("room boundary '{}' has no geometry", el.name));
    }
    Ok(Node::new(NodeBody::RoomBoundary {
        points: el.footprint.clone(),
    })
    .with_application_id(&el.uid))
}

fn instance_to_node(doc: &Document, el: &Element) -> Result<Node, String> {
    Ok(Node::new(NodeBody::Instance {
        family: el.family.clone().unwrap_or_else(|| el.name.clone()),
        type_name: el.type_name.clone().unwrap_or_else(|| el.name.clone()),
        base_point: el.base_point.unwrap_or_default(),
        rotation: el.rotation,
        level_id: level_uid(doc, el.level),
        host_id: el.host.and_then(|h| doc.get(h)).map(|h| h.uid.clone()),
    })
    .with_application_id(&el.uid))
}

/// Connection entities reference their connected hosts by external
/// identifier and additionally carry them as detached children, so a
/// receiver can rebuild the hosts even when they were not selected
fn connection_to_node(doc: &Document, el: &Element) -> Result<Node, String> {
    let mut connected_ids = Vec::new();
    let mut node = Node::new(NodeBody::Connection {
        family: el.family.clone().unwrap_or_else(|| el.name.clone()),
        type_name: el.type_name.clone().unwrap_or_else(|| el.name.clone()),
        base_point: el.base_point,
        rotation: el.rotation,
        connected_ids: Vec::new(),
    });

    for &connected in &el.connected {
        let Some(host) = doc.get(connected) else {
            continue;
        };
        connected_ids.push(host.uid.clone());
        node.push_child(
            "connectedElements",
            Attachment::Detached,
            Node::new(NodeBody::Generic {
                source_kind: host.kind.to_string(),
                display_mesh: host.footprint.clone(),
            })
            .with_application_id(&host.uid),
        );
    }

    if let NodeBody::Connection {
        connected_ids: ids, ..
    } = &mut node.body
    {
        *ids = connected_ids;
    }
    Ok(node.with_application_id(&el.uid))
}

/// A stair carries its runs and landings as inline children
fn stair_to_node(doc: &Document, el: &Element) -> Result<Node, String> {
    let mut node = Node::new(NodeBody::Generic {
        source_kind: el.kind.to_string(),
        display_mesh: el.footprint.clone(),
    })
    .with_application_id(&el.uid);

    for part in doc.elements().filter(|e| {
        e.host == Some(el.id)
            && matches!(e.kind, ElementKind::StairRun | ElementKind::StairLanding)
    }) {
        node.push_child(
            "parts",
            Attachment::Inline,
            Node::new(NodeBody::Generic {
                source_kind: part.kind.to_string(),
                display_mesh: part.footprint.clone(),
            })
            .with_application_id(&part.uid),
        );
    }
    Ok(node)
}

fn generic_to_node(session: &Session, el: &Element) -> Result<Node, String> {
    let mut node = Node::new(NodeBody::Generic {
        source_kind: el.kind.to_string(),
        display_mesh: el.footprint.clone(),
    })
    .with_application_id(&el.uid);
    node.extras.insert("name".to_string(), json!(el.name));
    node.extras.insert(
        "detailLevel".to_string(),
        json!(format!("{:?}", session.settings.detail_level()).to_lowercase()),
    );
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NewElement;
    use crate::settings::Settings;

    fn session(settings: &Settings) -> Session<'_> {
        Session::new(settings)
    }

    fn wall(doc: &mut Document, name: &str) -> ElementId {
        let mut spec = NewElement::new(ElementKind::Wall, name);
        spec.footprint = vec![[0.0, 0.0, 0.0], [4.0, 0.0, 3.0]];
        doc.add(spec)
    }

    #[test]
    fn test_category_discriminator_beats_kind_default() {
        let mut doc = Document::new();
        let host = wall(&mut doc, "host");
        let mut spec = NewElement::new(ElementKind::FamilyInstance, "conn");
        spec.category = Category::Connections;
        spec.family = Some("CF".into());
        spec.type_name = Some("C1".into());
        let conn = doc.add(spec);
        doc.get_mut(conn).unwrap().connected.push(host);

        let settings = Settings::empty();
        let mut session = session(&settings);
        match convert_element(&mut session, &doc, conn) {
            Outcome::Converted(node) => {
                assert_eq!(node.type_tag(), "Connection");
                let host_uid = doc.get(host).unwrap().uid.clone();
                assert_eq!(node.dependency_keys(), [host_uid]);
                assert_eq!(node.children.len(), 1);
                assert_eq!(node.children[0].attachment, Attachment::Detached);
            }
            other => panic!("expected Converted, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_instance_stays_instance() {
        let mut doc = Document::new();
        let mut spec = NewElement::new(ElementKind::FamilyInstance, "desk");
        spec.base_point = Some([1.0, 2.0, 0.0]);
        let id = doc.add(spec);

        let settings = Settings::empty();
        let mut session = session(&settings);
        match convert_element(&mut session, &doc, id) {
            Outcome::Converted(node) => assert_eq!(node.type_tag(), "Instance"),
            other => panic!("expected Converted, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_skip_kinds() {
        let mut doc = Document::new();
        let run = doc.add(NewElement::new(ElementKind::StairRun, "run"));
        let grid = doc.add(NewElement::new(ElementKind::CurtainGridLine, "cgl"));

        let settings = Settings::empty();
        let mut session = session(&settings);
        assert!(matches!(
            convert_element(&mut session, &doc, run),
            Outcome::Skipped(_)
        ));
        assert!(matches!(
            convert_element(&mut session, &doc, grid),
            Outcome::Skipped(_)
        ));
    }

    #[test]
    fn test_linked_elements_skip_unless_enabled() {
        let mut doc = Document::new();
        let id = wall(&mut doc, "linked wall");
        doc.get_mut(id).unwrap().linked = true;

        let settings = Settings::empty();
        let mut session = session(&settings);
        assert!(matches!(
            convert_element(&mut session, &doc, id),
            Outcome::Skipped(_)
        ));

        let enabled = Settings::from_pairs([(crate::settings::KEY_LINKED_MODELS, "true")]);
        let mut session = Session::new(&enabled);
        assert!(matches!(
            convert_element(&mut session, &doc, id),
            Outcome::Converted(_)
        ));
    }

    #[test]
    fn test_render_appearance_attached_from_material() {
        let mut doc = Document::new();
        let id = wall(&mut doc, "painted");
        doc.get_mut(id).unwrap().material = Some("Concrete".into());

        let settings = Settings::empty();
        let mut session = session(&settings);
        match convert_element(&mut session, &doc, id) {
            Outcome::Converted(node) => {
                assert!(node.has_render_appearance());
                assert_eq!(node.extras[RENDER_APPEARANCE]["name"], "Concrete");
            }
            other => panic!("expected Converted, got {:?}", other),
        }
    }

    #[test]
    fn test_broken_geometry_fails_with_reason() {
        let mut doc = Document::new();
        let id = doc.add(NewElement::new(ElementKind::Wall, "no line"));

        let settings = Settings::empty();
        let mut session = session(&settings);
        match convert_element(&mut session, &doc, id) {
            Outcome::Failed(reason) => assert!(reason.contains("location line")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_kind_without_geometry_skips() {
        let mut doc = Document::new();
        let id = doc.add(NewElement::new(ElementKind::Group, "empty group"));

        let settings = Settings::empty();
        let mut session = session(&settings);
        match convert_element(&mut session, &doc, id) {
            Outcome::Skipped(reason) => assert!(reason.contains("not supported")),
            other => panic!("expected Skipped, got {:?}", other),
        }
    }
}
