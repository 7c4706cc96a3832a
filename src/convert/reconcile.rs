//! Upsert reconciler
//!
//! Decides, per inbound node, whether to create a new host element, mutate
//! an existing one in place, or delete-and-recreate it after an incompatible
//! kind change. Every mutation runs inside a scoped transaction; errors from
//! the host API stay at this layer and become Failed report entries upstream.

use tracing::debug;

use crate::convert::Disposition;
use crate::error::HostError;
use crate::host::{Document, ElementId, NewElement, Placement, ATTR_EXTERNAL_ID};
use crate::identity::IdentityIndex;

/// Create-or-update against the document.
///
/// Placement strategies are attempted in the given preference order; the
/// first that succeeds wins. The external identifier is re-stamped after
/// either path, guarding against stamps lost to host-side type changes.
pub fn upsert(
    doc: &mut Document,
    index: &mut IdentityIndex,
    external_id: Option<&str>,
    spec: NewElement,
    placements: &[Placement],
) -> Result<(ElementId, Disposition), HostError> {
    let existing = external_id
        .map(|id| index.resolve(id, doc))
        .unwrap_or_default();

    let tx_name = format!("receive {}", spec.kind);
    doc.transaction(&tx_name, |doc| {
        if let Some(&handle) = existing.first() {
            if let Some(current) = doc.get(handle) {
                if current.kind == spec.kind {
                    apply_update(doc, handle, &spec)?;
                    stamp(doc, handle, external_id)?;
                    return Ok((handle, Disposition::Updated));
                }
                // incompatible kind change: recreate
                debug!(
                    %handle,
                    from = %current.kind,
                    to = %spec.kind,
                    "existing element has incompatible kind; recreating"
                );
                doc.delete(handle)?;
            }
        }

        let created = create_first_ok(doc, &spec, placements)?;
        stamp(doc, created, external_id)?;
        Ok((created, Disposition::Created))
    })
}

/// Mutate an existing element's position/type/parameters in place
fn apply_update(doc: &mut Document, handle: ElementId, spec: &NewElement) -> Result<(), HostError> {
    let el = doc.get_mut(handle).ok_or(HostError::NotFound(handle))?;
    el.name = spec.name.clone();
    el.category = spec.category;
    el.family = spec.family.clone();
    el.type_name = spec.type_name.clone();
    if !spec.footprint.is_empty() {
        el.footprint = spec.footprint.clone();
    }
    if spec.material.is_some() {
        el.material = spec.material.clone();
    }
    if spec.base_point.is_some() {
        el.base_point = spec.base_point;
    }
    el.rotation = spec.rotation;
    Ok(())
}

fn create_first_ok(
    doc: &mut Document,
    spec: &NewElement,
    placements: &[Placement],
) -> Result<ElementId, HostError> {
    let mut last_error: Option<HostError> = None;
    for &placement in placements {
        match doc.create(spec.clone(), placement) {
            Ok(id) => return Ok(id),
            Err(e) => {
                debug!(name = %spec.name, ?placement, error = %e, "placement attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(HostError::PlacementExhausted {
        name: spec.name.clone(),
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no placement strategies provided".to_string()),
    })
}

fn stamp(doc: &mut Document, handle: ElementId, external_id: Option<&str>) -> Result<(), HostError> {
    if let Some(id) = external_id.filter(|id| !id.is_empty()) {
        doc.set_attribute(handle, ATTR_EXTERNAL_ID, id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ElementKind;

    fn wall_spec(name: &str) -> NewElement {
        let mut spec = NewElement::new(ElementKind::Wall, name);
        spec.footprint = vec![[0.0, 0.0, 0.0], [4.0, 0.0, 0.0]];
        spec
    }

    #[test]
    fn test_create_then_update_in_place() {
        let mut doc = Document::new();
        let mut index = IdentityIndex::new();

        let (id, disp) = upsert(
            &mut doc,
            &mut index,
            Some("w-1"),
            wall_spec("Wall A"),
            &[Placement::Free],
        )
        .unwrap();
        assert_eq!(disp, Disposition::Created);
        assert_eq!(doc.attribute(id, ATTR_EXTERNAL_ID), Some("w-1"));

        let (id2, disp2) = upsert(
            &mut doc,
            &mut index,
            Some("w-1"),
            wall_spec("Wall A renamed"),
            &[Placement::Free],
        )
        .unwrap();
        assert_eq!(disp2, Disposition::Updated);
        assert_eq!(id2, id);
        assert_eq!(doc.get(id).unwrap().name, "Wall A renamed");
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_incompatible_kind_recreates() {
        let mut doc = Document::new();
        let mut index = IdentityIndex::new();

        let (old, _) = upsert(
            &mut doc,
            &mut index,
            Some("x-1"),
            wall_spec("was a wall"),
            &[Placement::Free],
        )
        .unwrap();

        let mut floor = NewElement::new(ElementKind::Floor, "now a floor");
        floor.footprint = vec![[0.0, 0.0, 0.0], [1.0, 1.0, 0.0]];
        let (new, disp) = upsert(
            &mut doc,
            &mut index,
            Some("x-1"),
            floor,
            &[Placement::Free],
        )
        .unwrap();

        assert_eq!(disp, Disposition::Created);
        assert_ne!(new, old);
        assert!(doc.get(old).is_none());
        assert_eq!(doc.attribute(new, ATTR_EXTERNAL_ID), Some("x-1"));
    }

    #[test]
    fn test_placement_preference_order() {
        let mut doc = Document::new();
        let mut index = IdentityIndex::new();
        let bare_host = doc.add(NewElement::new(ElementKind::Wall, "no geometry"));

        // face placement fails on the geometry-less host, level placement is
        // not offered, so the free fallback wins
        let (id, _) = upsert(
            &mut doc,
            &mut index,
            Some("c-1"),
            NewElement::new(ElementKind::FamilyInstance, "conn"),
            &[
                Placement::OnFace {
                    host: bare_host,
                    point: [0.0, 0.0, 0.0],
                },
                Placement::Free,
            ],
        )
        .unwrap();
        assert_eq!(doc.get(id).unwrap().host, None);
    }

    #[test]
    fn test_all_placements_failing_is_descriptive() {
        let mut doc = Document::new();
        let mut index = IdentityIndex::new();

        let err = upsert(
            &mut doc,
            &mut index,
            Some("c-2"),
            NewElement::new(ElementKind::FamilyInstance, "conn"),
            &[Placement::HostedByElement(ElementId(404))],
        )
        .unwrap_err();
        assert!(matches!(err, HostError::PlacementExhausted { .. }));
        // the failing transaction left nothing behind
        assert!(doc.is_empty());
    }
}
