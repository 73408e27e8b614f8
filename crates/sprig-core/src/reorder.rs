//! Ordered-list reconciliation.
//!
//! Translates a drag gesture — "this item was dropped onto that one" — into
//! a persisted dense total order. The new permutation is computed from the
//! local snapshot (drag feedback must be immediate), applied optimistically,
//! then persisted as one position write per item, in list order, strictly
//! sequentially. A failure partway through leaves the store in a
//! partially-reordered but structurally valid state and is reported once;
//! nothing is rolled back or retried here.

#![allow(clippy::cast_possible_truncation)] // sibling lists are tiny

use crate::error::{Error, Result};
use crate::live::LiveProfile;
use crate::models::{Link, LinkId, LinkPatch, SectionId, SectionPatch};

/// Move the element at `moved_index` so it takes the slot `target_index`
/// occupied before the move, shifting the elements between the two
/// positions by one.
///
/// Both indices refer to the list as it is on entry.
pub fn splice_move<T>(list: &mut Vec<T>, moved_index: usize, target_index: usize) {
    if moved_index == target_index || moved_index >= list.len() || target_index >= list.len() {
        return;
    }
    let item = list.remove(moved_index);
    list.insert(target_index, item);
}

impl LiveProfile {
    /// Reorder the profile's sections so `moved` takes the slot `target`
    /// currently occupies.
    ///
    /// Dropping an item onto itself is a no-op. On success the persisted
    /// positions are exactly `0..n`, matching the computed order.
    pub async fn reorder_sections(&self, moved: SectionId, target: SectionId) -> Result<()> {
        if moved == target {
            return Ok(());
        }

        // Holding the gate for the whole write run keeps remote-triggered
        // refreshes from interleaving with the sequential position writes.
        let gate = self.write_gate.clone();
        let _guard = gate.lock().await;

        let mut sections = self.snapshot().sections;
        let moved_index = sections
            .iter()
            .position(|section| section.id == moved)
            .ok_or_else(|| Error::InvalidInput(format!("unknown section: {moved}")))?;
        let target_index = sections
            .iter()
            .position(|section| section.id == target)
            .ok_or_else(|| Error::InvalidInput(format!("unknown section: {target}")))?;

        splice_move(&mut sections, moved_index, target_index);
        for (index, section) in sections.iter_mut().enumerate() {
            section.position = index as u32;
        }

        let reordered = sections.clone();
        self.state
            .send_modify(|snapshot| snapshot.sections = reordered);

        let total = sections.len();
        for (index, section) in sections.iter().enumerate() {
            self.store
                .update_section(section.id, SectionPatch::position(index as u32))
                .await
                .map_err(|source| Error::PartialReorder {
                    applied: index,
                    total,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    /// Reorder the links of one section so `moved` takes the slot `target`
    /// currently occupies.
    ///
    /// Dropping a link onto itself, or onto a link of a different section,
    /// is a silent no-op: cross-section moves are unsupported and the store
    /// receives zero writes.
    pub async fn reorder_links(&self, moved: LinkId, target: LinkId) -> Result<()> {
        if moved == target {
            return Ok(());
        }

        let gate = self.write_gate.clone();
        let _guard = gate.lock().await;

        let snapshot = self.snapshot();
        let moved_link = snapshot
            .links
            .iter()
            .find(|link| link.id == moved)
            .ok_or_else(|| Error::InvalidInput(format!("unknown link: {moved}")))?;
        let target_link = snapshot
            .links
            .iter()
            .find(|link| link.id == target)
            .ok_or_else(|| Error::InvalidInput(format!("unknown link: {target}")))?;
        if moved_link.section_id != target_link.section_id {
            return Ok(());
        }
        let section_id = moved_link.section_id;

        let mut section_links = snapshot.links_for(section_id);
        let moved_index = section_links
            .iter()
            .position(|link| link.id == moved)
            .ok_or_else(|| Error::InvalidInput(format!("unknown link: {moved}")))?;
        let target_index = section_links
            .iter()
            .position(|link| link.id == target)
            .ok_or_else(|| Error::InvalidInput(format!("unknown link: {target}")))?;

        splice_move(&mut section_links, moved_index, target_index);
        for (index, link) in section_links.iter_mut().enumerate() {
            link.position = index as u32;
        }

        let renumbered: Vec<(LinkId, u32)> = section_links
            .iter()
            .map(|link| (link.id, link.position))
            .collect();
        self.state.send_modify(|snapshot| {
            for link in &mut snapshot.links {
                if let Some((_, position)) = renumbered.iter().find(|(id, _)| *id == link.id) {
                    link.position = *position;
                }
            }
            snapshot.links.sort_by_key(|link: &Link| link.position);
        });

        let total = section_links.len();
        for (index, link) in section_links.iter().enumerate() {
            self.store
                .update_link(link.id, LinkPatch::position(index as u32))
                .await
                .map_err(|source| Error::PartialReorder {
                    applied: index,
                    total,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}
