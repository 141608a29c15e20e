//! Section-number allocation and page-order maintenance.
//!
//! Everything here is pure: the engine reads the current rows inside a
//! transaction, asks these functions what to write, and writes it.

use std::collections::BTreeSet;

use crate::models::page::PageSectionLink;

/// Lowest section number reserved for subpage sections.
pub const SECTION_NUMBER_MIN: i32 = 100;
/// Exclusive upper bound of the reserved band.
pub const SECTION_NUMBER_MAX: i32 = 1000;

/// A single `page_order` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderChange {
    pub link_id: i64,
    pub page_order: i32,
}

/// Picks the section number for a new subpage section.
///
/// `linked` holds the numbers of the course's sections that some page links,
/// `occupied` every section number in the course. With nothing linked the
/// band floor is used; otherwise the lowest `n + 1` over linked `n` that is not
/// itself linked, so numbers freed by deletions get reused. Candidates taken
/// by host sections are skipped. Returns `None` once the band is exhausted.
pub fn next_section_number(linked: &[i32], occupied: &[i32]) -> Option<i32> {
    let linked: BTreeSet<i32> = linked.iter().copied().collect();
    let occupied: BTreeSet<i32> = occupied.iter().chain(linked.iter()).copied().collect();

    let mut candidate = linked
        .iter()
        .map(|n| n + 1)
        .filter(|n| !linked.contains(n))
        .min()
        .unwrap_or(SECTION_NUMBER_MIN)
        .max(SECTION_NUMBER_MIN);

    while occupied.contains(&candidate) {
        candidate += 1;
    }

    (candidate < SECTION_NUMBER_MAX).then_some(candidate)
}

/// Order for a link appended at the end of a page.
pub fn append_order(links: &[PageSectionLink]) -> i32 {
    links.iter().map(|l| l.page_order).max().unwrap_or(0) + 1
}

/// Writes that move `section_id` to `target_order` and renumber the rest
/// densely around it.
///
/// `links` must be in current page order. The target is clamped to
/// `1..=links.len()`. Links already at their final position produce no write.
/// Returns `None` when `section_id` is not on the page.
pub fn move_plan(
    links: &[PageSectionLink],
    section_id: i64,
    target_order: i32,
) -> Option<Vec<OrderChange>> {
    let moving = links.iter().find(|l| l.section_id == section_id)?;
    let target_order = target_order.clamp(1, links.len() as i32);

    let mut changes = Vec::new();
    if moving.page_order != target_order {
        changes.push(OrderChange {
            link_id: moving.id,
            page_order: target_order,
        });
    }

    let mut next = 1;
    for link in links.iter().filter(|l| l.id != moving.id) {
        if next == target_order {
            next += 1;
        }
        if link.page_order != next {
            changes.push(OrderChange {
                link_id: link.id,
                page_order: next,
            });
        }
        next += 1;
    }

    Some(changes)
}

/// Writes that renumber `links` (in current page order) to `1..=k`.
pub fn densify_plan(links: &[PageSectionLink]) -> Vec<OrderChange> {
    links
        .iter()
        .zip(1..)
        .filter(|(link, order)| link.page_order != *order)
        .map(|(link, order)| OrderChange {
            link_id: link.id,
            page_order: order,
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
