//! Pairing of the occurrences of one constraint on two relations.

use hashbrown::HashMap;
use partdb_catalog::interface::Constraint;
use partdb_id::IndexId;

/// How occurrences are paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matching {
    /// Only occurrences with equal names pair up.
    Name,
    /// Equal names pair up first, then the remaining occurrences pair up in id order.
    PreferName,
}

/// Outcome of comparing the occurrences on side `a` with those on side `b`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// On `a` with no counterpart on `b`.
    pub missing: Vec<Constraint>,
    /// On `b` with no counterpart on `a`.
    pub extra: Vec<Constraint>,
    /// Paired occurrences, in the order of side `a`.
    pub pairs: Vec<(Constraint, Constraint)>,
}

pub fn diff(a: &[Constraint], b: &[Constraint], matching: Matching) -> Diff {
    let mut b_used = vec![false; b.len()];
    let mut a_match: Vec<Option<usize>> = vec![None; a.len()];

    for (i, ca) in a.iter().enumerate() {
        if let Some(j) = (0..b.len()).find(|j| !b_used[*j] && b[*j].name == ca.name) {
            b_used[j] = true;
            a_match[i] = Some(j);
        }
    }

    if matching == Matching::PreferName {
        let mut free_b = (0..b.len()).filter(|j| !b_used[*j]).collect::<Vec<_>>().into_iter();
        for slot in a_match.iter_mut().filter(|m| m.is_none()) {
            let Some(j) = free_b.next() else { break };
            b_used[j] = true;
            *slot = Some(j);
        }
    }

    let mut out = Diff::default();
    for (ca, m) in a.iter().zip(&a_match) {
        match m {
            Some(j) => out.pairs.push((ca.clone(), b[*j].clone())),
            None => out.missing.push(ca.clone()),
        }
    }
    out.extra = b
        .iter()
        .zip(&b_used)
        .filter(|(_, used)| !**used)
        .map(|(cb, _)| cb.clone())
        .collect();
    out
}

/// Pairs the index-backed constraints of the partitioned table (`a` side) with the occurrences
/// on the part inheriting from them. `inheritors` maps an index of the table to the indexes
/// inheriting from it.
///
/// `missing` holds the table's constraints no part occurrence inherits from, `extra` the part's
/// occurrences inheriting from none of the table's.
pub fn diff_inherited(
    table: &[Constraint],
    part: &[Constraint],
    inheritors: &HashMap<IndexId, Vec<IndexId>>,
) -> Diff {
    let mut part_used = vec![false; part.len()];
    let mut out = Diff::default();

    for tc in table {
        let children = tc
            .kind
            .backing_index()
            .and_then(|index| inheritors.get(&index))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let found = part.iter().enumerate().find(|(j, pc)| {
            !part_used[*j]
                && pc
                    .kind
                    .backing_index()
                    .is_some_and(|index| children.contains(&index))
        });
        match found {
            Some((j, pc)) => {
                part_used[j] = true;
                out.pairs.push((tc.clone(), pc.clone()));
            }
            None => out.missing.push(tc.clone()),
        }
    }
    out.extra = part
        .iter()
        .zip(&part_used)
        .filter(|(_, used)| !**used)
        .map(|(pc, _)| pc.clone())
        .collect();
    out
}
