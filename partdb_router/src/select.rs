//! Matching of a row against the rules of a single partition node.

use partdb_catalog::{
    Datum, PartitionNode, PartitionTree, TreeRule,
    interface::{PartitionKind, PartitionRule, RangeBound, RuleBound},
};
use partdb_id::AttrNumber;
use std::cmp::Ordering;

use crate::access_methods::PartitionAccessMethods;
use crate::comparator::Comparator;
use crate::{Error, Result};

/// Where a key value falls relative to one rule's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangePosition {
    Before,
    Within,
    After,
}

/// The value of key column `attnum` in the row, `None` if it is null.
pub(crate) fn key_value<'a>(
    values: &'a [Datum],
    nulls: &[bool],
    attnum: AttrNumber,
) -> Result<Option<&'a Datum>> {
    let Some(index) = attnum.as_index().filter(|i| *i < values.len()) else {
        return Err(Error::KeyAttributeOutOfRange {
            attnum,
            width: values.len(),
        });
    };
    if nulls.get(index).copied().unwrap_or(false) {
        return Ok(None);
    }
    Ok(Some(&values[index]))
}

/// Whether any key column of `node`'s level is null in the row.
pub(crate) fn has_null_key(node: &PartitionNode, values: &[Datum], nulls: &[bool]) -> Result<bool> {
    for attnum in &node.level.key_attrs {
        if key_value(values, nulls, *attnum)?.is_none() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn bound_value(bound: &RangeBound, keyno: usize) -> Option<&Datum> {
    bound.values.get(keyno)
}

/// Classify `value` against key column `keyno` of `rule`. An absent edge always passes.
pub(crate) fn range_test(
    value: &Datum,
    cmp: &Comparator,
    keyno: usize,
    rule: &PartitionRule,
) -> RangePosition {
    let RuleBound::Range { start, end } = &rule.bound else {
        return RangePosition::Within;
    };

    if let Some((start, bound)) = start.as_ref().and_then(|s| Some((s, bound_value(s, keyno)?))) {
        match cmp(value, bound) {
            Ordering::Less => return RangePosition::Before,
            Ordering::Equal if !start.inclusive => return RangePosition::Before,
            _ => {}
        }
    }

    if let Some((end, bound)) = end.as_ref().and_then(|e| Some((e, bound_value(e, keyno)?))) {
        match cmp(value, bound) {
            Ordering::Greater => return RangePosition::After,
            Ordering::Equal if !end.inclusive => return RangePosition::After,
            _ => {}
        }
    }

    RangePosition::Within
}

/// The non-default rule matching the row at `node`, if any.
pub(crate) fn select_explicit<'t>(
    tree: &PartitionTree,
    node: &'t PartitionNode,
    values: &[Datum],
    nulls: &[bool],
    methods: &mut PartitionAccessMethods,
) -> Result<Option<&'t TreeRule>> {
    let cmps = methods.comparators(tree, node)?;
    match node.level.kind {
        PartitionKind::Range => select_range(node, &cmps, values, nulls),
        PartitionKind::List => select_list(node, &cmps, values, nulls),
    }
}

/// The rule matching the row at `node`, falling back to the node's default rule.
pub(crate) fn select_rule<'t>(
    tree: &PartitionTree,
    node: &'t PartitionNode,
    values: &[Datum],
    nulls: &[bool],
    methods: &mut PartitionAccessMethods,
) -> Result<Option<&'t TreeRule>> {
    Ok(select_explicit(tree, node, values, nulls, methods)?.or(node.default_rule.as_ref()))
}

fn select_range<'t>(
    node: &'t PartitionNode,
    cmps: &[Comparator],
    values: &[Datum],
    nulls: &[bool],
) -> Result<Option<&'t TreeRule>> {
    let keys = node
        .level
        .key_attrs
        .iter()
        .map(|a| key_value(values, nulls, *a))
        .collect::<Result<Vec<_>>>()?;
    // a null key can satisfy no bound
    let Some(keys) = keys.into_iter().collect::<Option<Vec<&Datum>>>() else {
        return Ok(None);
    };
    let (Some(first), Some(first_cmp)) = (keys.first(), cmps.first()) else {
        return Ok(None);
    };

    let rules = &node.rules;
    let (mut low, mut high) = (0, rules.len());
    let mut found = None;
    while low < high {
        let mid = low + (high - low) / 2;
        match range_test(first, first_cmp, 0, &rules[mid].rule) {
            RangePosition::After => low = mid + 1,
            RangePosition::Before => high = mid,
            RangePosition::Within => {
                found = Some(mid);
                break;
            }
        }
    }
    let Some(mid) = found else {
        return Ok(None);
    };

    if keys.len() == 1 {
        return Ok(Some(&rules[mid]));
    }

    // Column 0 only narrows the search to a window of candidates: walk outward from the hit in
    // both directions until column 0 itself stops matching.
    let matches_all = |rule: &PartitionRule| -> Option<bool> {
        for (keyno, (key, cmp)) in keys.iter().zip(cmps).enumerate() {
            if range_test(key, cmp, keyno, rule) != RangePosition::Within {
                return if keyno == 0 { None } else { Some(false) };
            }
        }
        Some(true)
    };

    for j in (0..=mid).rev() {
        match matches_all(&rules[j].rule) {
            Some(true) => return Ok(Some(&rules[j])),
            Some(false) => {}
            None => break,
        }
    }
    for j in mid + 1..rules.len() {
        match matches_all(&rules[j].rule) {
            Some(true) => return Ok(Some(&rules[j])),
            Some(false) => {}
            None => break,
        }
    }

    Ok(None)
}

fn select_list<'t>(
    node: &'t PartitionNode,
    cmps: &[Comparator],
    values: &[Datum],
    nulls: &[bool],
) -> Result<Option<&'t TreeRule>> {
    let keys = node
        .level
        .key_attrs
        .iter()
        .map(|a| key_value(values, nulls, *a))
        .collect::<Result<Vec<_>>>()?;

    let tuple_matches = |tuple: &[Datum]| {
        tuple.len() >= keys.len()
            && keys
                .iter()
                .zip(tuple)
                .zip(cmps)
                .all(|((key, value), cmp)| match *key {
                    None => value.is_null(),
                    Some(key) => !value.is_null() && cmp(key, value) == Ordering::Equal,
                })
    };

    Ok(node.rules.iter().find(|r| match &r.rule.bound {
        RuleBound::List(tuples) => tuples.iter().any(|t| tuple_matches(t.as_slice())),
        _ => false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{BuiltinOpClasses, ComparatorProvider};
    use partdb_catalog::DataType;
    use partdb_id::{LevelId, RuleId};

    fn rule(start: Option<RangeBound>, end: Option<RangeBound>) -> PartitionRule {
        PartitionRule {
            id: RuleId::new(1),
            level_id: LevelId::new(1),
            parent_rule: None,
            child_table: None,
            name: None,
            is_default: false,
            ruleord: 1,
            bound: RuleBound::Range { start, end },
            encodings: vec![],
            tablespace: None,
        }
    }

    fn int_cmp() -> Comparator {
        BuiltinOpClasses
            .comparator(BuiltinOpClasses::INT, DataType::Int, DataType::Int)
            .unwrap()
    }

    #[test]
    fn range_edges() {
        let cmp = int_cmp();
        let r = rule(
            Some(RangeBound::inclusive(vec![Datum::Int(10)])),
            Some(RangeBound::exclusive(vec![Datum::Int(20)])),
        );
        let at = |v: i64| range_test(&Datum::Int(v), &cmp, 0, &r);
        assert_eq!(at(9), RangePosition::Before);
        assert_eq!(at(10), RangePosition::Within);
        assert_eq!(at(19), RangePosition::Within);
        assert_eq!(at(20), RangePosition::After);

        let r = rule(Some(RangeBound::exclusive(vec![Datum::Int(10)])), None);
        let at = |v: i64| range_test(&Datum::Int(v), &cmp, 0, &r);
        assert_eq!(at(10), RangePosition::Before);
        assert_eq!(at(i64::MAX), RangePosition::Within);
    }

    #[test]
    fn key_lookup() {
        let values = [Datum::Int(1), Datum::Int(2)];
        let nulls = [false, true];
        assert_eq!(
            key_value(&values, &nulls, AttrNumber::new(1)).unwrap(),
            Some(&Datum::Int(1))
        );
        assert_eq!(key_value(&values, &nulls, AttrNumber::new(2)).unwrap(), None);
        // missing null flags read as not null
        assert_eq!(
            key_value(&values, &[], AttrNumber::new(2)).unwrap(),
            Some(&Datum::Int(2))
        );
        assert!(matches!(
            key_value(&values, &nulls, AttrNumber::new(3)),
            Err(Error::KeyAttributeOutOfRange { width: 2, .. })
        ));
    }
}
