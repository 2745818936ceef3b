//! Maintenance of the dense ruleord numbering of sibling RANGE rules.
//!
//! The catalog rejects any write that would give two non-default siblings the same ruleord, so
//! renumbering has to move one rule at a time in an order that never collides: rules are pushed
//! up starting from the highest ordinal and pulled down starting from the lowest. Every update
//! is written before the next rule is read.

use partdb_id::{LevelId, RuleId};
use thiserror::Error;
use tracing::{debug, info};

use crate::interface::{PartitionRule, PartitionRuleRepo};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error(
        "too many partitions, ruleord {ruleord} is outside of 1..={max} (reduce the number of \
         partitions)",
        max = i16::MAX
    )]
    OrdinalOverflow { ruleord: i32 },

    #[error(transparent)]
    Catalog(#[from] crate::interface::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapAction {
    /// Increment ruleords to make room for a new rule.
    Open,
    /// Decrement ruleords to fill a hole left by a removed rule.
    Close,
}

impl GapAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

/// Shifts every non-default sibling of (`level`, `parent`) whose ruleord lies in
/// `stop_ord..=from_ord` by one.
///
/// [`GapAction::Open`] visits the rules in descending ruleord order and increments each, so
/// after opening `(5, 1)` over `[1, 2, 3, 4, 5]` the siblings hold `[2, 3, 4, 5, 6]`.
/// [`GapAction::Close`] visits them in ascending order and decrements each, which requires
/// `stop_ord - 1` to be free.
///
/// Closing with the arguments of an earlier open does not undo it, since the moved rules now
/// span `stop_ord + 1..=from_ord + 1`. The open above is undone by closing `(6, 2)`, not `(5, 1)`.
///
/// Returns the number of rules moved.
pub async fn open_gap(
    rules: &mut dyn PartitionRuleRepo,
    level: LevelId,
    parent: Option<RuleId>,
    from_ord: i32,
    stop_ord: i32,
    action: GapAction,
) -> Result<usize> {
    let from = match i16::try_from(from_ord) {
        Ok(from) if from >= 1 => from,
        _ => return Err(Error::OrdinalOverflow { ruleord: from_ord }),
    };
    let stop = i16::try_from(stop_ord.max(i32::from(i16::MIN))).unwrap_or(i16::MAX);

    info!(
        %level,
        parent = ?parent,
        from,
        stop,
        action = action.as_str(),
        "adjusting partition ruleord gap"
    );

    let mut moved = 0;
    match action {
        GapAction::Open => {
            let mut cursor = from;
            while let Some(rule) = rules.highest_at_or_below(level, parent, cursor).await? {
                if rule.ruleord < stop {
                    break;
                }
                let new = rule
                    .ruleord
                    .checked_add(1)
                    .ok_or(Error::OrdinalOverflow {
                        ruleord: i32::from(rule.ruleord) + 1,
                    })?;
                move_rule(rules, &rule, new).await?;
                moved += 1;

                match rule.ruleord.checked_sub(1) {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
        }
        GapAction::Close => {
            let mut cursor = stop;
            while let Some(rule) = rules.lowest_at_or_above(level, parent, cursor).await? {
                if rule.ruleord > from {
                    break;
                }
                let new = rule
                    .ruleord
                    .checked_sub(1)
                    .filter(|n| *n >= 1)
                    .ok_or(Error::OrdinalOverflow {
                        ruleord: i32::from(rule.ruleord) - 1,
                    })?;
                move_rule(rules, &rule, new).await?;
                moved += 1;

                match rule.ruleord.checked_add(1) {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
        }
    }

    Ok(moved)
}

async fn move_rule(
    rules: &mut dyn PartitionRuleRepo,
    rule: &PartitionRule,
    ruleord: i16,
) -> Result<()> {
    debug!(rule_id = %rule.id, old = rule.ruleord, new = ruleord, "rewriting ruleord");
    rules.update_ordinal(rule.id, ruleord).await?;
    Ok(())
}

/// Where a new RANGE rule goes among its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    First,
    Last,
    /// Immediately before the sibling currently holding this ruleord.
    Before(i16),
}

/// Makes room for a new rule at `placement` and returns the ruleord it should be created with.
///
/// Existing siblings are shifted only as far as the nearest hole in the ordinal sequence, so
/// a hole left by an earlier removal absorbs the shift.
pub async fn place_rule(
    rules: &mut dyn PartitionRuleRepo,
    level: LevelId,
    parent: Option<RuleId>,
    placement: Placement,
) -> Result<i16> {
    let ords: Vec<i32> = rules
        .list_by_level(level, parent)
        .await?
        .into_iter()
        .filter(|r| !r.is_default)
        .map(|r| i32::from(r.ruleord))
        .collect();

    let Some(&last) = ords.last() else {
        return Ok(1);
    };

    let ruleord = match placement {
        Placement::First => {
            let hole = first_hole(&ords);
            if hole > 1 {
                open_gap(rules, level, parent, hole - 1, 1, GapAction::Open).await?;
            }
            1
        }
        Placement::Last => match last_hole_stop(&ords) {
            Some(stop) => {
                open_gap(rules, level, parent, last, stop, GapAction::Close).await?;
                last
            }
            None => last + 1,
        },
        Placement::Before(target) => {
            let target = i32::from(target);
            let hole = first_hole(&ords);
            if target > hole {
                open_gap(rules, level, parent, target - 1, hole + 1, GapAction::Close).await?;
                target - 1
            } else if target < hole {
                open_gap(rules, level, parent, hole, target, GapAction::Open).await?;
                target
            } else {
                target
            }
        }
    };

    match i16::try_from(ruleord) {
        Ok(ord) if ord >= 1 => Ok(ord),
        _ => Err(Error::OrdinalOverflow { ruleord }),
    }
}

/// The lowest ordinal not held by any of `ords`, which are ascending.
fn first_hole(ords: &[i32]) -> i32 {
    let mut hole = 1;
    for &ord in ords {
        if ord > hole {
            break;
        }
        hole += 1;
    }
    hole
}

/// The ordinal of the first rule after the last hole in `ords`, if there is a hole.
fn last_hole_stop(ords: &[i32]) -> Option<i32> {
    let mut hole = 1;
    let mut stop = None;
    for &ord in ords {
        if ord > hole {
            hole = ord;
            stop = Some(ord);
        }
        hole += 1;
    }
    stop
}
