//! Write-log simplification and transaction coalescing.
//!
//! One policy is used both while a transaction records its own log and when
//! two adjacent transaction results are merged:
//!
//! - consecutive updates of the same entity merge, the later field wins;
//! - an insert absorbs following updates of the same entity;
//! - a delete drops immediately preceding updates of the same entity and
//!   cancels an immediately preceding insert of the same entity.

use strata_foundation::{Entity, Patch};

use crate::transaction::{TransactionResult, WriteOp};

/// Simplifies a write log without changing its effect.
#[must_use]
pub fn coalesce_ops(ops: impl IntoIterator<Item = WriteOp>) -> Vec<WriteOp> {
    let mut out: Vec<WriteOp> = Vec::new();
    for op in ops {
        push_op(&mut out, op);
    }
    out
}

fn push_op(out: &mut Vec<WriteOp>, op: WriteOp) {
    match op {
        WriteOp::Update { entity, values } => match out.last_mut() {
            Some(WriteOp::Update {
                entity: last,
                values: previous,
            }) if *last == entity => {
                previous.extend(values);
            }
            Some(WriteOp::Insert {
                entity: last,
                values: inserted,
            }) if *last == entity => {
                for (name, value) in values {
                    match value {
                        Some(value) => inserted.insert(name, value),
                        None => inserted.remove(&name),
                    };
                }
            }
            _ => out.push(WriteOp::Update { entity, values }),
        },
        WriteOp::Delete { entity } => {
            while matches!(out.last(), Some(WriteOp::Update { entity: last, .. }) if *last == entity)
            {
                out.pop();
            }
            if matches!(out.last(), Some(WriteOp::Insert { entity: last, .. }) if *last == entity) {
                out.pop();
            } else {
                out.push(WriteOp::Delete { entity });
            }
        }
        insert @ WriteOp::Insert { .. } => out.push(insert),
    }
}

/// Checks if two adjacent results should be merged.
///
/// Both must be undoable with equal, present coalesce keys.
#[must_use]
pub fn should_coalesce<A, B>(previous: &TransactionResult<A>, current: &TransactionResult<B>) -> bool {
    match (&previous.undoable, &current.undoable) {
        (Some(a), Some(b)) => matches!((&a.coalesce, &b.coalesce), (Some(x), Some(y)) if x == y),
        _ => false,
    }
}

/// Merges `current` into `previous`, producing one combined result.
///
/// Redo runs `previous` then `current`; undo runs them in reverse. The value,
/// transient flag, and undo metadata come from `current`.
#[must_use]
pub fn coalesce<A, B>(previous: TransactionResult<A>, current: TransactionResult<B>) -> TransactionResult<B> {
    let redo = coalesce_ops(previous.redo.into_iter().chain(current.redo));
    let undo = coalesce_ops(current.undo.into_iter().chain(previous.undo));

    let mut changed_entities = previous.changed_entities;
    for (entity, patch) in current.changed_entities {
        merge_change(&mut changed_entities, entity, patch);
    }
    let mut changed_components = previous.changed_components;
    changed_components.extend(current.changed_components);
    let mut changed_archetypes = previous.changed_archetypes;
    changed_archetypes.extend(current.changed_archetypes);

    TransactionResult {
        value: current.value,
        transient: current.transient,
        undoable: current.undoable,
        redo,
        undo,
        changed_entities,
        changed_components,
        changed_archetypes,
    }
}

/// Folds a later change of one entity into an accumulated change map.
pub(crate) fn merge_change(
    changes: &mut std::collections::BTreeMap<Entity, Option<Patch>>,
    entity: Entity,
    patch: Option<Patch>,
) {
    match (changes.get_mut(&entity), patch) {
        (Some(Some(existing)), Some(patch)) => existing.extend(patch),
        (_, patch) => {
            changes.insert(entity, patch);
        }
    }
}
