//! Object closure computation for negotiation.
//!
//! A fetch must ship every object reachable from the wanted tips that is
//! not already reachable from the peer's `have` tips; a push must prove
//! the incoming pack plus the existing database cover everything the new
//! ref targets reference.

use std::collections::HashSet;

use tracing::debug;

use grit_revwalk::RevWalk;
use grit_store::{GitObject, ObjectStore, StoredObject};
use grit_types::ObjectId;

use crate::error::{ProtocolError, ProtocolResult};

/// Compute the objects to send: commits reachable from `wants` but not
/// from `haves`, plus their trees, blobs, and any annotated tags on the
/// want chain. Objects reachable from `haves` are excluded.
pub fn collect_closure(
    store: &dyn ObjectStore,
    wants: &[ObjectId],
    haves: &[ObjectId],
) -> ProtocolResult<Vec<StoredObject>> {
    // Everything the peer already has: the full reachable set from the
    // `have` tips, commits and their content alike. Ids this store has
    // never seen are ignored.
    let mut known: HashSet<ObjectId> = HashSet::new();
    let mut work: Vec<ObjectId> = haves.to_vec();
    while let Some(id) = work.pop() {
        if !known.insert(id) {
            continue;
        }
        let Some(stored) = store.read(&id)? else {
            continue;
        };
        match GitObject::from_stored_object(&stored)? {
            GitObject::Blob(_) => {}
            GitObject::Tree(tree) => work.extend(tree.entries.iter().map(|e| e.object_id)),
            GitObject::Commit(commit) => {
                work.push(commit.tree);
                work.extend(commit.parents.iter().copied());
            }
            GitObject::Tag(tag) => work.push(tag.target),
        }
    }

    let mut commit_walk = RevWalk::new(store);
    for &want in wants {
        commit_walk.push(want);
    }
    for &have in haves {
        commit_walk.mark_uninteresting(have);
    }

    let mut out: Vec<StoredObject> = Vec::new();
    let mut seen = known.clone();

    // Annotated tags on the want chain ship as objects too.
    for &want in wants {
        let mut cursor = want;
        loop {
            if seen.contains(&cursor) {
                break;
            }
            let Some(stored) = store.read(&cursor)? else {
                return Err(ProtocolError::MissingObject(cursor));
            };
            match GitObject::from_stored_object(&stored)? {
                GitObject::Tag(tag) => {
                    seen.insert(cursor);
                    out.push(stored);
                    cursor = tag.target;
                }
                _ => break,
            }
        }
    }

    for commit_id in commit_walk {
        let commit_id = commit_id?;
        if !seen.insert(commit_id) {
            continue;
        }
        let stored = store
            .read(&commit_id)?
            .ok_or(ProtocolError::MissingObject(commit_id))?;
        let tree = match GitObject::from_stored_object(&stored)? {
            GitObject::Commit(commit) => commit.tree,
            _ => return Err(ProtocolError::MissingObject(commit_id)),
        };
        out.push(stored);
        collect_tree_objects(store, tree, &mut seen, &mut out)?;
    }

    debug!(objects = out.len(), wants = wants.len(), haves = haves.len(), "closure computed");
    Ok(out)
}

/// Verify that every object reachable from `tips` exists in `incoming` or
/// `existing`. Traversal stops at objects `existing` already holds, since
/// an accepted store is closed by construction.
pub fn verify_connected(
    incoming: &dyn ObjectStore,
    existing: &dyn ObjectStore,
    tips: &[ObjectId],
) -> ProtocolResult<()> {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut work: Vec<ObjectId> = tips.to_vec();

    while let Some(id) = work.pop() {
        if !seen.insert(id) || existing.contains(&id)? {
            continue;
        }
        let Some(stored) = incoming.read(&id)? else {
            return Err(ProtocolError::MissingObject(id));
        };
        match GitObject::from_stored_object(&stored)? {
            GitObject::Blob(_) => {}
            GitObject::Tree(tree) => {
                work.extend(tree.entries.iter().map(|e| e.object_id));
            }
            GitObject::Commit(commit) => {
                work.push(commit.tree);
                work.extend(commit.parents.iter().copied());
            }
            GitObject::Tag(tag) => work.push(tag.target),
        }
    }
    Ok(())
}

/// Append a tree and everything under it to the outgoing set.
fn collect_tree_objects(
    store: &dyn ObjectStore,
    root: ObjectId,
    seen: &mut HashSet<ObjectId>,
    out: &mut Vec<StoredObject>,
) -> ProtocolResult<()> {
    let mut work = vec![root];
    while let Some(id) = work.pop() {
        if !seen.insert(id) {
            continue;
        }
        let stored = store.read(&id)?.ok_or(ProtocolError::MissingObject(id))?;
        if let GitObject::Tree(tree) = GitObject::from_stored_object(&stored)? {
            work.extend(tree.entries.iter().map(|e| e.object_id));
        }
        out.push(stored);
    }
    Ok(())
}
