//! The commit walker.

use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::debug;

use grit_store::{Commit, GitObject, ObjectStore};
use grit_types::ObjectId;

use crate::error::{WalkError, WalkResult};

/// Iterates commits children-first, breaking ties by commit time (newest
/// first).
///
/// Starting points are added with [`push`](RevWalk::push); ancestries to
/// exclude with [`mark_uninteresting`](RevWalk::mark_uninteresting). The
/// reachable subgraph is materialized lazily on the first call to `next`.
///
/// Annotated tags given as starting points are peeled to the commit they
/// ultimately reference. Parents absent from the store are treated as the
/// edge of the graph rather than an error, so walks over partial histories
/// terminate cleanly.
pub struct RevWalk<'a> {
    store: &'a dyn ObjectStore,
    roots: Vec<ObjectId>,
    uninteresting_roots: Vec<ObjectId>,
    state: Option<WalkState>,
}

struct WalkState {
    commits: HashMap<ObjectId, Commit>,
    /// Children not yet emitted, per interesting commit.
    indegree: HashMap<ObjectId, usize>,
    ready: BinaryHeap<Candidate>,
}

/// Heap key: newest commit time wins; ids break exact ties so the order is
/// deterministic.
#[derive(PartialEq, Eq)]
struct Candidate {
    when: i64,
    id: ObjectId,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.when
            .cmp(&other.when)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> RevWalk<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            roots: Vec::new(),
            uninteresting_roots: Vec::new(),
            state: None,
        }
    }

    /// Add a starting point. Must reference a commit, possibly through a
    /// chain of annotated tags.
    pub fn push(&mut self, id: ObjectId) {
        self.roots.push(id);
        self.state = None;
    }

    /// Exclude a commit and its whole ancestry from the walk. Ids that do
    /// not resolve to a known commit are ignored: the other side of a
    /// negotiation may reference history this store has never seen.
    pub fn mark_uninteresting(&mut self, id: ObjectId) {
        self.uninteresting_roots.push(id);
        self.state = None;
    }

    /// Peel tags until a commit is reached.
    fn peel_to_commit(&self, id: ObjectId) -> WalkResult<Commit> {
        let mut cursor = id;
        loop {
            let stored = self
                .store
                .read(&cursor)?
                .ok_or(WalkError::MissingCommit(cursor))?;
            match GitObject::from_stored_object(&stored)? {
                GitObject::Commit(commit) => return Ok(commit),
                GitObject::Tag(tag) => cursor = tag.target,
                other => {
                    return Err(WalkError::NotACommit {
                        id: cursor,
                        kind: other.kind().to_string(),
                    })
                }
            }
        }
    }

    /// Same as [`peel_to_commit`] but also reports the commit's own id
    /// (which differs from `id` when peeling happened).
    fn resolve_root(&self, id: ObjectId) -> WalkResult<(ObjectId, Commit)> {
        let commit = self.peel_to_commit(id)?;
        Ok((commit.to_stored_object().compute_id(), commit))
    }

    /// Collect every commit reachable from `seeds` by parent edges.
    /// Missing parents terminate their branch of the traversal.
    fn collect(
        &self,
        seeds: &[(ObjectId, Commit)],
        stop: &HashSet<ObjectId>,
    ) -> WalkResult<HashMap<ObjectId, Commit>> {
        let mut commits: HashMap<ObjectId, Commit> = HashMap::new();
        let mut work: Vec<ObjectId> = Vec::new();

        for (id, commit) in seeds {
            if !stop.contains(id) && !commits.contains_key(id) {
                work.extend(commit.parents.iter().copied());
                commits.insert(*id, commit.clone());
            }
        }
        while let Some(id) = work.pop() {
            if commits.contains_key(&id) || stop.contains(&id) {
                continue;
            }
            let Some(stored) = self.store.read(&id)? else {
                continue;
            };
            let commit = Commit::from_stored_object(&stored)?;
            work.extend(commit.parents.iter().copied());
            commits.insert(id, commit);
        }
        Ok(commits)
    }

    /// The full ancestry of the uninteresting roots, as far as this store
    /// knows it.
    fn uninteresting_closure(&self) -> WalkResult<HashSet<ObjectId>> {
        let mut closed: HashSet<ObjectId> = HashSet::new();
        let mut work: Vec<ObjectId> = Vec::new();

        for &id in &self.uninteresting_roots {
            match self.resolve_root(id) {
                Ok((commit_id, _)) => work.push(commit_id),
                Err(WalkError::MissingCommit(_)) | Err(WalkError::NotACommit { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        while let Some(id) = work.pop() {
            if !closed.insert(id) {
                continue;
            }
            let Some(stored) = self.store.read(&id)? else {
                continue;
            };
            let commit = Commit::from_stored_object(&stored)?;
            work.extend(commit.parents.iter().copied());
        }
        Ok(closed)
    }

    fn prime(&mut self) -> WalkResult<()> {
        let uninteresting = self.uninteresting_closure()?;

        let mut seeds = Vec::with_capacity(self.roots.len());
        for &id in &self.roots {
            seeds.push(self.resolve_root(id)?);
        }
        let commits = Self::collect(self, &seeds, &uninteresting)?;

        // Kahn: a commit is ready once every interesting child was emitted.
        let mut indegree: HashMap<ObjectId, usize> =
            commits.keys().map(|id| (*id, 0)).collect();
        for commit in commits.values() {
            for parent in &commit.parents {
                if let Some(count) = indegree.get_mut(parent) {
                    *count += 1;
                }
            }
        }

        let mut ready = BinaryHeap::new();
        for (id, count) in &indegree {
            if *count == 0 {
                ready.push(Candidate {
                    when: commits[id].committer.when,
                    id: *id,
                });
            }
        }
        debug!(
            interesting = commits.len(),
            excluded = uninteresting.len(),
            "walk primed"
        );

        self.state = Some(WalkState {
            commits,
            indegree,
            ready,
        });
        Ok(())
    }
}

impl Iterator for RevWalk<'_> {
    type Item = WalkResult<ObjectId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.is_none() {
            if let Err(e) = self.prime() {
                // Surface the error once, then stop.
                self.roots.clear();
                self.uninteresting_roots.clear();
                self.state = Some(WalkState {
                    commits: HashMap::new(),
                    indegree: HashMap::new(),
                    ready: BinaryHeap::new(),
                });
                return Some(Err(e));
            }
        }
        let state = self.state.as_mut().expect("state primed above");

        let candidate = state.ready.pop()?;
        let commit = state
            .commits
            .get(&candidate.id)
            .expect("ready commits are in the subgraph");
        for parent in commit.parents.clone() {
            if let Some(count) = state.indegree.get_mut(&parent) {
                *count -= 1;
                if *count == 0 {
                    state.ready.push(Candidate {
                        when: state.commits[&parent].committer.when,
                        id: parent,
                    });
                }
            }
        }
        Some(Ok(candidate.id))
    }
}
