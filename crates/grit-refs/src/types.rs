use serde::{Deserialize, Serialize};

use grit_types::ObjectId;

/// A named pointer to an object.
///
/// A ref never owns the object it names; many refs may point at the same
/// commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Full name, for example `refs/heads/main`.
    pub name: String,
    /// The object this ref currently points at.
    pub target: ObjectId,
}

impl Ref {
    pub fn new(name: impl Into<String>, target: ObjectId) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    /// Short name with the well-known prefix stripped.
    pub fn short_name(&self) -> &str {
        self.name
            .strip_prefix("refs/heads/")
            .or_else(|| self.name.strip_prefix("refs/tags/"))
            .unwrap_or(&self.name)
    }
}

/// One compare-and-swap ref update command.
///
/// `expected_old == None` means the ref must not currently exist (create);
/// `new == None` means delete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdate {
    pub name: String,
    pub expected_old: Option<ObjectId>,
    pub new: Option<ObjectId>,
}

impl RefUpdate {
    pub fn create(name: impl Into<String>, new: ObjectId) -> Self {
        Self {
            name: name.into(),
            expected_old: None,
            new: Some(new),
        }
    }

    pub fn update(name: impl Into<String>, old: ObjectId, new: ObjectId) -> Self {
        Self {
            name: name.into(),
            expected_old: Some(old),
            new: Some(new),
        }
    }

    pub fn delete(name: impl Into<String>, old: ObjectId) -> Self {
        Self {
            name: name.into(),
            expected_old: Some(old),
            new: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_prefixes() {
        let r = Ref::new("refs/heads/main", ObjectId::null());
        assert_eq!(r.short_name(), "main");
        let t = Ref::new("refs/tags/v1.0.0", ObjectId::null());
        assert_eq!(t.short_name(), "v1.0.0");
        let other = Ref::new("HEAD", ObjectId::null());
        assert_eq!(other.short_name(), "HEAD");
    }

    #[test]
    fn update_constructors() {
        let id_a = ObjectId::hash_of(b"a");
        let id_b = ObjectId::hash_of(b"b");
        assert_eq!(RefUpdate::create("r", id_a).expected_old, None);
        assert_eq!(RefUpdate::update("r", id_a, id_b).new, Some(id_b));
        assert_eq!(RefUpdate::delete("r", id_a).new, None);
    }
}
