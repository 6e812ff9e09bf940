use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use grit_types::{ObjectId, PersonIdent, OBJECT_ID_LEN};

use crate::error::{StoreError, StoreResult};

/// The kind of object stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Raw content (file contents, arbitrary data).
    Blob,
    /// Directory listing: sorted entries mapping names to object references.
    Tree,
    /// A point in history: root tree, parents, identities, message.
    Commit,
    /// Annotated tag pointing at another object.
    Tag,
}

impl ObjectKind {
    /// Canonical lowercase name as used in object headers and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// Parse a canonical type name.
    pub fn from_str_name(name: &str) -> Option<Self> {
        match name {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored object: kind tag plus canonical payload bytes.
///
/// `StoredObject` is the unit of storage. The payload is the canonical
/// encoding of the object *without* the `"<type> <size>\0"` header; the
/// header is applied when hashing and when framing loose files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// The type of this object.
    pub kind: ObjectKind,
    /// The canonical payload bytes.
    pub data: Vec<u8>,
}

impl StoredObject {
    /// Create a new stored object from kind and payload.
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// The canonical `"<type> <size>\0"` header for this object.
    pub fn header(&self) -> Vec<u8> {
        format!("{} {}\0", self.kind, self.data.len()).into_bytes()
    }

    /// Compute the content-addressed id: SHA-1 over header plus payload.
    pub fn compute_id(&self) -> ObjectId {
        let mut bytes = self.header();
        bytes.extend_from_slice(&self.data);
        ObjectId::hash_of(&bytes)
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A fully decoded object, one of the four kinds.
///
/// Dispatch is by pattern match; exhaustiveness is checked at compile time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GitObject {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl GitObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
            Self::Tag(_) => ObjectKind::Tag,
        }
    }

    /// Encode into a [`StoredObject`].
    pub fn to_stored_object(&self) -> StoredObject {
        match self {
            Self::Blob(b) => b.to_stored_object(),
            Self::Tree(t) => t.to_stored_object(),
            Self::Commit(c) => c.to_stored_object(),
            Self::Tag(t) => t.to_stored_object(),
        }
    }

    /// Decode from a [`StoredObject`], dispatching on its kind.
    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        Ok(match obj.kind {
            ObjectKind::Blob => Self::Blob(Blob::from_stored_object(obj)?),
            ObjectKind::Tree => Self::Tree(Tree::from_stored_object(obj)?),
            ObjectKind::Commit => Self::Commit(Commit::from_stored_object(obj)?),
            ObjectKind::Tag => Self::Tag(Tag::from_stored_object(obj)?),
        })
    }

    /// Compute the content-addressed id of this object.
    pub fn compute_id(&self) -> ObjectId {
        self.to_stored_object().compute_id()
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Raw content object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn to_stored_object(&self) -> StoredObject {
        StoredObject::new(ObjectKind::Blob, self.data.clone())
    }

    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        expect_kind(obj, ObjectKind::Blob)?;
        Ok(Self {
            data: obj.data.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// File mode for a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    /// Normal file (100644).
    Regular,
    /// Executable file (100755).
    Executable,
    /// Symbolic link (120000).
    Symlink,
    /// Subtree / directory (40000).
    Directory,
}

impl EntryMode {
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Directory => 0o040000,
        }
    }

    pub fn from_mode_bits(bits: u32) -> Option<Self> {
        match bits {
            0o100644 => Some(Self::Regular),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            0o040000 => Some(Self::Directory),
            _ => None,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

impl fmt::Display for EntryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Canonical form has no leading zero: "40000", not "040000".
        write!(f, "{:o}", self.mode_bits())
    }
}

/// A single entry in a tree object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: String,
    pub object_id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: EntryMode, name: impl Into<String>, object_id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            object_id,
        }
    }

    /// Canonical ordering: byte comparison with directories compared as if
    /// their name carried a trailing slash.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        let a = sort_key(&self.name, self.mode.is_tree());
        let b = sort_key(&other.name, other.mode.is_tree());
        a.cmp(&b)
    }
}

fn sort_key(name: &str, is_tree: bool) -> Vec<u8> {
    let mut key = name.as_bytes().to_vec();
    if is_tree {
        key.push(b'/');
    }
    key
}

/// Directory listing object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    /// Entries in canonical sorted order.
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Create a tree, sorting entries into canonical order.
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.canonical_cmp(b));
        Self { entries }
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn to_stored_object(&self) -> StoredObject {
        let mut data = Vec::new();
        for entry in &self.entries {
            data.extend_from_slice(entry.mode.to_string().as_bytes());
            data.push(b' ');
            data.extend_from_slice(entry.name.as_bytes());
            data.push(0);
            data.extend_from_slice(entry.object_id.as_bytes());
        }
        StoredObject::new(ObjectKind::Tree, data)
    }

    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        expect_kind(obj, ObjectKind::Tree)?;
        let data = &obj.data;
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let space = find_byte(data, pos, b' ')
                .ok_or_else(|| malformed("tree", "entry missing mode terminator"))?;
            let mode_str = std::str::from_utf8(&data[pos..space])
                .map_err(|_| malformed("tree", "non-utf8 mode"))?;
            let bits = u32::from_str_radix(mode_str, 8)
                .map_err(|_| malformed("tree", "non-octal mode"))?;
            let mode = EntryMode::from_mode_bits(bits)
                .ok_or_else(|| malformed("tree", &format!("unknown mode {mode_str}")))?;

            let nul = find_byte(data, space + 1, 0)
                .ok_or_else(|| malformed("tree", "entry missing name terminator"))?;
            let name = std::str::from_utf8(&data[space + 1..nul])
                .map_err(|_| malformed("tree", "non-utf8 entry name"))?
                .to_string();

            let id_end = nul + 1 + OBJECT_ID_LEN;
            if id_end > data.len() {
                return Err(malformed("tree", "truncated entry id"));
            }
            let mut hash = [0u8; OBJECT_ID_LEN];
            hash.copy_from_slice(&data[nul + 1..id_end]);
            entries.push(TreeEntry {
                mode,
                name,
                object_id: ObjectId::from_hash(hash),
            });
            pos = id_end;
        }

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// A point in history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: PersonIdent,
    pub committer: PersonIdent,
    pub message: String,
}

impl Commit {
    pub fn to_stored_object(&self) -> StoredObject {
        let mut text = String::new();
        text.push_str(&format!("tree {}\n", self.tree));
        for parent in &self.parents {
            text.push_str(&format!("parent {parent}\n"));
        }
        text.push_str(&format!("author {}\n", self.author));
        text.push_str(&format!("committer {}\n", self.committer));
        text.push('\n');
        text.push_str(&self.message);
        StoredObject::new(ObjectKind::Commit, text.into_bytes())
    }

    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        expect_kind(obj, ObjectKind::Commit)?;
        let text = std::str::from_utf8(&obj.data)
            .map_err(|_| malformed("commit", "non-utf8 payload"))?;

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        let (headers, message) = split_headers(text);
        for line in headers.lines() {
            if let Some(rest) = line.strip_prefix("tree ") {
                tree = Some(parse_id(rest, "commit")?);
            } else if let Some(rest) = line.strip_prefix("parent ") {
                parents.push(parse_id(rest, "commit")?);
            } else if let Some(rest) = line.strip_prefix("author ") {
                author = Some(parse_ident(rest, "commit")?);
            } else if let Some(rest) = line.strip_prefix("committer ") {
                committer = Some(parse_ident(rest, "commit")?);
            }
            // Unknown headers (gpgsig, encoding) are preserved only through
            // raw bytes; the typed view skips them.
        }

        Ok(Self {
            tree: tree.ok_or_else(|| malformed("commit", "missing tree header"))?,
            parents,
            author: author.ok_or_else(|| malformed("commit", "missing author"))?,
            committer: committer.ok_or_else(|| malformed("commit", "missing committer"))?,
            message: message.to_string(),
        })
    }

    /// Commit timestamp used for traversal ordering.
    pub fn commit_time(&self) -> i64 {
        self.committer.when
    }
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// Annotated tag object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub target: ObjectId,
    pub target_kind: ObjectKind,
    pub name: String,
    pub tagger: PersonIdent,
    pub message: String,
}

impl Tag {
    pub fn to_stored_object(&self) -> StoredObject {
        let mut text = String::new();
        text.push_str(&format!("object {}\n", self.target));
        text.push_str(&format!("type {}\n", self.target_kind));
        text.push_str(&format!("tag {}\n", self.name));
        text.push_str(&format!("tagger {}\n", self.tagger));
        text.push('\n');
        text.push_str(&self.message);
        StoredObject::new(ObjectKind::Tag, text.into_bytes())
    }

    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        expect_kind(obj, ObjectKind::Tag)?;
        let text =
            std::str::from_utf8(&obj.data).map_err(|_| malformed("tag", "non-utf8 payload"))?;

        let mut target = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;

        let (headers, message) = split_headers(text);
        for line in headers.lines() {
            if let Some(rest) = line.strip_prefix("object ") {
                target = Some(parse_id(rest, "tag")?);
            } else if let Some(rest) = line.strip_prefix("type ") {
                target_kind = Some(
                    ObjectKind::from_str_name(rest)
                        .ok_or_else(|| malformed("tag", "unknown target type"))?,
                );
            } else if let Some(rest) = line.strip_prefix("tag ") {
                name = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("tagger ") {
                tagger = Some(parse_ident(rest, "tag")?);
            }
        }

        Ok(Self {
            target: target.ok_or_else(|| malformed("tag", "missing object header"))?,
            target_kind: target_kind.ok_or_else(|| malformed("tag", "missing type header"))?,
            name: name.ok_or_else(|| malformed("tag", "missing tag header"))?,
            tagger: tagger.ok_or_else(|| malformed("tag", "missing tagger"))?,
            message: message.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn expect_kind(obj: &StoredObject, kind: ObjectKind) -> StoreResult<()> {
    if obj.kind != kind {
        return Err(StoreError::CorruptObject {
            id: obj.compute_id(),
            reason: format!("expected {kind}, got {}", obj.kind),
        });
    }
    Ok(())
}

fn malformed(kind: &str, reason: &str) -> StoreError {
    StoreError::MalformedObject {
        kind: kind.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_id(hex: &str, kind: &str) -> StoreResult<ObjectId> {
    ObjectId::from_hex(hex).map_err(|e| malformed(kind, &e.to_string()))
}

fn parse_ident(line: &str, kind: &str) -> StoreResult<PersonIdent> {
    PersonIdent::parse(line).map_err(|e| malformed(kind, &e.to_string()))
}

fn find_byte(data: &[u8], from: usize, byte: u8) -> Option<usize> {
    data[from..].iter().position(|&b| b == byte).map(|i| from + i)
}

/// Split header block from message at the first blank line.
fn split_headers(text: &str) -> (&str, &str) {
    match text.find("\n\n") {
        Some(pos) => (&text[..pos], &text[pos + 2..]),
        None => (text, ""),
    }
}
