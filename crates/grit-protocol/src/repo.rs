//! The repository handle the protocol engines operate on.

use std::path::PathBuf;
use std::sync::Arc;

use grit_pack::{ObjectDatabase, PackResult};
use grit_refs::RefStore;
use grit_store::ObjectStore;
use grit_types::{Config, CoreSettings};

/// An object database plus a ref namespace.
///
/// Sessions hold a shared reference; the database supports concurrent
/// readers and ref updates are compare-and-swap, so no session-level lock
/// is needed.
pub struct Repository {
    odb: ObjectDatabase,
    refs: Arc<dyn RefStore>,
    settings: CoreSettings,
}

impl Repository {
    /// Open the repository whose objects live under `git_dir/objects`.
    pub fn open(
        git_dir: impl Into<PathBuf>,
        refs: Arc<dyn RefStore>,
        config: &dyn Config,
    ) -> PackResult<Self> {
        let settings = CoreSettings::from_config(config);
        let odb = ObjectDatabase::open(git_dir.into().join("objects"), settings)?;
        Ok(Self {
            odb,
            refs,
            settings,
        })
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        &self.odb
    }

    pub fn odb(&self) -> &ObjectDatabase {
        &self.odb
    }

    pub fn refs(&self) -> &dyn RefStore {
        self.refs.as_ref()
    }

    pub fn settings(&self) -> CoreSettings {
        self.settings
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("odb", &self.odb)
            .finish()
    }
}
