use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::layout::Layout;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("failed to create home directory {path}: {source}")]
    CreateHome {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to join PATH entries: {0}")]
    JoinPath(#[from] std::env::JoinPathsError),
}

/// Variables handed to a spawned process. Built once per spawn, never mutated after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Builds the environment for processes running against the toolchain.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    layout: Layout,
    extra: BTreeMap<String, String>,
    inherited_path: Option<OsString>,
}

impl EnvironmentBuilder {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            extra: BTreeMap::new(),
            inherited_path: std::env::var_os("PATH"),
        }
    }

    /// Additional variables; the toolchain variables always win over these.
    pub fn with_extra(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_inherited_path(mut self, path: Option<OsString>) -> Self {
        self.inherited_path = path;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Environment for a process whose working directory is `cwd`.
    ///
    /// Creates `HOME_DIR` when it is missing, so this is called on every spawn.
    pub fn build(&self, cwd: &Path) -> Result<Environment, EnvError> {
        let home = self.layout.home_dir();
        std::fs::create_dir_all(&home).map_err(|source| EnvError::CreateHome {
            path: home.clone(),
            source,
        })?;

        let mut paths = vec![self.layout.bin_dir()];
        if let Some(inherited) = &self.inherited_path {
            paths.extend(std::env::split_paths(inherited));
        }
        let path = std::env::join_paths(paths)?;

        let mut vars = self.extra.clone();
        vars.insert("PWD".into(), cwd.to_string_lossy().into_owned());
        vars.insert("HOME".into(), home.to_string_lossy().into_owned());
        vars.insert(
            "PREFIX".into(),
            self.layout.prefix().to_string_lossy().into_owned(),
        );
        vars.insert("PATH".into(), path.to_string_lossy().into_owned());

        Ok(Environment { vars })
    }
}
