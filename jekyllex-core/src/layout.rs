use std::path::{Path, PathBuf};

/// Fixed directory layout under the application sandbox root (`PREFIX`).
///
/// ```text
/// PREFIX/
///   files/
///     home/      HOME_DIR, where projects live
///     usr/       USR_DIR, the unpacked toolchain
///       bin/     BIN_DIR
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    prefix: PathBuf,
}

impl Layout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn files_dir(&self) -> PathBuf {
        self.prefix.join("files")
    }

    pub fn home_dir(&self) -> PathBuf {
        self.files_dir().join("home")
    }

    pub fn usr_dir(&self) -> PathBuf {
        self.files_dir().join("usr")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.usr_dir().join("bin")
    }

    /// Absolute path of a toolchain binary.
    pub fn binary(&self, name: &str) -> PathBuf {
        self.bin_dir().join(name)
    }

    /// Resolve the program of an argument vector to the path that gets spawned.
    ///
    /// Absolute paths (e.g. `/bin/sh`) are used as is, anything else is looked
    /// up in `BIN_DIR`.
    pub fn resolve_program(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.binary(program)
        }
    }
}
