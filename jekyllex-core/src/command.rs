use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

/// Subcommands that keep `jekyll` running as a preview server.
const SERVE_SUBCOMMANDS: [&str; 3] = ["serve", "server", "s"];

/// An argument vector plus an optional working directory.
///
/// Immutable once built; construct it with the functions in [`crate::commands`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
}

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    /// Run the command from `dir` instead of the target's current directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Whether this command starts the long-running Jekyll preview server.
    ///
    /// Matches `jekyll serve`, `/abs/path/jekyll serve` and `bundle exec jekyll serve`,
    /// with global flags allowed between `jekyll` and the subcommand. `jekyll` has to
    /// be the program itself, not an argument of some other program.
    pub fn is_server(&self) -> bool {
        let rest = match self.argv.as_slice() {
            [program, rest @ ..] if file_name_is(program, "jekyll") => rest,
            [program, exec, jekyll, rest @ ..]
                if file_name_is(program, "bundle")
                    && exec == "exec"
                    && file_name_is(jekyll, "jekyll") =>
            {
                rest
            }
            _ => return false,
        };

        rest.iter()
            .find(|arg| !arg.starts_with('-'))
            .is_some_and(|sub| SERVE_SUBCOMMANDS.contains(&sub.as_str()))
    }

    /// The argument vector rendered as one shell-escaped line.
    pub fn to_shell_line(&self) -> String {
        self.argv
            .iter()
            .map(|arg| shell_escape::escape(Cow::Borrowed(arg.as_str())))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_line())
    }
}

fn file_name_is(arg: &str, name: &str) -> bool {
    Path::new(arg).file_name().is_some_and(|file| file == name)
}

impl From<Vec<String>> for Command {
    fn from(argv: Vec<String>) -> Self {
        Self { argv, cwd: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_and_args() {
        let cmd = Command::new(["git", "status", "-s"]);
        assert_eq!(cmd.program(), Some("git"));
        assert_eq!(cmd.args(), ["status", "-s"]);
        assert!(Command::new(Vec::<String>::new()).args().is_empty());
    }

    #[test]
    fn test_is_server() {
        assert!(Command::new(["jekyll", "serve"]).is_server());
        assert!(Command::new(["jekyll", "s", "--livereload"]).is_server());
        assert!(Command::new(["jekyll", "--trace", "server"]).is_server());
        assert!(Command::new(["bundle", "exec", "jekyll", "serve"]).is_server());
        assert!(Command::new(["/data/usr/bin/jekyll", "serve"]).is_server());

        assert!(!Command::new(["jekyll", "build"]).is_server());
        assert!(!Command::new(["jekyll"]).is_server());
        assert!(!Command::new(["echo", "jekyll", "serve-later"]).is_server());
        assert!(!Command::new(["git", "serve"]).is_server());
    }

    #[test]
    fn test_jekyll_as_argument_is_not_a_server() {
        assert!(!Command::new(["echo", "jekyll", "serve"]).is_server());
        assert!(!Command::new(["rm", "-rf", "/home/me/sites/jekyll", "s"]).is_server());
        assert!(!Command::new(["cat", "notes/jekyll", "server"]).is_server());
        assert!(!Command::new(["bundle", "install", "jekyll", "serve"]).is_server());
        assert!(!Command::new(["/bin/sh", "-c", "jekyll serve"]).is_server());

        assert!(Command::new(["/data/usr/bin/bundle", "exec", "jekyll", "s"]).is_server());
        assert!(Command::new(["bundle", "exec", "jekyll", "--trace", "serve"]).is_server());
    }

    #[test]
    fn test_to_shell_line_escapes() {
        let cmd = Command::new(["echo", "it's", "a b", "plain"]);
        assert_eq!(cmd.to_shell_line(), r#"echo 'it'\''s' 'a b' plain"#);
    }

    #[test]
    fn test_in_dir() {
        let cmd = Command::new(["ls"]).in_dir("/tmp/site");
        assert_eq!(cmd.cwd(), Some(Path::new("/tmp/site")));
    }
}
