//! Argument vectors for every external tool the editor runs.
//!
//! Nothing here executes anything. Values that end up inside a `ruby -e`
//! program are passed through `ARGV` after a `--` separator and never spliced
//! into the program text.

use std::path::Path;

use crate::command::Command;

/// Sentinel printed by [`get_from_yaml`] for keys that are absent.
pub const YAML_NIL: &str = "nil";

const FRONT_MATTER_SCRIPT: &str = r#"file, *keys = ARGV
text = File.read(file)
if (m = text.match(/\A---[ \t]*\r?\n(.*?)^(?:---|\.\.\.)[ \t]*$/m))
  text = m[1]
end
data = YAML.safe_load(text, permitted_classes: [Date, Time]) || {}
data = {} unless data.is_a?(Hash)
keys.each do |key|
  value = data[key]
  puts(value.nil? ? "nil" : value.to_s)
end"#;

const DESTINATION_URL_SCRIPT: &str = r##"file = ARGV[0]
site = Jekyll::Site.new(Jekyll.configuration("quiet" => true))
collection = site.collections.values.find do |c|
  file.start_with?("#{c.relative_directory}/")
end
doc = if collection
  d = Jekyll::Document.new(File.expand_path(file, site.source), site: site, collection: collection)
  d.read
  d
else
  dir = File.dirname(file)
  Jekyll::Page.new(site, site.source, dir == "." ? "" : dir, File.basename(file))
end
puts "#{site.baseurl.to_s.chomp("/")}#{doc.url}""##;

fn tool<I, S>(name: &str, args: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Command::new(std::iter::once(name.to_string()).chain(args.into_iter().map(Into::into)))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `/bin/sh -c <script>`, for raw user-typed shell lines.
pub fn shell(script: impl Into<String>) -> Command {
    Command::new(["/bin/sh".to_string(), "-c".to_string(), script.into()])
}

pub fn git<I: IntoIterator<Item = S>, S: Into<String>>(args: I) -> Command {
    tool("git", args)
}

pub fn jekyll<I: IntoIterator<Item = S>, S: Into<String>>(args: I) -> Command {
    tool("jekyll", args)
}

pub fn bundle<I: IntoIterator<Item = S>, S: Into<String>>(args: I) -> Command {
    tool("bundle", args)
}

pub fn gem<I: IntoIterator<Item = S>, S: Into<String>>(args: I) -> Command {
    tool("gem", args)
}

pub fn ruby<I: IntoIterator<Item = S>, S: Into<String>>(args: I) -> Command {
    tool("ruby", args)
}

pub fn curl<I: IntoIterator<Item = S>, S: Into<String>>(args: I) -> Command {
    tool("curl", args)
}

pub fn rm_dir<I: IntoIterator<Item = S>, S: Into<String>>(paths: I) -> Command {
    tool("rm", std::iter::once("-rf".to_string()).chain(paths.into_iter().map(Into::into)))
}

pub fn mkdir<I: IntoIterator<Item = S>, S: Into<String>>(paths: I) -> Command {
    tool("mkdir", std::iter::once("-p".to_string()).chain(paths.into_iter().map(Into::into)))
}

pub fn touch<I: IntoIterator<Item = S>, S: Into<String>>(paths: I) -> Command {
    tool("touch", paths)
}

pub fn mv(from: impl Into<String>, to: impl Into<String>) -> Command {
    tool("mv", [from.into(), to.into()])
}

pub fn cat<I: IntoIterator<Item = S>, S: Into<String>>(paths: I) -> Command {
    tool("cat", paths)
}

pub fn stat<I: IntoIterator<Item = S>, S: Into<String>>(paths: I) -> Command {
    tool("stat", paths)
}

pub fn du<I: IntoIterator<Item = S>, S: Into<String>>(paths: I) -> Command {
    tool("du", std::iter::once("-sh".to_string()).chain(paths.into_iter().map(Into::into)))
}

pub fn echo<I: IntoIterator<Item = S>, S: Into<String>>(args: I) -> Command {
    tool("echo", args)
}

/// Print the front matter values of `file` for each of `properties`, one per line.
///
/// Absent keys print [`YAML_NIL`]; use [`parse_yaml_values`] on the output.
pub fn get_from_yaml<I, S>(file: &Path, properties: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut argv = vec![
        "-ryaml".to_string(),
        "-rdate".to_string(),
        "-e".to_string(),
        FRONT_MATTER_SCRIPT.to_string(),
        "--".to_string(),
        path_arg(file),
    ];
    argv.extend(properties.into_iter().map(Into::into));
    ruby(argv)
}

/// Pair the output of [`get_from_yaml`] with the requested keys.
///
/// Missing trailing lines and the `nil` sentinel both map to `None`.
pub fn parse_yaml_values<'a>(output: &str, keys: &[&'a str]) -> Vec<(&'a str, Option<String>)> {
    let mut lines = output.lines();
    keys.iter()
        .map(|key| {
            let value = lines
                .next()
                .filter(|line| *line != YAML_NIL)
                .map(str::to_string);
            (*key, value)
        })
        .collect()
}

/// Print the URL `file` (relative to the site root) will be published at.
///
/// Must run with the site root as working directory.
pub fn guess_destination_url(file: &Path) -> Command {
    ruby([
        "-rjekyll".to_string(),
        "-e".to_string(),
        DESTINATION_URL_SCRIPT.to_string(),
        "--".to_string(),
        path_arg(file),
    ])
}
