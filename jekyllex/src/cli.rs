use crate::log::Level;
use clap::{Parser, Subcommand, crate_version};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "jekyllex",
    version,
    color = clap::ColorChoice::Auto,
    dont_delimit_trailing_values = true,
    about = format!("jekyllex {}: run Jekyll sites from a bundled Ruby toolchain", crate_version!())
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global_options: GlobalOptions,
}

#[derive(Clone, Debug, Parser)]
pub struct GlobalOptions {
    #[arg(short, long, global = true, help = "Enable additional debug logs.")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Silence all logs"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        env = "JEKYLLEX_PREFIX",
        value_name = "DIR",
        help = "Sandbox root holding files/home and files/usr."
    )]
    pub prefix: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "JEKYLLEX_CONFIG",
        value_name = "FILE",
        help = "Settings file. Defaults to jekyllex.yaml in the current directory."
    )]
    pub config: Option<PathBuf>,
}

impl GlobalOptions {
    pub fn level(&self) -> Level {
        if self.verbose {
            Level::Debug
        } else if self.quiet {
            Level::Silent
        } else {
            Level::default()
        }
    }
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Check that the Ruby/Jekyll toolchain is usable.")]
    Check {
        #[arg(
            long,
            value_name = "SCRIPT",
            help = "Run this bootstrap script once when binaries are missing, then check again."
        )]
        install: Option<PathBuf>,
    },

    #[command(about = "Start the preview server for a site and stream its output.")]
    Serve {
        site: PathBuf,

        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            help = "Extra arguments for `jekyll serve`."
        )]
        args: Vec<String>,
    },

    #[command(about = "Run one command on the persistent shell.")]
    Exec {
        #[arg(long, value_name = "DIR", help = "Working directory for the command.")]
        cwd: Option<PathBuf>,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    #[command(
        about = "Read commands from stdin and run them one by one.",
        long_about = "Read commands from stdin and run them one by one.\n\n\
            Lines starting with ':' control the session: :kill stops the server, \
            :clear empties the log, :status shows the server state, :logs prints \
            the log and :quit exits."
    )]
    Shell,

    #[command(about = "Print front matter values of a page or post.")]
    Yaml {
        file: PathBuf,

        #[arg(required = true)]
        keys: Vec<String>,
    },

    #[command(about = "Guess the URL a file of a site is published at.")]
    Url {
        site: PathBuf,

        #[arg(help = "Path of the file relative to the site root.")]
        file: PathBuf,
    },
}
