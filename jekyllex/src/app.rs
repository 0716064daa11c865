use jekyllex_core::commands::{self, YAML_NIL};
use jekyllex_core::{
    BinaryResolver, BootstrapInstaller, CONFIG_FILE, Command, EnvironmentBuilder, Layout, Settings,
};
use jekyllex_processes::{CommandOutcome, LogEvent, ProcessManager};
use miette::{IntoDiagnostic, Result, WrapErr, bail};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cli::{Cli, Commands, GlobalOptions};
use crate::shutdown::Shutdown;

/// Characters that make a typed line need a real shell to interpret it.
const SHELL_SYNTAX: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '$', '`', '\\', '"', '\'', '*', '?', '[', ']', '#', '~',
    '=', '%', '{', '}',
];

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(&cli.global_options)?;
    debug!("Using settings {:?}", settings);

    match cli.command {
        Commands::Check { install } => check(&settings, install).await,
        Commands::Serve { site, args } => {
            let command = commands::jekyll(std::iter::once("serve".to_string()).chain(args))
                .in_dir(absolute(&site)?);
            with_manager(settings, |manager| async move {
                let lines = stream(&manager, command, print_line).await?;
                Ok(exit_code(&lines.outcome))
            })
            .await
        }
        Commands::Exec { cwd, argv } => {
            let mut command = Command::new(argv);
            if let Some(cwd) = cwd {
                command = command.in_dir(absolute(&cwd)?);
            }
            with_manager(settings, |manager| async move {
                let lines = stream(&manager, command, print_line).await?;
                Ok(exit_code(&lines.outcome))
            })
            .await
        }
        Commands::Shell => with_manager(settings, interactive).await,
        Commands::Yaml { file, keys } => {
            let command = commands::get_from_yaml(&absolute(&file)?, keys.iter().cloned());
            quiet_manager(settings, |manager| async move {
                let output = capture(&manager, command).await?;
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                for (key, value) in commands::parse_yaml_values(&output.join("\n"), &keys) {
                    print_line(&format!("{key}: {}", value.as_deref().unwrap_or(YAML_NIL)));
                }
                Ok(ExitCode::SUCCESS)
            })
            .await
        }
        Commands::Url { site, file } => {
            let command = commands::guess_destination_url(&file).in_dir(absolute(&site)?);
            quiet_manager(settings, |manager| async move {
                let output = capture(&manager, command).await?;
                match output.last() {
                    Some(url) => {
                        print_line(url);
                        Ok(ExitCode::SUCCESS)
                    }
                    None => bail!("No URL could be determined for {}", file.display()),
                }
            })
            .await
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to resolve {}", path.display()))
}

fn load_settings(options: &GlobalOptions) -> Result<Settings> {
    let mut settings = match &options.config {
        Some(path) => Settings::load(path),
        None => Settings::load_or_default(Path::new(CONFIG_FILE)),
    }
    .into_diagnostic()?;

    if let Some(prefix) = &options.prefix {
        settings.prefix = prefix.clone();
    }
    settings.prefix = absolute(&settings.prefix)?;
    Ok(settings)
}

/// Runs a user-provided bootstrap script.
struct ScriptInstaller {
    script: PathBuf,
}

impl BootstrapInstaller for ScriptInstaller {
    fn install(&self, layout: &Layout) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let status = std::process::Command::new(&self.script)
            .env("PREFIX", layout.prefix())
            .status()?;
        if !status.success() {
            return Err(format!("{} {}", self.script.display(), status).into());
        }
        Ok(())
    }
}

async fn check(settings: &Settings, install: Option<PathBuf>) -> Result<ExitCode> {
    let env = EnvironmentBuilder::new(settings.layout()).with_extra(settings.env.clone());
    let resolver = BinaryResolver::new(env, settings.probe_timeout());

    if let Some(script) = install {
        let installer = ScriptInstaller { script };
        if let Err(e) = resolver
            .ensure_toolchain(&installer, &settings.required_binaries)
            .await
        {
            warn!("{}", e);
        }
    }

    let missing = resolver.missing(&settings.required_binaries).await;
    for name in &settings.required_binaries {
        let status = if missing.contains(name) {
            "missing"
        } else {
            "ok"
        };
        print_line(&format!("{name}: {status}"));
    }

    if missing.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn with_manager<F, Fut>(settings: Settings, body: F) -> Result<ExitCode>
where
    F: FnOnce(ProcessManager) -> Fut,
    Fut: std::future::Future<Output = Result<ExitCode>>,
{
    let manager = ProcessManager::start(settings)
        .into_diagnostic()
        .wrap_err("Failed to start the process manager")?;
    Shutdown::new(manager.stop_token())
        .install_signals()
        .into_diagnostic()
        .wrap_err("Failed to install signal handlers")?;

    let result = body(manager.clone()).await;
    manager.stop().await;
    result
}

/// Like [`with_manager`], without `$ command` lines in the log.
async fn quiet_manager<F, Fut>(mut settings: Settings, body: F) -> Result<ExitCode>
where
    F: FnOnce(ProcessManager) -> Fut,
    Fut: std::future::Future<Output = Result<ExitCode>>,
{
    settings.echo_commands = false;
    with_manager(settings, body).await
}

struct Finished {
    outcome: CommandOutcome,
    lines: Vec<String>,
}

/// Run `command`, handing every log line to `on_line` until it completes.
async fn stream(
    manager: &ProcessManager,
    command: Command,
    on_line: impl Fn(&str),
) -> Result<Finished> {
    let mut events = manager.subscribe();
    let mut completion = manager.exec(command).await.into_diagnostic()?;
    let mut lines = Vec::new();

    let outcome = loop {
        tokio::select! {
            outcome = &mut completion => break outcome,
            event = events.recv() => handle_event(event, &on_line, &mut lines),
        }
    };
    // Lines logged right before completion may still be queued.
    while let Ok(event) = events.try_recv() {
        handle_event(Ok(event), &on_line, &mut lines);
    }

    Ok(Finished { outcome, lines })
}

fn handle_event(
    event: Result<LogEvent, broadcast::error::RecvError>,
    on_line: &impl Fn(&str),
    lines: &mut Vec<String>,
) {
    match event {
        Ok(LogEvent::Line(line)) => {
            on_line(&line);
            lines.push(line);
        }
        Ok(LogEvent::Cleared) => lines.clear(),
        Err(broadcast::error::RecvError::Lagged(n)) => warn!("Output too fast, skipped {} lines", n),
        Err(broadcast::error::RecvError::Closed) => {}
    }
}

/// Run `command` and collect its output without printing it.
async fn capture(manager: &ProcessManager, command: Command) -> Result<Vec<String>> {
    let finished = stream(manager, command, |_| {}).await?;
    if !finished.outcome.success() {
        for line in &finished.lines {
            eprintln!("{line}");
        }
        bail!("Command {}", finished.outcome);
    }
    Ok(finished.lines)
}

async fn interactive(manager: ProcessManager) -> Result<ExitCode> {
    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LogEvent::Line(line)) => print_line(&line),
                Ok(LogEvent::Cleared) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Output too fast, skipped {} lines", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let token = manager.stop_token();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = input.next_line() => line.into_diagnostic()?,
            _ = token.cancelled() => break,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            ":quit" => break,
            ":kill" => {
                if !manager.kill_process().await {
                    manager.append_log("No server is running");
                }
            }
            ":clear" => manager.clear_logs(),
            ":status" => {
                let state = manager.server_state();
                let status = match (state.current(), state.last_exit()) {
                    (Some(server), _) => format!(
                        "Server running (pid {}) in {}",
                        server.pid.map_or_else(|| "?".to_string(), |p| p.to_string()),
                        server.cwd.display()
                    ),
                    (None, Some(outcome)) => format!("Server stopped, last run {outcome}"),
                    (None, None) => "Server not started".to_string(),
                };
                manager.append_log(status);
            }
            ":logs" => {
                for line in manager.logs() {
                    print_line(&line);
                }
            }
            _ => {
                let command = parse_line(line);
                let server = command.is_server();
                match manager.exec(command).await {
                    // The server keeps running in the background.
                    Ok(_) if server => {}
                    Ok(completion) => {
                        let outcome = completion.await;
                        if !outcome.success() {
                            manager.append_log(format!("[{outcome}]"));
                        }
                    }
                    Err(e) => manager.append_log(format!("Error: {e}")),
                }
            }
        }
    }

    manager.stop().await;
    printer.abort();
    Ok(ExitCode::SUCCESS)
}

/// Plain words become an argument vector; anything with shell syntax goes through `/bin/sh -c`.
fn parse_line(line: &str) -> Command {
    if line.contains(SHELL_SYNTAX) {
        commands::shell(line)
    } else {
        Command::new(line.split_whitespace())
    }
}

fn exit_code(outcome: &CommandOutcome) -> ExitCode {
    match outcome {
        CommandOutcome::Exited(code) => ExitCode::from(u8::try_from(*code).unwrap_or(1)),
        CommandOutcome::Killed | CommandOutcome::Signaled(_) => ExitCode::from(130),
        CommandOutcome::TimedOut => ExitCode::from(124),
        CommandOutcome::Failed(_) => ExitCode::FAILURE,
    }
}

fn print_line(line: &str) {
    let _ = writeln!(std::io::stdout().lock(), "{line}");
}
