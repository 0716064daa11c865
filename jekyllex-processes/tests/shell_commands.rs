//! Commands dispatched to the persistent shell.

mod common;

use common::*;
use jekyllex_core::{Command, commands};
use jekyllex_processes::{CommandOutcome, ManagerError, SessionError};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread")]
async fn test_output_is_logged_before_completion() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let completion = manager.exec(commands::echo(["hello"])).await.unwrap();
    let outcome = timeout(TEST_TIMEOUT, completion).await.unwrap();

    assert_eq!(outcome, CommandOutcome::Exited(0));
    assert_eq!(manager.logs(), vec!["hello"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_commands_run_in_submission_order() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let mut completions = Vec::new();
    for word in ["one", "two", "three"] {
        completions.push(manager.exec(commands::echo([word])).await.unwrap());
    }
    for completion in completions {
        assert!(timeout(TEST_TIMEOUT, completion).await.unwrap().success());
    }

    assert_eq!(manager.logs(), vec!["one", "two", "three"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_runs_in_its_directory() {
    let ctx = TestContext::new();
    let site = ctx.create_site("blog");
    let manager = ctx.create_manager();

    let completion = manager
        .exec(Command::new(["pwd"]).in_dir(&site))
        .await
        .unwrap();
    timeout(TEST_TIMEOUT, completion).await.unwrap();

    // Without a directory the command runs in HOME_DIR again.
    let completion = manager.exec(Command::new(["pwd"])).await.unwrap();
    timeout(TEST_TIMEOUT, completion).await.unwrap();

    assert_eq!(
        manager.logs(),
        vec![
            site.display().to_string(),
            ctx.layout().home_dir().display().to_string(),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exit_code_is_propagated() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let completion = manager.exec(commands::shell("exit 3")).await.unwrap();
    assert_eq!(
        timeout(TEST_TIMEOUT, completion).await.unwrap(),
        CommandOutcome::Exited(3)
    );

    let completion = manager.exec(Command::new(["false"])).await.unwrap();
    assert_eq!(
        timeout(TEST_TIMEOUT, completion).await.unwrap(),
        CommandOutcome::Exited(1)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stderr_is_captured() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let completion = manager
        .exec(commands::shell("echo out; echo oops >&2"))
        .await
        .unwrap();
    timeout(TEST_TIMEOUT, completion).await.unwrap();

    assert_eq!(manager.logs(), vec!["out", "oops"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_output_without_newline_is_a_whole_line() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let completion = manager
        .exec(Command::new(["printf", "no newline"]))
        .await
        .unwrap();
    timeout(TEST_TIMEOUT, completion).await.unwrap();

    assert_eq!(manager.logs(), vec!["no newline"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_command_is_rejected() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let result = manager.exec(Command::new(Vec::<String>::new())).await;
    assert!(matches!(result, Err(ManagerError::EmptyCommand)));
    assert!(manager.logs().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shell_is_respawned_after_exit() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let completion = manager.exec(Command::new(["exit"])).await.unwrap();
    assert!(matches!(
        timeout(TEST_TIMEOUT, completion).await.unwrap(),
        CommandOutcome::Failed(_)
    ));

    let completion = manager.exec(commands::echo(["back"])).await.unwrap();
    assert_eq!(
        timeout(TEST_TIMEOUT, completion).await.unwrap(),
        CommandOutcome::Exited(0)
    );
    assert_eq!(manager.logs(), vec!["back"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_shell_respawn_is_logged() {
    let mut ctx = TestContext::new();
    ctx.settings.shell = ctx
        .create_binary("login-sh", "#!/bin/sh\nexec /bin/sh \"$@\"\n")
        .await;
    let manager = ctx.create_manager();

    let completion = manager.exec(Command::new(["exit"])).await.unwrap();
    assert!(matches!(
        timeout(TEST_TIMEOUT, completion).await.unwrap(),
        CommandOutcome::Failed(_)
    ));

    std::fs::remove_file(&ctx.settings.shell).unwrap();
    let result = timeout(TEST_TIMEOUT, manager.exec(commands::echo(["unreachable"])))
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(ManagerError::Session(SessionError::Spawn { .. }))
    ));

    let logs = manager.logs();
    let failures: Vec<_> = logs
        .iter()
        .filter(|l| l.starts_with("Failed to start shell"))
        .collect();
    assert_eq!(failures.len(), 1, "unexpected log {logs:?}");
    assert!(failures[0].contains("login-sh"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_command_restarts_shell() {
    let mut ctx = TestContext::new();
    ctx.settings.command_timeout_secs = Some(1);
    let manager = ctx.create_manager();

    let completion = manager.exec(Command::new(["sleep", "30"])).await.unwrap();
    assert_eq!(
        timeout(TEST_TIMEOUT, completion).await.unwrap(),
        CommandOutcome::TimedOut
    );
    assert!(
        manager
            .logs()
            .iter()
            .any(|l| l.starts_with("Command timed out"))
    );

    let completion = manager.exec(commands::echo(["still here"])).await.unwrap();
    assert_eq!(
        timeout(TEST_TIMEOUT, completion).await.unwrap(),
        CommandOutcome::Exited(0)
    );
    assert_eq!(manager.logs().last().map(String::as_str), Some("still here"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_echo_commands_precede_output() {
    let mut ctx = TestContext::new();
    ctx.settings.echo_commands = true;
    let manager = ctx.create_manager();

    let completion = manager.exec(commands::echo(["hi there"])).await.unwrap();
    timeout(TEST_TIMEOUT, completion).await.unwrap();

    assert_eq!(manager.logs(), vec!["$ echo 'hi there'", "hi there"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_echo_lines_follow_execution_order() {
    let mut ctx = TestContext::new();
    ctx.settings.echo_commands = true;
    let manager = ctx.create_manager();

    let (a, b, c, d) = tokio::join!(
        manager.exec(commands::echo(["alpha"])),
        manager.exec(commands::echo(["bravo"])),
        manager.exec(commands::echo(["charlie"])),
        manager.exec(commands::echo(["delta"])),
    );
    for completion in [a, b, c, d] {
        let outcome = timeout(TEST_TIMEOUT, completion.unwrap()).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Exited(0));
    }

    let logs = manager.logs();
    let echoed: Vec<&str> = logs
        .iter()
        .filter_map(|l| l.strip_prefix("$ echo "))
        .collect();
    let printed: Vec<&str> = logs
        .iter()
        .filter(|l| !l.starts_with("$ "))
        .map(String::as_str)
        .collect();
    assert_eq!(echoed.len(), 4, "unexpected log {logs:?}");
    assert_eq!(echoed, printed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_log_keeps_newest_lines() {
    let mut ctx = TestContext::new();
    ctx.settings.log_capacity = 5;
    let manager = ctx.create_manager();

    let completion = manager
        .exec(commands::shell(
            "i=1; while [ $i -le 20 ]; do echo $i; i=$((i+1)); done",
        ))
        .await
        .unwrap();
    timeout(TEST_TIMEOUT, completion).await.unwrap();

    assert_eq!(manager.logs(), vec!["16", "17", "18", "19", "20"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clear_logs() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    manager.append_log("before");
    manager.clear_logs();
    assert!(manager.logs().is_empty());

    let completion = manager.exec(commands::echo(["after"])).await.unwrap();
    timeout(TEST_TIMEOUT, completion).await.unwrap();
    assert_eq!(manager.logs(), vec!["after"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_fails_pending_and_rejects_new_commands() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let pending = manager.exec(Command::new(["sleep", "30"])).await.unwrap();
    timeout(TEST_TIMEOUT, manager.stop()).await.unwrap();

    assert!(matches!(
        timeout(TEST_TIMEOUT, pending).await.unwrap(),
        CommandOutcome::Failed(_)
    ));
    assert!(matches!(
        manager.exec(commands::echo(["late"])).await,
        Err(ManagerError::Stopped)
    ));

    // Stopping twice is harmless.
    timeout(TEST_TIMEOUT, manager.stop()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_token_stops_manager() {
    let ctx = TestContext::new();
    let manager = ctx.create_manager();

    let pending = manager.exec(Command::new(["sleep", "30"])).await.unwrap();
    manager.stop_token().cancel();

    assert!(matches!(
        timeout(TEST_TIMEOUT, pending).await.unwrap(),
        CommandOutcome::Failed(_)
    ));
    assert!(manager.is_stopped());
    assert!(matches!(
        manager.exec(commands::echo(["x"])).await,
        Err(ManagerError::Stopped)
    ));
}
