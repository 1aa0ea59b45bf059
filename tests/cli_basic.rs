use assert_cmd::Command;
use tempfile::{tempdir, TempDir};

// Every run gets its own HOME so config, database and log land in a tempdir.
fn pocketed(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pocketed").unwrap();
    cmd.env("HOME", home.path())
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).unwrap()
}

#[test]
fn stats_on_fresh_install_shows_no_games() {
    let home = tempdir().unwrap();
    let text = stdout_of(pocketed(&home).args(["stats", "--user", "ana"]));
    assert!(text.contains("ana: 0 games"), "got: {text}");
    assert!(text.contains("win rate -"));
    assert!(home
        .path()
        .join(".local/state/pocketed/sessions.db")
        .exists());
}

#[test]
fn config_changes_persist_between_runs() {
    let home = tempdir().unwrap();
    pocketed(&home)
        .args(["config", "--goal", "600", "--set-user", "bo"])
        .assert()
        .success();

    let text = stdout_of(pocketed(&home).arg("config"));
    assert!(text.contains("\"goal_secs\": 600"), "got: {text}");
    assert!(text.contains("\"user_id\": \"bo\""));
    assert!(text.contains("\"grace_secs\": 300"));
}

#[test]
fn config_rejects_zero_grace() {
    let home = tempdir().unwrap();
    pocketed(&home)
        .args(["config", "--grace", "0"])
        .assert()
        .failure();
}

#[test]
fn export_of_empty_history_is_empty() {
    let home = tempdir().unwrap();
    let text = stdout_of(pocketed(&home).args(["export", "--user", "ana"]));
    assert!(text.is_empty());
}

#[test]
fn play_requires_a_terminal() {
    let home = tempdir().unwrap();
    let out = pocketed(&home).arg("play").assert().failure().get_output().stderr.clone();
    assert!(String::from_utf8_lossy(&out).contains("stdin must be a tty"));
}
