//! Integration tests for the `uicc` binary, run against the card images
//! under `cards/`.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

const USIM: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/cards/usim.toml");
const USIM_LOCKED: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/cards/usim-locked.toml");

/// A `uicc` command that never sees the user's config or environment.
fn uicc_cmd(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("uicc");
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env("UICC_CONFIG", home.path().join("config.toml"))
        .env("NO_COLOR", "1")
        .env_remove("UICC_OUTPUT")
        .env_remove("UICC_TIMEOUT")
        .env_remove("UICC_IMAGES")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = uicc_cmd(&home).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home).arg("--help").assert().success().stdout(
        predicate::str::contains("status")
            .and(predicate::str::contains("records"))
            .and(predicate::str::contains("phonebook"))
            .and(predicate::str::contains("unlock")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("uicc"));
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Setup errors ────────────────────────────────────────────────────

#[test]
fn test_status_without_images_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    let output = uicc_cmd(&home).arg("status").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("No card images"));
}

#[test]
fn test_missing_image_file() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("nope.toml");
    let output = uicc_cmd(&home)
        .args(["status", "-i"])
        .arg(&missing)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Could not load card image"));
}

#[test]
fn test_unknown_phone_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let output = uicc_cmd(&home)
        .args(["records", "-p", "3", "-i", USIM])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("phone"));
}

// ── Card queries ────────────────────────────────────────────────────

#[test]
fn test_status_json_reports_loaded_profile() {
    let home = tempfile::tempdir().unwrap();
    let output = uicc_cmd(&home)
        .args(["status", "-o", "json", "-i", USIM])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["phone_id"], 0);
    assert_eq!(json[0]["profile"]["state"], "LOADED");
    assert_eq!(json[0]["profile"]["iccid"], "8901260321111851072");
    assert_eq!(json[0]["slot"]["card_state"], "present");
}

#[test]
fn test_status_table_for_two_slots() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .args(["status", "-i", USIM, "-i", USIM_LOCKED])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("LOADED").and(predicate::str::contains("PIN_REQUIRED")),
        );
}

#[test]
fn test_records_plain_prints_imsi() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .args(["records", "-o", "plain", "-i", USIM])
        .assert()
        .success()
        .stdout(predicate::str::diff("310260123456789\n"));
}

#[test]
fn test_records_table_shows_spn() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .args(["records", "-i", USIM])
        .assert()
        .success()
        .stdout(predicate::str::contains("ACME").and(predicate::str::contains("310260")));
}

#[test]
fn test_phonebook_lists_entries() {
    let home = tempfile::tempdir().unwrap();
    let output = uicc_cmd(&home)
        .args(["phonebook", "-o", "json", "-i", USIM])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["alpha_tag"], "Alice");
    assert_eq!(entries[0]["emails"][0], "alice@example.com");
}

#[test]
fn test_fplmn_set_then_read_back() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .args(["fplmn", "set", "310410", "310150", "-o", "plain", "-i", USIM])
        .assert()
        .success()
        .stdout(predicate::str::contains("310410").and(predicate::str::contains("310150")));
}

#[test]
fn test_fplmn_rejects_bad_plmn() {
    let home = tempfile::tempdir().unwrap();
    let output = uicc_cmd(&home)
        .args(["fplmn", "set", "31x41", "-i", USIM])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Unlock ──────────────────────────────────────────────────────────

#[test]
fn test_unlock_with_correct_pin() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .args(["unlock", "--pin", "1234", "-o", "plain", "-i", USIM_LOCKED])
        .assert()
        .success()
        .stdout(predicate::str::contains("LOADED"));
}

#[test]
fn test_unlock_with_wrong_pin_is_an_auth_error() {
    let home = tempfile::tempdir().unwrap();
    let output = uicc_cmd(&home)
        .args(["unlock", "--pin", "0000", "-i", USIM_LOCKED])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("2 attempts left"));
}

#[test]
fn test_unlock_with_puk_sets_new_pin() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .args([
            "unlock", "--puk", "12345678", "--pin", "4321", "-o", "plain", "-i", USIM_LOCKED,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("LOADED"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_override() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();
    uicc_cmd(&home).args(["config", "init"]).assert().success();
    assert!(home.path().join("config.toml").exists());

    uicc_cmd(&home)
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--force"));

    uicc_cmd(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pin_storage = \"memory\""));
}

#[test]
fn test_images_from_config_file() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(
        home.path().join("config.toml"),
        format!("images = [{USIM:?}]\n\n[defaults]\noutput = \"plain\"\n"),
    )
    .unwrap();
    uicc_cmd(&home)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 LOADED"));
}
