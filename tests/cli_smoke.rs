//! Drive the `hrml` binary end to end inside a temporary working directory.
//!
//! Each test runs with its own cwd so the config file and the remembered
//! preferences never leak between tests.

use std::process::Command; // spawn

use assert_cmd::prelude::*; // assert helpers
use assert_fs::prelude::*; // fixture helpers
use predicates::prelude::*; // output predicates

mod util; // share fixture + report sample
use util::{CODE, make_share, write_result};

/// `hrml` with a clean environment rooted at `dir`.
fn hrml(dir: &std::path::Path) -> Command
{
    let mut cmd = Command::cargo_bin("hrml").expect("bin");
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("HRMLINK_SHARE__ROOT")
        .env_remove("HRMLINK_REMOTE__HOST")
        .stdin(std::process::Stdio::null());
    cmd
}

/// Share + project manifest with one local image, paths relative to the
/// manifest.
fn fixture() -> assert_fs::TempDir
{
    let tmp = make_share();
    tmp.child("data/SampleA.tif")
        .write_binary(b"raw pixels")
        .expect("raw");
    tmp.child("project.json")
        .write_str(r#"{ "images": [ { "name": "SampleA.tif", "uri": "data/SampleA.tif" } ] }"#)
        .expect("manifest");
    tmp
}

#[test]
fn init_writes_config_and_refuses_second_time()
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    hrml(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));
    tmp.child("hrmlink.toml")
        .assert(predicate::str::contains("code_length = 13"));

    // Second run without --force must fail and keep the file
    hrml(tmp.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn send_then_retrieve_through_the_binary()
{
    let tmp = fixture();

    // Send the one image; root and user come from flags
    hrml(tmp.path())
        .args(["send", "--all", "--root", "share", "-u", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1/1 sent, 0/1 skipped, 0/1 failed"));
    tmp.child("share/alice/Raw/Local/SampleA.tif")
        .assert(predicate::path::is_file());

    // Username was remembered; retrieve runs without -u
    tmp.child(".hrmlink/prefs.json")
        .assert(predicate::str::contains("alice"));
    write_result(&tmp, "local", "SampleA");

    hrml(tmp.path())
        .args(["retrieve", "--root", "share"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1/1 retrieved, 0/1 failed"));

    tmp.child(format!("data/SampleA_Deconvolved{CODE}/SampleA_{CODE}_hrm.ids"))
        .assert(predicate::path::is_file());
    tmp.child("project.json")
        .assert(predicate::str::contains("\"SNR\": \"12.3\""));
}

#[test]
fn discover_lists_pending_results_and_unsupported_tags()
{
    let tmp = fixture();
    write_result(&tmp, "local", "SampleA");
    write_result(&tmp, "dropbox", "Other");

    hrml(tmp.path())
        .args(["discover", "--root", "share", "-u", "alice"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("SampleA")
                .and(predicate::str::contains(CODE))
                .and(predicate::str::contains("dropbox (unsupported)"))
                .and(predicate::str::contains("2 pending result(s)")),
        );
}

#[test]
fn send_unknown_name_is_rejected()
{
    let tmp = fixture();

    hrml(tmp.path())
        .args(["send", "Nope.tif", "--root", "share", "-u", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not in the project: Nope.tif"));
}

#[test]
fn missing_user_folder_aborts_without_creating_it()
{
    let tmp = fixture();

    hrml(tmp.path())
        .args(["send", "--all", "--root", "share", "-u", "bob"])
        .assert()
        .failure();
    tmp.child("share/bob")
        .assert(predicate::path::missing());
}

#[test]
fn completions_to_stdout()
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    hrml(tmp.path())
        .args(["completions", "bash", "--stdout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hrml"));
}

#[test]
fn completions_written_to_out_dir()
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");

    hrml(tmp.path())
        .args(["completions", "zsh", "--out-dir", "comp"])
        .assert()
        .success()
        .stderr(predicate::str::contains("_hrml"));
    tmp.child("comp/_hrml")
        .assert(predicate::str::contains("retrieve"));
}

#[test]
fn init_records_share_root()
{
    let tmp = fixture();

    hrml(tmp.path())
        .args(["init", "--root", "share"])
        .assert()
        .success();
    tmp.child("hrmlink.toml")
        .assert(predicate::str::contains("root = \"share\""));

    // Root now comes from the config file
    hrml(tmp.path())
        .args(["send", "--all", "-u", "alice"])
        .assert()
        .success();
    tmp.child("share/alice/Raw/Local/SampleA.tif")
        .assert(predicate::path::is_file());
}
