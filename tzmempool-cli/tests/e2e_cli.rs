use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn write_config(&self, text: &str) -> PathBuf {
        let path = self.dir.path().join("tzmempool.toml");
        std::fs::write(&path, text).unwrap();
        path
    }

    fn tzmempool(&self) -> Command {
        let mut cmd = Command::cargo_bin("tzmempool").unwrap();
        cmd.current_dir(self.dir.path());
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("TZMEMPOOL_CONFIG");
        cmd
    }
}

const VALID: &str = r#"
[database]
path = "tz.db"

[settings]
expired_after_blocks = 120

[[networks]]
name = "ghostnet"
indexer_url = "${TZ_INDEXER}"
nodes = ["http://127.0.0.1:8732"]
kinds = ["transaction", "endorsement"]
accounts = ["tz1VSUr8wwNhLAzempoch5d6hLRiTh8Cjcjb"]
"#;

#[test]
fn test_help() {
    TestEnv::new()
        .tzmempool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check-config"))
        .stdout(predicate::str::contains("kinds"));
}

#[test]
fn test_kinds_lists_every_tag() {
    TestEnv::new()
        .tzmempool()
        .arg("kinds")
        .assert()
        .success()
        .stdout(predicate::str::contains("transaction"))
        .stdout(predicate::str::contains("seed_nonce_revelation"))
        .stdout(predicate::str::contains("vdf_revelation"));
}

#[test]
fn test_check_config_summary() {
    let env = TestEnv::new();
    let path = env.write_config(VALID);

    env.tzmempool()
        .env("TZ_INDEXER", "https://api.ghostnet.tzkt.io")
        .arg("check-config")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Network ghostnet"))
        .stdout(predicate::str::contains("https://api.ghostnet.tzkt.io/v1/ws"))
        .stdout(predicate::str::contains("120 blocks"))
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_check_config_default_path() {
    let env = TestEnv::new();
    env.write_config(VALID);

    env.tzmempool()
        .env("TZ_INDEXER", "https://api.ghostnet.tzkt.io")
        .arg("check-config")
        .assert()
        .success();
}

#[test]
fn test_check_config_missing_variable() {
    let env = TestEnv::new();
    let path = env.write_config(VALID);

    env.tzmempool()
        .env_remove("TZ_INDEXER")
        .arg("check-config")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("TZ_INDEXER"));
}

#[test]
fn test_check_config_unknown_kind() {
    let env = TestEnv::new();
    let path = env.write_config(&VALID.replace("\"endorsement\"", "\"transfer\""));

    env.tzmempool()
        .env("TZ_INDEXER", "https://api.ghostnet.tzkt.io")
        .arg("check-config")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("transfer"));
}

#[test]
fn test_check_config_missing_file() {
    let env = TestEnv::new();
    env.tzmempool()
        .arg("check-config")
        .arg("--config")
        .arg(env.dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn test_run_refuses_invalid_config() {
    let env = TestEnv::new();
    let path = env.write_config("[database]\nkind = \"postgres\"\n");

    env.tzmempool()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("postgres"));
    assert!(!env.dir.path().join("tz.db").exists());
}
