#![allow(deprecated)] // TODO: move from cargo_bin to cargo_bin_cmd!

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("tierstack").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("synth"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("--base-cidr"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("tierstack").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tierstack"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("tierstack").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_validate_defaults_without_stack_file() {
    let project = TestProject::new();
    project
        .command()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stack is valid"))
        .stdout(predicate::str::contains("10.0.0.0/16"))
        .stdout(predicate::str::contains("sg-ec2 -> sg-rds"))
        .stdout(predicate::str::contains("sg-bastion -> sg-rds"))
        .stdout(predicate::str::contains("app-load-balancer -> 2 targets"));
}

#[test]
fn test_validate_reads_stack_file() {
    let project = TestProject::new();
    project.write_stack_kdl(
        r#"
        stack "shop" { region "eu-west-1" }
        network "shop-vpc" { cidr "10.20.0.0/16" az-count 3 }
        compute { fleet-size 3 }
        database { fleet-size 3 }
        "#,
    );

    project
        .command()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stack: shop"))
        .stdout(predicate::str::contains("shop-vpc (10.20.0.0/16, 3 AZs)"))
        .stdout(predicate::str::contains("rds-instance-2"))
        .stdout(predicate::str::contains("eu-west-1c"));
}

#[test]
fn test_flags_and_env_override_stack_file() {
    let project = TestProject::new();
    project.write_stack_kdl(r#"network { cidr "10.20.0.0/16" }"#);

    project
        .command()
        .env("TIERSTACK_BASE_CIDR", "172.16.0.0/16")
        .args(["validate", "--compute-fleet-size", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("172.16.0.0/16"))
        .stdout(predicate::str::contains("Compute: 1 x"));
}

#[test]
fn test_strict_placement_over_capacity_fails() {
    let project = TestProject::new();
    project.write_stack_kdl(r#"compute { placement "strict" }"#);

    project
        .command()
        .args(["validate", "--compute-fleet-size", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CapacityError"));
}

#[test]
fn test_zero_databases_is_unresolved() {
    let project = TestProject::new();
    project
        .command()
        .args(["validate", "--db-fleet-size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("UnresolvedReferenceError"));
}

#[test]
fn test_unknown_stack_node_fails() {
    let project = TestProject::new();
    project.write_stack_kdl(r#"autoscaling { min 1 }"#);

    project
        .command()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ConfigError"))
        .stderr(predicate::str::contains("autoscaling"));
}

#[test]
fn test_invalid_base_cidr_fails() {
    let project = TestProject::new();
    project
        .command()
        .args(["validate", "--base-cidr", "10.0.0.1/16"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ConfigError"));
}

#[test]
fn test_synth_prints_resource_graph() {
    let project = TestProject::new();
    let output = project.command().arg("synth").output().unwrap();
    assert!(output.status.success());

    let graph: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let resources = graph["resources"].as_object().unwrap();
    assert!(resources.contains_key("app-load-balancer"));
    assert!(resources.contains_key("ec2-role-default-policy"));
    assert_eq!(resources["rds-instance-0"]["type"], "AWS::RDS::DBInstance");
}

#[test]
fn test_synth_to_file() {
    let project = TestProject::new();
    let target = project.path().join("graph.json");

    project
        .command()
        .args(["synth", "--output"])
        .arg(&target)
        .assert()
        .success()
        .stdout(predicate::str::contains("resources written to"));

    let content = std::fs::read_to_string(target).unwrap();
    assert!(content.contains("my-vpc-private-subnet-rds-subnet-1"));
}

#[test]
fn test_graph_shows_stages() {
    let project = TestProject::new();
    project
        .command()
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. Network"))
        .stdout(predicate::str::contains("Bastion, ComputeFleet, DatabaseCluster"))
        .stdout(predicate::str::contains("level 0"));
}

#[test]
fn test_apply_requires_confirmation() {
    let project = TestProject::new();
    project
        .command()
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));

    assert!(!project.state_path().exists());
}

#[test]
fn test_apply_plan_destroy_lifecycle() {
    let project = TestProject::new();

    project
        .command()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 unchanged"));

    project
        .command()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("resources created"));

    let state = project.state();
    let resources = state["resources"].as_object().unwrap();
    assert!(resources.contains_key("rds-instance-1"));
    assert!(
        resources["ec2-instance-0"]["physical_id"]
            .as_str()
            .unwrap()
            .starts_with("i-")
    );

    project
        .command()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 to create"));

    project
        .command()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"));

    project
        .command()
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("resources deleted"));

    let state = project.state();
    assert!(state["resources"].as_object().unwrap().is_empty());
    assert!(!project.path().join(".tierstack/lock.json").exists());
}

#[test]
fn test_apply_after_fleet_change_updates_target_group() {
    let project = TestProject::new();
    project.command().args(["apply", "--yes"]).assert().success();

    project
        .command()
        .args(["plan", "--compute-fleet-size", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 to create"))
        .stdout(predicate::str::contains("~ application-fleet"));

    project
        .command()
        .args(["apply", "--yes", "--compute-fleet-size", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 resources created"));

    let state = project.state();
    assert!(state["resources"]["ec2-instance-2"]["physical_id"].is_string());

    project
        .command()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 deleted"));
    let state = project.state();
    assert!(state["resources"].get("ec2-instance-2").is_none());
}

#[test]
fn test_destroy_keeps_retained_databases() {
    let project = TestProject::new();
    project.write_stack_kdl(r#"database { removal-policy "retain" }"#);

    project.command().args(["apply", "--yes"]).assert().success();
    project
        .command()
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Retained:"))
        .stdout(predicate::str::contains("rds-instance-0"));

    let state = project.state();
    let resources = state["resources"].as_object().unwrap();
    assert_eq!(resources["rds-instance-0"]["status"], "retained");
    assert!(!resources.contains_key("app-load-balancer"));
}

#[test]
fn test_destroy_without_state() {
    let project = TestProject::new();
    project
        .command()
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to destroy"));
}
