#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use idpool::{
    engine::{Backend, BackendOptions},
    numeric::NumericKind,
    storage::{StateStores, Storage},
    types::{
        Claim, ClaimKind, ClaimSpec, Entry, EntryValue, IdSpace, IpIndex, IpIndexPrefix, NsName,
        NumericIndex, PrefixType,
    },
};
use serde_json::Value;
use tempfile::TempDir;

/// State directory with one vlan pool and one allocated claim, plus a config
/// file so the user's own config never leaks into the run.
fn setup_state() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let state = dir.path().join("state");
    let config = dir.path().join("config.toml");
    fs::write(&config, "log_filter = \"idpool=warn\"\n").expect("write config");

    let stores = StateStores::open(&state).expect("open stores");
    let backend = Backend::<NumericKind>::open(BackendOptions::new(
        stores.entries.clone(),
        stores.claims.clone(),
    ));
    let mut pool = NumericIndex::new("default", "vlan", IdSpace::Vlan, Some(10), Some(20));
    stores.numeric_indexes.apply(pool.clone(), "test").unwrap();
    backend.create_index(&mut pool).expect("create pool");
    let mut claim = Claim::new(
        "default",
        "web",
        ClaimSpec::new("vlan", ClaimKind::DynamicId),
    );
    stores.claims.apply(claim.clone(), "test").unwrap();
    backend.claim(&mut claim).expect("claim");
    (dir, state, config)
}

fn seed_unplaceable_address(state: &Path) {
    let stores = StateStores::open(state).expect("open stores");
    let pool = IpIndex::new(
        "default",
        "lab",
        vec![IpIndexPrefix::new(
            "10.0.0.0/24".parse().unwrap(),
            PrefixType::Network,
        )],
    );
    stores.ip_indexes.apply(pool, "test").unwrap();
    let bad = Claim::new(
        "default",
        "bad",
        ClaimSpec::new("lab", ClaimKind::StaticAddress).address("10.9.0.5".parse().unwrap()),
    );
    stores.claims.apply(bad.clone(), "test").unwrap();
    let entry = Entry::from_allocation(
        &NsName::new("default", "lab"),
        None,
        EntryValue::Prefix("10.9.0.5/32".parse().unwrap()),
        &bad.allocation_labels(),
    )
    .unwrap();
    stores.entries.apply(entry, "test").unwrap();
}

#[test]
fn verify_full_succeeds_on_converged_state() {
    let (_dir, state, config) = setup_state();
    let output = cargo_bin_cmd!("idpool")
        .arg("--config")
        .arg(&config)
        .arg("--state-dir")
        .arg(&state)
        .args(["--format", "json", "verify", "--level", "full"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["success"].as_bool(), Some(true));
    assert_eq!(json["level"], "full");
    assert_eq!(json["counts"]["pools_found"].as_u64(), Some(1));
    assert_eq!(json["counts"]["claims_replayed"].as_u64(), Some(3));
    assert_eq!(json["findings"].as_array().map(Vec::len), Some(0));
}

#[test]
fn verify_exits_with_two_when_a_pool_cannot_restore() {
    let (_dir, state, config) = setup_state();
    seed_unplaceable_address(&state);
    let output = cargo_bin_cmd!("idpool")
        .arg("--config")
        .arg(&config)
        .arg("--state-dir")
        .arg(&state)
        .args(["--format", "json", "verify"])
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["success"].as_bool(), Some(false));
    assert_eq!(json["counts"]["pools_failed"].as_u64(), Some(1));
    let findings = json["findings"].as_array().expect("findings");
    assert!(findings.iter().any(|finding| {
        finding["severity"] == "error"
            && finding["message"]
                .as_str()
                .is_some_and(|msg| msg.contains("default/lab"))
    }));
}

#[test]
fn fast_verify_skips_the_rebuild() {
    let (_dir, state, config) = setup_state();
    seed_unplaceable_address(&state);
    let output = cargo_bin_cmd!("idpool")
        .arg("--config")
        .arg(&config)
        .arg("--state-dir")
        .arg(&state)
        .args(["--format", "json", "verify", "--level", "fast"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["counts"]["pools_found"].as_u64(), Some(2));
    assert_eq!(json["counts"]["claims_replayed"].as_u64(), Some(0));
}

#[test]
fn entries_lists_one_pool() {
    let (_dir, state, config) = setup_state();
    seed_unplaceable_address(&state);
    let output = cargo_bin_cmd!("idpool")
        .arg("--config")
        .arg(&config)
        .arg("--state-dir")
        .arg(&state)
        .args(["--format", "json", "entries", "--pool", "default/vlan"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    let names: Vec<&str> = json
        .as_array()
        .expect("entry list")
        .iter()
        .filter_map(|entry| entry["meta"]["name"].as_str())
        .collect();
    assert_eq!(names.len(), 3, "{names:?}");
    assert!(names.contains(&"vlan.id.10"), "{names:?}");
}

#[test]
fn text_output_and_missing_state_dir() {
    let (dir, state, config) = setup_state();
    let output = cargo_bin_cmd!("idpool")
        .arg("--config")
        .arg(&config)
        .arg("--state-dir")
        .arg(&state)
        .arg("entries")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("default/vlan.id.10"), "{text}");
    assert!(text.contains("owner=web"), "{text}");

    cargo_bin_cmd!("idpool")
        .arg("--config")
        .arg(&config)
        .arg("--state-dir")
        .arg(dir.path().join("missing"))
        .arg("verify")
        .assert()
        .code(1);
}
