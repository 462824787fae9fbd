// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use mpdispatch_config::{TopologyError, TopologyManifest};
use std::path::PathBuf;

fn topologies_dir() -> PathBuf {
    // crates/config -> workspace root
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("configs/topologies")
}

#[test]
fn test_shipped_topologies_validate() {
    let mut checked = 0;
    for entry in std::fs::read_dir(topologies_dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
            continue;
        }
        let manifest = TopologyManifest::from_file(&path)
            .unwrap_or_else(|e| panic!("{:?} failed to load: {:#}", path, e));
        assert!(manifest.controller_index().is_some());
        checked += 1;
    }
    assert!(checked >= 2, "expected shipped topologies, found {}", checked);
}

#[test]
fn test_hex_identities_parse() {
    let manifest = TopologyManifest::from_file(topologies_dir().join("arm-2x2.yaml")).unwrap();
    let ids: Vec<u64> = manifest.units.iter().map(|u| u.identity).collect();
    assert_eq!(ids, vec![0x0, 0x1, 0x100, 0x101]);
}

#[test]
fn test_unknown_controller_flag_type_rejected() {
    let yaml = r#"
name: "bad"
units:
  - identity: 0
    controller: "yes please"
"#;
    assert!(TopologyManifest::from_yaml(yaml).is_err());
}

#[test]
fn test_uniform_topology_is_valid() {
    for n in 1..=8 {
        let manifest = TopologyManifest::uniform("flat", n);
        assert_eq!(manifest.validate(), Ok(()));
        assert_eq!(manifest.units.len(), n);
    }
    assert_eq!(
        TopologyManifest::uniform("flat", 0).validate(),
        Err(TopologyError::Empty("flat".to_string()))
    );
}
