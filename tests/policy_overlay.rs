use anchor_engine::{
    init_tracing, load_policy_with_options, AnchorRegistry, CreateAnchorRequest, LoadOptions,
    Locator, LogFormat,
};

#[test]
fn file_policy_drives_registry_defaults() {
    init_tracing("debug", LogFormat::Text).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anchors.yaml");
    std::fs::write(
        &path,
        r#"tolerance:
  position: 4
  text: 1
matching:
  default_matching_threshold: 0.75
statistics:
  initial_stability: 0.9
audit:
  capacity: 8
  retain: 4
"#,
    )
    .unwrap();

    let policy = load_policy_with_options(&LoadOptions {
        paths: vec![path],
        include_env: false,
    })
    .unwrap();
    let registry = AnchorRegistry::with_policy(policy);

    let anchor = registry
        .create(CreateAnchorRequest::new(
            "app",
            "ok",
            "button",
            Locator::element_id("ok"),
        ))
        .unwrap();
    assert_eq!(anchor.tolerance.position, 4.0);
    assert_eq!(anchor.tolerance.text, 1);
    assert_eq!(anchor.tolerance.size, 0.1);
    assert_eq!(anchor.matching_threshold, 0.75);
    assert_eq!(anchor.stability_score, 0.9);

    for n in 0..8 {
        registry
            .create(CreateAnchorRequest::new(
                "app",
                format!("b{n}"),
                "button",
                Locator::element_id(format!("b{n}")),
            ))
            .unwrap();
    }
    // nine creations overflow a capacity of eight
    assert_eq!(registry.audit_events().len(), 4);
}
