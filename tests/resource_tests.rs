//! Lifecycle adapter tests: the four verbs, identity binding, and the
//! delete-then-create replacement on an identity-defining rename.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use windows_dsc::{DesiredState, Ensure, Error, ExternalIdentity, WindowsFeatureResource};

const HOST: &str = "winsrv01";

#[tokio::test]
async fn create_then_read_round_trip() {
    let factory = FakeFactory::new();
    // create: absent -> apply -> verify installed
    factory.script([
        not_installed("Web-Server"),
        apply_ok(),
        installed("Web-Server"),
        sub_features(&[]),
    ]);
    // read: installed
    factory.script([installed("Web-Server"), sub_features(&[])]);

    let resource = WindowsFeatureResource::new(factory);
    let conn = test_conn(HOST);
    let desired = DesiredState::new("Web-Server", Ensure::Present);

    let (identity, result) = resource.create(&conn, &desired).await.unwrap();
    assert_eq!(identity.to_string(), "Web-Server@winsrv01");
    assert!(result.changed);

    let state = resource.read(&conn, &identity).await.unwrap().unwrap();
    assert!(state.installed);
    assert_eq!(state.name, "Web-Server");
}

#[tokio::test]
async fn delete_then_read_reports_absent() {
    let factory = FakeFactory::new();
    // delete: installed -> apply removal -> verify absent
    factory.script([
        installed("Web-Server"),
        sub_features(&[]),
        apply_ok(),
        not_installed("Web-Server"),
    ]);
    // read: known but not installed
    factory.script([not_installed("Web-Server")]);

    let resource = WindowsFeatureResource::new(factory);
    let conn = test_conn(HOST);
    let identity = ExternalIdentity::derive("Web-Server", HOST);

    let result = resource.delete(&conn, &identity).await.unwrap();
    assert!(result.changed);

    let state = resource.read(&conn, &identity).await.unwrap().unwrap();
    assert!(!state.installed);
}

#[tokio::test]
async fn delete_tolerates_pre_absence() {
    let factory = FakeFactory::new();
    factory.script([not_installed("Web-Server")]);

    let resource = WindowsFeatureResource::new(factory);
    let identity = ExternalIdentity::derive("Web-Server", HOST);
    let result = resource.delete(&test_conn(HOST), &identity).await.unwrap();

    assert!(!result.changed);
    assert!(resource.factory().apply_commands().is_empty());
}

#[tokio::test]
async fn read_of_vanished_feature_returns_none() {
    let factory = FakeFactory::new();
    factory.script([feature_not_found("Web-Server")]);

    let resource = WindowsFeatureResource::new(factory);
    let identity = ExternalIdentity::derive("Web-Server", HOST);
    let state = resource.read(&test_conn(HOST), &identity).await.unwrap();

    assert!(state.is_none());
}

#[tokio::test]
async fn create_of_unknown_feature_produces_no_identity() {
    let factory = FakeFactory::new();
    factory.script([feature_not_found("UnknownFeatureXYZ")]);

    let resource = WindowsFeatureResource::new(factory);
    let desired = DesiredState::new("UnknownFeatureXYZ", Ensure::Present);
    let err = resource
        .create(&test_conn(HOST), &desired)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FeatureNotFound { .. }));
}

#[tokio::test]
async fn update_with_renamed_feature_deletes_old_then_creates_new() {
    let factory = FakeFactory::new();
    // delete of the old feature
    factory.script([
        installed("Old-Feature"),
        sub_features(&[]),
        apply_ok(),
        not_installed("Old-Feature"),
    ]);
    // create of the new feature
    factory.script([
        not_installed("New-Feature"),
        apply_ok(),
        installed("New-Feature"),
        sub_features(&[]),
    ]);

    let resource = WindowsFeatureResource::new(factory);
    let conn = test_conn(HOST);
    let old_identity = ExternalIdentity::derive("Old-Feature", HOST);
    let desired = DesiredState::new("New-Feature", Ensure::Present);

    let (new_identity, result) = resource.update(&conn, &old_identity, &desired).await.unwrap();

    assert_eq!(new_identity.to_string(), "New-Feature@winsrv01");
    assert!(result.changed);

    // Exactly two applies: removal of the old identity first, then the
    // creation of the new one. Never an in-place rename.
    let applies = resource.factory().apply_commands();
    assert_eq!(applies.len(), 2);
    assert!(applies[0].contains("RemoveFeature"));
    assert!(applies[0].contains("Old-Feature"));
    assert!(applies[1].contains("ConfigureFeature"));
    assert!(applies[1].contains("New-Feature"));
}

#[tokio::test]
async fn update_same_name_reapplies_under_same_identity() {
    let factory = FakeFactory::new();
    // Already converged: decision short-circuits, no apply.
    factory.script([installed("Web-Server"), sub_features(&[])]);

    let resource = WindowsFeatureResource::new(factory);
    let conn = test_conn(HOST);
    let identity = ExternalIdentity::derive("Web-Server", HOST);
    let desired = DesiredState::new("Web-Server", Ensure::Present);

    let (same_identity, result) = resource.update(&conn, &identity, &desired).await.unwrap();

    assert_eq!(same_identity, identity);
    assert!(!result.changed);
    assert!(resource.factory().apply_commands().is_empty());
}

#[tokio::test]
async fn identity_bound_to_other_host_is_rejected() {
    let factory = FakeFactory::new();
    let resource = WindowsFeatureResource::new(factory);
    let identity = ExternalIdentity::derive("Web-Server", "other-host");

    let err = resource
        .read(&test_conn(HOST), &identity)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Identity { .. }));
    // Nothing went over the wire.
    assert_eq!(resource.factory().open_count(), 0);
}

#[tokio::test]
async fn create_forces_presence() {
    let factory = FakeFactory::new();
    factory.script([
        not_installed("Web-Server"),
        apply_ok(),
        installed("Web-Server"),
        sub_features(&[]),
    ]);

    let resource = WindowsFeatureResource::new(factory);
    // Even a record declaring Absent converges to Present under create.
    let desired = DesiredState::new("Web-Server", Ensure::Absent);
    let (identity, result) = resource
        .create(&test_conn(HOST), &desired)
        .await
        .unwrap();

    assert!(result.state.installed);
    assert_eq!(identity.feature_name(), "Web-Server");
    let applies = resource.factory().apply_commands();
    assert_eq!(applies.len(), 1);
    assert!(applies[0].contains("Ensure = \\\"Present\\\""));
}
