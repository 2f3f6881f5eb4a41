#[test]
fn app_version_is_stamped_from_package_version() {
    let version = env!("APP_VERSION");
    assert!(version.starts_with(env!("CARGO_PKG_VERSION")));
    if !version.contains("-nightly") {
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
    }
}
