use kopack_lib::platform::{Platform, PlatformMatcher};

fn matches(specs: &[&str], candidate: &str) -> bool {
  let matcher = PlatformMatcher::parse(specs).unwrap();
  let candidate: Platform = candidate.parse().unwrap();
  matcher.matches(&candidate)
}

#[test]
fn matching_table() {
  let cases: &[(&[&str], &str, bool)] = &[
    (&["all"], "linux/amd64", true),
    (&["all"], "windows/arm64", true),
    (&["all"], "linux/unknown", true),
    (&["all"], "unknown/unknown", false),
    (&["linux/arm/v7"], "linux/arm/v7", true),
    (&["linux/arm/v7"], "linux/arm/v6", false),
    (&["linux/arm"], "linux/arm/v7", true),
    (&["linux"], "linux/s390x", true),
    (&["linux/amd64"], "darwin/amd64", false),
    (&["windows/amd64:10.0.17763"], "windows/amd64:10.0.17763.1234", true),
    (&["windows/amd64:10.0.17763.1234"], "windows/amd64:10.0.17763", false),
    (&["windows/amd64:10.0.17763"], "windows/amd64:10.0.177630", false),
    (&["linux/amd64:1.0"], "linux/amd64:1.0.1", false),
    (&["linux/amd64", "linux/arm64"], "linux/arm64", true),
  ];
  for (specs, candidate, expected) in cases {
    assert_eq!(
      matches(specs, candidate),
      *expected,
      "{:?} against {}",
      specs,
      candidate
    );
  }
}

#[test]
fn all_cannot_be_combined() {
  assert!(PlatformMatcher::parse(&["all", "linux/amd64"]).is_err());
}

#[test]
fn malformed_specs_are_errors() {
  for spec in ["linux/amd64/v8/extra", "linux//v7", "linux/amd64:", "windows/amd64:10..0"] {
    assert!(spec.parse::<Platform>().is_err(), "{}", spec);
  }
}

#[test]
fn multi_platform_detection() {
  assert!(PlatformMatcher::parse(&["all"]).unwrap().is_multi());
  assert!(PlatformMatcher::parse(&["linux/amd64", "linux/arm64"]).unwrap().is_multi());
  assert!(!PlatformMatcher::parse(&["linux/amd64"]).unwrap().is_multi());
}
