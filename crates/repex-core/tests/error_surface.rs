use repex_core::errors::{ErrorInfo, RepexError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("replica", 3)
        .with_context("reason", "example")
}

#[test]
fn configuration_error_surface() {
    let err = RepexError::Configuration(sample_info("incompatible-states", "atom counts differ"));
    assert_eq!(err.info().code, "incompatible-states");
    assert_eq!(err.family(), "configuration");
    assert_eq!(err.info().context.get("replica").map(String::as_str), Some("3"));
}

#[test]
fn resume_error_surface() {
    let err = RepexError::resume("missing-static", "no static payload");
    assert_eq!(err.info().code, "missing-static");
    assert_eq!(err.family(), "resume");
}

#[test]
fn persistence_error_carries_added_context() {
    let err = RepexError::persistence("record-out-of-order", "gap").with_context("iteration", 7);
    assert_eq!(err.info().context.get("iteration").map(String::as_str), Some("7"));
    assert_eq!(err.family(), "persistence");
}

#[test]
fn display_includes_code_context_and_hint() {
    let err = RepexError::Physics(
        sample_info("non-finite-energy", "energy blew up").with_hint("reduce the timestep"),
    );
    let rendered = err.to_string();
    assert!(rendered.starts_with("physics evaluation error: energy blew up"));
    assert!(rendered.contains("code: non-finite-energy"));
    assert!(rendered.contains("replica=3"));
    assert!(rendered.contains("hint: reduce the timestep"));
}

#[test]
fn errors_round_trip_through_json() {
    let err = RepexError::communication("worker-failed", "rank 2 aborted").with_context("rank", 2);
    let json = serde_json::to_string(&err).unwrap();
    assert!(json.contains("\"family\":\"Communication\""));
    let back: RepexError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
}

#[test]
fn families_cover_every_variant() {
    let errors = [
        RepexError::configuration("c", "c"),
        RepexError::resume("r", "r"),
        RepexError::persistence("p", "p"),
        RepexError::physics("f", "f"),
        RepexError::communication("m", "m"),
        RepexError::Serde(ErrorInfo::new("s", "s")),
    ];
    let families: Vec<_> = errors
        .iter()
        .map(|err| match err {
            RepexError::Configuration(_)
            | RepexError::Resume(_)
            | RepexError::Persistence(_)
            | RepexError::Physics(_)
            | RepexError::Communication(_)
            | RepexError::Serde(_) => err.family(),
        })
        .collect();
    assert_eq!(
        families,
        ["configuration", "resume", "persistence", "physics", "communication", "serde"]
    );
}
