use std::fs;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::Value;
use triage_core::http::{StubResponse, StubTransport};
use triage_core::{Clock, EpicConfig, FixedClock};
use triage_fhir::auth::TOKEN_STORAGE_KEY;
use triage_fhir::{DemoExpansion, EpicClient, MemoryTokenStore, TokenStore};

fn fixture(name: &str) -> String {
    fs::read_to_string(format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR")))
        .expect("fixture is readable")
}

#[tokio::test]
async fn sandbox_patient_expands_to_golden_board() {
    let clock = FixedClock(Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap());
    let store = Arc::new(MemoryTokenStore::new());
    store
        .set(
            TOKEN_STORAGE_KEY,
            &format!(
                r#"{{"access_token":"sandbox","expires_in":3600,"received_at":{}}}"#,
                clock.now_millis()
            ),
        )
        .unwrap();

    let transport = Arc::new(
        StubTransport::new()
            .on_get("/Patient/", StubResponse::Body(fixture("epic_patient.json")))
            .on_get("/DiagnosticReport?", StubResponse::Body(fixture("epic_reports.json")))
            .on_get("/Observation?", StubResponse::Body(fixture("epic_observations.json"))),
    );
    let client = EpicClient::new(EpicConfig::default(), transport.clone(), store)
        .unwrap()
        .with_clock(Arc::new(clock))
        .with_expansion(Arc::new(DemoExpansion::without_jitter()));

    let records = client.fetch_patients(3).await.expect("board is built");

    let actual = serde_json::to_value(&records).expect("records serialize");
    let expected: Value =
        serde_json::from_str(&fixture("epic_board_snapshot.json")).expect("golden is valid");
    assert_eq!(actual, expected);

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.bearer.as_deref() == Some("sandbox")));
    assert!(calls[2].url.ends_with("Observation?patient=erXuFYUfucBZaryVksYEcMg3&category=laboratory"));
}
