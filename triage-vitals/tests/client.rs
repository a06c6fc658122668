use std::sync::Arc;

use chrono::{TimeZone, Utc};
use triage_core::http::{StubResponse, StubTransport};
use triage_core::{DataSource, FixedClock, PriorityLevel, SourceError, TransportError, VitalsConfig};
use triage_vitals::VitalsClient;

fn client(transport: StubTransport) -> (VitalsClient<StubTransport>, Arc<StubTransport>) {
    let transport = Arc::new(transport);
    let clock = FixedClock(Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap());
    let client = VitalsClient::new(VitalsConfig::default(), transport.clone())
        .unwrap()
        .with_clock(Arc::new(clock));
    (client, transport)
}

fn body(text: &str) -> StubResponse {
    StubResponse::Body(text.to_string())
}

#[tokio::test]
async fn fetches_every_listed_patient() {
    let (client, transport) = client(
        StubTransport::new()
            .on_get("/LIST?CNT=2", body("A1;B2;"))
            .on_get(
                "ICN=A1",
                body("A1^1|Hemoglobin|7.1|2024-01-01|X^2|Potassium|4.4|2024-01-01|X"),
            )
            .on_get(
                "ICN=B2",
                body("B2^1|Hemoglobin|12.9|2024-01-01|X^2|Potassium|4.1|2024-01-01|X"),
            ),
    );

    let records = client.fetch_all(2).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id(), "vitals-A1");
    assert_eq!(records[0].priority(), PriorityLevel::Urgent);
    assert_eq!(records[1].priority(), PriorityLevel::Success);
    assert!(records.iter().all(|r| r.source() == DataSource::LegacyVitals));
    assert_eq!(transport.count_matching("/VITALS?ICN="), 2);
    assert_eq!(
        transport.calls()[0].url,
        "http://localhost:8001/LIST?CNT=2"
    );
}

#[tokio::test]
async fn one_failed_patient_fails_the_batch() {
    let (client, _) = client(
        StubTransport::new()
            .on_get("/LIST", body("A1;B2"))
            .on_get("ICN=A1", body("A1^1|Hemoglobin|12|2024-01-01|X"))
            .on_get("ICN=B2", StubResponse::Status(500)),
    );

    let err = client.fetch_all(2).await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::Transport(TransportError::Status { status: 500, .. })
    ));
}

#[tokio::test]
async fn list_failure_aborts_before_vitals() {
    let (client, transport) = client(StubTransport::new().on_get("/LIST", StubResponse::Timeout));

    let err = client.fetch_all(5).await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::Transport(TransportError::Timeout { .. })
    ));
    assert_eq!(transport.count_matching("/VITALS"), 0);
}

#[tokio::test]
async fn empty_list_yields_no_records() {
    let (client, _) = client(StubTransport::new().on_get("/LIST", body("")));
    assert!(client.fetch_all(3).await.unwrap().is_empty());
}
