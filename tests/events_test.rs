//! Server-sent event stream tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{line, succeed, Step, TestHarness};
use http_body_util::BodyExt;
use mp3ify_common::JobState;
use tokio::sync::Notify;
use tower::ServiceExt;

async fn body_to_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn finished_job_stream_has_only_final_status() {
    let harness = TestHarness::new();
    let id = harness.engine.create_job("done").unwrap();
    harness.wait_for_state(id, JobState::Successful).await;

    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/api/jobs/{id}/events"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let body = body_to_string(response.into_body()).await;
    assert!(body.contains("event: status\ndata: SUCCESSFUL\n"), "{body}");
    assert!(!body.contains("outputLine"), "{body}");
}

#[tokio::test]
async fn live_stream_carries_output_and_ends_with_job() {
    let (harness, addr) = TestHarness::with_server().await;
    let gate = Arc::new(Notify::new());
    harness.runner.script(
        "live",
        vec![
            Step::Wait(gate.clone()),
            line("[download]   5.0%"),
            Step::CarriageReturn,
            line("[download] 100.0%"),
            succeed("Live Song"),
        ],
    );

    let id = harness.engine.create_job("live").unwrap();
    let request = tokio::spawn(async move {
        let resp = reqwest::get(format!("http://{addr}/api/jobs/{id}/events"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.text().await.unwrap()
    });

    // Release the converter only once the client is listening
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.hub.subscriber_count(id) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "client never subscribed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    gate.notify_one();

    let body = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("event stream did not end")
        .unwrap();

    let download = body.find("data: [download]   5.0%").expect(&body);
    let redraw = body.find("event: carriageReturn").expect(&body);
    let done = body.find("data: [download] 100.0%").expect(&body);
    let status = body.find("data: SUCCESSFUL").expect(&body);
    assert!(download < redraw && redraw < done && done < status, "{body}");
    assert!(body.contains("event: outputLine"), "{body}");
}

#[tokio::test]
async fn deleted_job_stream_ends_with_failure() {
    let (harness, addr) = TestHarness::with_server().await;
    harness.runner.script("long", vec![line("downloading"), Step::Hang]);

    let id = harness.engine.create_job("long").unwrap();
    let request = tokio::spawn(async move {
        reqwest::get(format!("http://{addr}/api/jobs/{id}/events"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.hub.subscriber_count(id) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "client never subscribed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    harness.engine.delete_job(id).await.unwrap();

    let body = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("event stream did not end")
        .unwrap();
    assert!(body.trim_end().ends_with("data: FAILED"), "{body}");
}
