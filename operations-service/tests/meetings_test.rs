mod common;

use common::TestApp;
use reqwest::Method;
use serde_json::{json, Value};

async fn book(app: &TestApp, client_id: &str, start: &str, end: &str) -> reqwest::Response {
    app.as_client(client_id, Method::POST, "/meetings")
        .json(&json!({ "title": "Site visit", "start": start, "end": end }))
        .send()
        .await
        .expect("Failed to execute request")
}

#[tokio::test]
async fn client_books_and_lists_own_meetings() {
    let app = TestApp::spawn().await;

    let response = book(&app, "c1", "2030-01-07T09:00:00Z", "2030-01-07T10:00:00Z").await;
    assert_eq!(response.status().as_u16(), 201);
    let meeting: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(meeting["client_id"], "c1");
    assert_eq!(meeting["status"], "scheduled");

    let response = book(&app, "c2", "2030-01-07T11:00:00Z", "2030-01-07T11:30:00Z").await;
    assert_eq!(response.status().as_u16(), 201);

    let own: Vec<Value> = app
        .as_client("c1", Method::GET, "/meetings")
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(own.len(), 1);
    assert_eq!(own[0]["client_id"], "c1");

    let all: Vec<Value> = app
        .as_admin(Method::GET, "/meetings")
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn overlapping_booking_is_a_conflict() {
    let app = TestApp::spawn().await;

    let first = book(&app, "c1", "2030-01-07T10:00:00Z", "2030-01-07T11:00:00Z").await;
    assert_eq!(first.status().as_u16(), 201);

    let overlapping = book(&app, "c2", "2030-01-07T10:30:00Z", "2030-01-07T11:30:00Z").await;
    assert_eq!(overlapping.status().as_u16(), 409);

    let adjacent = book(&app, "c2", "2030-01-07T11:00:00Z", "2030-01-07T11:30:00Z").await;
    assert_eq!(adjacent.status().as_u16(), 201);
}

#[tokio::test]
async fn bookings_outside_business_hours_are_rejected() {
    let app = TestApp::spawn().await;

    let early = book(&app, "c1", "2030-01-07T08:30:00Z", "2030-01-07T09:30:00Z").await;
    assert_eq!(early.status().as_u16(), 409);

    let weekend = book(&app, "c1", "2030-01-05T10:00:00Z", "2030-01-05T10:30:00Z").await;
    assert_eq!(weekend.status().as_u16(), 409);

    let inverted = book(&app, "c1", "2030-01-07T11:00:00Z", "2030-01-07T10:00:00Z").await;
    assert_eq!(inverted.status().as_u16(), 422);
}

#[tokio::test]
async fn cancelled_meeting_frees_its_time() {
    let app = TestApp::spawn().await;

    let response = book(&app, "c1", "2030-01-07T14:00:00Z", "2030-01-07T14:30:00Z").await;
    let meeting: Value = response.json().await.expect("Failed to parse JSON");
    let id = meeting["id"].as_str().expect("meeting id");

    let forbidden = app
        .as_client("c2", Method::POST, &format!("/meetings/{}/cancel", id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(forbidden.status().as_u16(), 403);

    let cancelled = app
        .as_client("c1", Method::POST, &format!("/meetings/{}/cancel", id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(cancelled.status().as_u16(), 200);
    let cancelled: Value = cancelled.json().await.expect("Failed to parse JSON");
    assert_eq!(cancelled["status"], "cancelled");

    let rebooked = book(&app, "c2", "2030-01-07T14:00:00Z", "2030-01-07T14:30:00Z").await;
    assert_eq!(rebooked.status().as_u16(), 201);
}

#[tokio::test]
async fn cancelling_unknown_meeting_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app
        .as_admin(Method::POST, "/meetings/does-not-exist/cancel")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn service_requests_are_scoped_to_their_client() {
    let app = TestApp::spawn().await;

    for (client, description) in [("c1", "Leaking tap"), ("c2", "Broken window")] {
        let response = app
            .as_client(client, Method::POST, "/service-requests")
            .json(&json!({ "description": description, "preferred_date": "2030-01-09" }))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 201);
    }

    let own: Vec<Value> = app
        .as_client("c1", Method::GET, "/service-requests")
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(own.len(), 1);
    assert_eq!(own[0]["description"], "Leaking tap");
    assert_eq!(own[0]["status"], "open");

    let filtered: Vec<Value> = app
        .as_admin(Method::GET, "/service-requests?client_id=c2")
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(filtered.len(), 1);

    let id = own[0]["id"].as_str().expect("request id");
    let denied = app
        .as_client("c1", Method::PATCH, &format!("/service-requests/{}", id))
        .json(&json!({ "status": "completed" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(denied.status().as_u16(), 403);

    let updated: Value = app
        .as_admin(Method::PATCH, &format!("/service-requests/{}", id))
        .json(&json!({ "status": "in_progress" }))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(updated["status"], "in_progress");
}

#[tokio::test]
async fn empty_service_request_description_fails_validation() {
    let app = TestApp::spawn().await;

    let response = app
        .as_client("c1", Method::POST, "/service-requests")
        .json(&json!({ "description": "" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 422);
}
