mod common;

use chrono::{DateTime, FixedOffset};
use common::TestApp;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{header_exists, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// 2030-01-07 is a Monday; 2030-01-05 a Saturday.
const MONDAY: &str = "2030-01-07";
const SATURDAY: &str = "2030-01-05";

const BUSY_CALENDAR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<multistatus xmlns="DAV:">
  <response>
    <href>/calendars/home/lunch.ics</href>
    <propstat>
      <prop>
        <calendar-data xmlns="urn:ietf:params:xml:ns:caldav"><![CDATA[BEGIN:VCALENDAR
BEGIN:VEVENT
UID:lunch
DTSTART:20300107T130000Z
DTEND:20300107T140000Z
END:VEVENT
END:VCALENDAR]]></calendar-data>
      </prop>
    </propstat>
  </response>
</multistatus>"#;

async fn availability(app: &TestApp, date: &str, session: Option<&str>) -> (u16, Value) {
    let mut request = app
        .client
        .get(app.url(&format!("/availability?date={}", date)));
    if let Some(session) = session {
        request = request.header("X-Calendar-Session", session);
    }
    let response = request.send().await.expect("Failed to execute request");
    let status = response.status().as_u16();
    (status, response.json().await.expect("Failed to parse JSON"))
}

fn instant(value: &Value) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(value.as_str().expect("timestamp string"))
        .expect("RFC 3339 timestamp")
}

fn availability_flags(body: &Value) -> Vec<bool> {
    body["slots"]
        .as_array()
        .expect("slots array")
        .iter()
        .map(|slot| slot["available"].as_bool().expect("available flag"))
        .collect()
}

async fn connect_calendar(app: &TestApp, server: &MockServer) -> String {
    let response = app
        .as_admin(Method::POST, "/calendar/sessions")
        .json(&json!({
            "apple_id": "owner@example.com",
            "app_password": "abcd-efgh-ijkl-mnop",
            "calendar_url": format!("{}/calendars/home", server.uri())
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.expect("Failed to parse JSON");
    body["session_id"].as_str().expect("session id").to_string()
}

#[tokio::test]
async fn weekday_is_tiled_into_half_hour_slots() {
    let app = TestApp::spawn().await;

    let (status, body) = availability(&app, MONDAY, None).await;

    assert_eq!(status, 200);
    assert_eq!(body["date"], MONDAY);
    assert_eq!(body["openMinutes"], 540);
    assert_eq!(body["closeMinutes"], 1020);

    let flags = availability_flags(&body);
    assert_eq!(flags.len(), 16);
    assert!(flags.iter().all(|available| *available));
    assert_eq!(
        instant(&body["slots"][0]["start"]),
        DateTime::parse_from_rfc3339("2030-01-07T09:00:00+00:00").unwrap()
    );
    assert_eq!(
        instant(&body["slots"][15]["end"]),
        DateTime::parse_from_rfc3339("2030-01-07T17:00:00Z").unwrap()
    );
}

#[tokio::test]
async fn closed_day_has_no_slots() {
    let app = TestApp::spawn().await;

    let (status, body) = availability(&app, SATURDAY, None).await;

    assert_eq!(status, 200);
    assert_eq!(body["slots"], json!([]));
    assert!(body["openMinutes"].is_null());
    assert!(body["closeMinutes"].is_null());
}

#[tokio::test]
async fn invalid_date_is_rejected() {
    let app = TestApp::spawn().await;

    let (status, body) = availability(&app, "2030-13-45", None).await;

    assert_eq!(status, 422);
    assert_eq!(body["error"], "Validation error");
}

#[tokio::test]
async fn scheduled_meeting_blocks_its_slot() {
    let app = TestApp::spawn().await;

    let response = app
        .as_client("c1", Method::POST, "/meetings")
        .json(&json!({
            "title": "Consultation",
            "start": "2030-01-07T10:00:00Z",
            "end": "2030-01-07T10:30:00Z"
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);

    let (_, body) = availability(&app, MONDAY, None).await;
    let flags = availability_flags(&body);

    assert!(!flags[2], "10:00-10:30 should be taken");
    assert!(flags[3], "10:30-11:00 should be free");
    assert_eq!(flags.iter().filter(|available| !**available).count(), 1);
}

#[tokio::test]
async fn external_calendar_busy_time_blocks_slots() {
    let app = TestApp::spawn().await;
    let server = MockServer::start().await;
    Mock::given(path("/calendars/home"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(207).set_body_string(BUSY_CALENDAR))
        .expect(1)
        .mount(&server)
        .await;

    let session = connect_calendar(&app, &server).await;
    let (status, body) = availability(&app, MONDAY, Some(&session)).await;

    assert_eq!(status, 200);
    let flags = availability_flags(&body);
    assert!(flags[7], "12:30-13:00 should be free");
    assert!(!flags[8], "13:00-13:30 should be busy");
    assert!(!flags[9], "13:30-14:00 should be busy");
    assert!(flags[10], "14:00-14:30 should be free");
}

#[tokio::test]
async fn failing_calendar_degrades_to_internal_bookings() {
    let app = TestApp::spawn().await;
    let server = MockServer::start().await;
    Mock::given(path("/calendars/home"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let session = connect_calendar(&app, &server).await;
    let (status, body) = availability(&app, MONDAY, Some(&session)).await;

    assert_eq!(status, 200);
    let flags = availability_flags(&body);
    assert_eq!(flags.len(), 16);
    assert!(flags.iter().all(|available| *available));
}

#[tokio::test]
async fn slow_calendar_times_out_without_failing_the_request() {
    let app = TestApp::spawn().await;
    let server = MockServer::start().await;
    Mock::given(path("/calendars/home"))
        .respond_with(
            ResponseTemplate::new(207)
                .set_body_string(BUSY_CALENDAR)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let session = connect_calendar(&app, &server).await;
    let (status, body) = availability(&app, MONDAY, Some(&session)).await;

    assert_eq!(status, 200);
    assert!(availability_flags(&body).iter().all(|available| *available));
}

#[tokio::test]
async fn ended_session_is_ignored() {
    let app = TestApp::spawn().await;
    let server = MockServer::start().await;
    Mock::given(path("/calendars/home"))
        .respond_with(ResponseTemplate::new(207).set_body_string(BUSY_CALENDAR))
        .expect(0)
        .mount(&server)
        .await;

    let session = connect_calendar(&app, &server).await;
    let response = app
        .as_admin(Method::DELETE, &format!("/calendar/sessions/{}", session))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 204);

    let (status, body) = availability(&app, MONDAY, Some(&session)).await;
    assert_eq!(status, 200);
    assert!(availability_flags(&body).iter().all(|available| *available));
}

#[tokio::test]
async fn business_hours_can_be_replaced_by_admin() {
    let app = TestApp::spawn().await;

    let response = app
        .as_admin(Method::PUT, "/settings/business-hours")
        .json(&json!({ "hours": { "Monday": "10:00-12:00", "tuesday": "nine to five" } }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 200);

    let (_, monday) = availability(&app, MONDAY, None).await;
    assert_eq!(monday["openMinutes"], 600);
    assert_eq!(availability_flags(&monday).len(), 4);

    // Malformed hours are stored but produce no slots.
    let (status, tuesday) = availability(&app, "2030-01-08", None).await;
    assert_eq!(status, 200);
    assert_eq!(tuesday["slots"], json!([]));
    assert!(tuesday["openMinutes"].is_null());

    let response = app
        .client
        .get(app.url("/settings/business-hours"))
        .send()
        .await
        .expect("Failed to execute request");
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["hours"]["monday"], "10:00-12:00");
    assert!(body["updated_at"].is_string());
}

#[tokio::test]
async fn business_hours_reject_unknown_days_and_clients() {
    let app = TestApp::spawn().await;

    let response = app
        .as_admin(Method::PUT, "/settings/business-hours")
        .json(&json!({ "hours": { "funday": "9am-5pm" } }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 422);

    let response = app
        .as_client("c1", Method::PUT, "/settings/business-hours")
        .json(&json!({ "hours": { "monday": "9am-5pm" } }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 403);
}
