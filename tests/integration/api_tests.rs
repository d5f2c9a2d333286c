//! API integration tests against a running server
//!
//! Start the server with the default configuration, then run with:
//! cargo test --test api_tests -- --ignored

use chrono::{Duration, Utc};
use lending_server::models::user::{Role, UserClaims};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

fn jwt_secret() -> String {
    std::env::var("JWT_SECRET").unwrap_or_else(|_| "change-this-secret-in-production".to_string())
}

/// Sign a token for an arbitrary user id; users live outside this service
fn token_for(user_id: i32, role: Role) -> String {
    let now = Utc::now();
    UserClaims {
        sub: format!("user-{}", user_id),
        user_id,
        role,
        exp: (now + Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
    }
    .create_token(&jwt_secret())
    .expect("Failed to sign token")
}

/// User ids unlikely to collide with earlier runs against the same database
fn fresh_user_ids() -> (i32, i32, i32) {
    let base = (Utc::now().timestamp_micros() % 100_000_000) as i32 * 3 + 1_000;
    (base, base + 1, base + 2)
}

async fn create_book(client: &Client, staff: &str, copies: i32) -> i64 {
    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(staff)
        .json(&json!({
            "title": "The Left Hand of Darkness",
            "author": "Ursula K. Le Guin",
            "total_copies": copies
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await.expect("Failed to parse response");
    body["data"]["id"].as_i64().expect("No book id")
}

async fn available_copies(client: &Client, book_id: i64) -> i64 {
    let body: Value = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    body["data"]["available_copies"].as_i64().expect("No available_copies")
}

async fn post_json(client: &Client, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let response = client
        .post(format!("{}{}", BASE_URL, path))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .expect("Failed to send request");
    let status = response.status();
    (status, response.json().await.expect("Failed to parse response"))
}

async fn put_json(client: &Client, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let response = client
        .put(format!("{}{}", BASE_URL, path))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .expect("Failed to send request");
    let status = response.status();
    (status, response.json().await.expect("Failed to parse response"))
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_missing_token_is_rejected() {
    let client = Client::new();

    let response = client
        .post(format!("{}/borrowings", BASE_URL))
        .json(&json!({ "book_id": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_malformed_borrow_request_lists_field_errors() {
    let client = Client::new();
    let (user, _, _) = fresh_user_ids();

    let (status, body) = post_json(&client, &token_for(user, Role::User), "/borrowings", json!({ "book_id": 0 })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"][0]["field"], "book_id");
}

#[tokio::test]
#[ignore]
async fn test_borrow_reserve_return_fulfill_scenario() {
    let client = Client::new();
    let (a, b, staff_id) = fresh_user_ids();
    let staff = token_for(staff_id, Role::Staff);
    let token_a = token_for(a, Role::User);
    let token_b = token_for(b, Role::User);

    let book_id = create_book(&client, &staff, 1).await;

    // A borrows the only copy
    let (status, body) = post_json(&client, &token_a, "/borrowings", json!({ "book_id": book_id })).await;
    assert_eq!(status, StatusCode::CREATED);
    let borrowing_id = body["data"]["id"].as_i64().expect("No borrowing id");
    assert_eq!(available_copies(&client, book_id).await, 0);

    // B finds nothing on the shelf
    let (status, body) = post_json(&client, &token_b, "/borrowings", json!({ "book_id": book_id })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NotAvailable");
    assert_eq!(available_copies(&client, book_id).await, 0);

    // B joins the queue first
    let (status, body) = post_json(&client, &token_b, "/reservations", json!({ "book_id": book_id })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["position"], 1);
    assert_eq!(body["data"]["status"], "pending");
    let reservation_id = body["data"]["id"].as_i64().expect("No reservation id");

    // A returns
    let (status, body) = put_json(&client, &staff, &format!("/borrowings/{}/return", borrowing_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "returned");
    assert_eq!(available_copies(&client, book_id).await, 1);

    // Staff fulfills B's reservation; no copy moves yet
    let (status, body) = put_json(&client, &staff, &format!("/reservations/{}/fulfill", reservation_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "fulfilled");
    assert!(body["data"]["priority"].is_null());
    assert_eq!(available_copies(&client, book_id).await, 1);

    // Staff lends the copy to B
    let (status, body) = post_json(&client, &staff, "/borrowings", json!({ "book_id": book_id, "user_id": b })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["user_id"], b);
    assert_eq!(available_copies(&client, book_id).await, 0);
}

#[tokio::test]
#[ignore]
async fn test_fulfill_and_borrow_is_one_step() {
    let client = Client::new();
    let (a, b, staff_id) = fresh_user_ids();
    let staff = token_for(staff_id, Role::Staff);

    let book_id = create_book(&client, &staff, 1).await;
    let (_, body) = post_json(&client, &token_for(a, Role::User), "/borrowings", json!({ "book_id": book_id })).await;
    let borrowing_id = body["data"]["id"].as_i64().expect("No borrowing id");

    let (_, body) = post_json(&client, &token_for(b, Role::User), "/reservations", json!({ "book_id": book_id })).await;
    let reservation_id = body["data"]["id"].as_i64().expect("No reservation id");

    // Nothing on the shelf yet
    let path = format!("/reservations/{}/fulfill-and-borrow", reservation_id);
    let (status, body) = post_json(&client, &staff, &path, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NotAvailable");

    put_json(&client, &staff, &format!("/borrowings/{}/return", borrowing_id), json!({})).await;

    let (status, body) = post_json(&client, &staff, &path, json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["reservation"]["status"], "fulfilled");
    assert_eq!(body["data"]["borrowing"]["user_id"], b);
    assert_eq!(available_copies(&client, book_id).await, 0);
}

#[tokio::test]
#[ignore]
async fn test_cancel_closes_the_gap_in_the_queue() {
    let client = Client::new();
    let (first, second, staff_id) = fresh_user_ids();
    let third = staff_id + 300_000_000;
    let staff = token_for(staff_id, Role::Staff);

    let book_id = create_book(&client, &staff, 1).await;

    let mut reservation_ids = Vec::new();
    for user in [first, second, third] {
        let (status, body) = post_json(&client, &token_for(user, Role::User), "/reservations", json!({ "book_id": book_id })).await;
        assert_eq!(status, StatusCode::CREATED);
        reservation_ids.push(body["data"]["id"].as_i64().expect("No reservation id"));
    }

    // Only the owner may cancel
    let cancel_second = format!("/reservations/{}/cancel", reservation_ids[1]);
    let (status, _) = put_json(&client, &token_for(first, Role::User), &cancel_second, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = put_json(&client, &token_for(second, Role::User), &cancel_second, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");

    // Cancelling twice is an invalid transition
    let (status, body) = put_json(&client, &token_for(second, Role::User), &cancel_second, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "InvalidState");

    let body: Value = client
        .get(format!("{}/reservations/book/{}", BASE_URL, book_id))
        .bearer_auth(&staff)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    let queue = body["data"].as_array().expect("No queue");
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0]["user_id"], first);
    assert_eq!(queue[0]["priority"], 1);
    assert_eq!(queue[1]["user_id"], third);
    assert_eq!(queue[1]["priority"], 2);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_borrow_and_reservation_are_refused() {
    let client = Client::new();
    let (user, _, staff_id) = fresh_user_ids();
    let staff = token_for(staff_id, Role::Staff);
    let token = token_for(user, Role::User);

    let book_id = create_book(&client, &staff, 2).await;

    let (status, _) = post_json(&client, &token, "/borrowings", json!({ "book_id": book_id })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = post_json(&client, &token, "/borrowings", json!({ "book_id": book_id })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Duplicate");

    // Holding the book blocks reserving it
    let (status, body) = post_json(&client, &token, "/reservations", json!({ "book_id": book_id })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "AlreadyBorrowed");
    assert_eq!(available_copies(&client, book_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn test_only_owner_renews() {
    let client = Client::new();
    let (owner, other, staff_id) = fresh_user_ids();
    let staff = token_for(staff_id, Role::Staff);

    let book_id = create_book(&client, &staff, 1).await;
    let (_, body) = post_json(&client, &token_for(owner, Role::User), "/borrowings", json!({ "book_id": book_id })).await;
    let borrowing_id = body["data"]["id"].as_i64().expect("No borrowing id");
    let path = format!("/borrowings/{}/renew", borrowing_id);

    let (status, _) = post_json(&client, &token_for(other, Role::User), &path, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = post_json(&client, &token_for(owner, Role::User), &path, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["renewal_count"], 1);
}

#[tokio::test]
#[ignore]
async fn test_returning_twice_is_an_invalid_transition() {
    let client = Client::new();
    let (user, _, staff_id) = fresh_user_ids();
    let staff = token_for(staff_id, Role::Staff);

    let book_id = create_book(&client, &staff, 1).await;
    let (_, body) = post_json(&client, &token_for(user, Role::User), "/borrowings", json!({ "book_id": book_id })).await;
    let path = format!("/borrowings/{}/return", body["data"]["id"].as_i64().expect("No borrowing id"));

    let (status, _) = put_json(&client, &token_for(user, Role::User), &path, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = put_json(&client, &staff, &path, json!({ "notes": "cover scuffed" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = put_json(&client, &staff, &path, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "InvalidState");
    assert_eq!(available_copies(&client, book_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_borrows_of_different_books_respect_the_cap() {
    let client = Client::new();
    let (user, _, staff_id) = fresh_user_ids();
    let staff = token_for(staff_id, Role::Staff);
    let token = token_for(user, Role::User);

    for _ in 0..4 {
        let book_id = create_book(&client, &staff, 1).await;
        let (status, _) = post_json(&client, &token, "/borrowings", json!({ "book_id": book_id })).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // one slot left under the default cap of five
    let mut books = Vec::new();
    for _ in 0..3 {
        books.push(create_book(&client, &staff, 1).await);
    }
    let (a, b, c) = tokio::join!(
        post_json(&client, &token, "/borrowings", json!({ "book_id": books[0] })),
        post_json(&client, &token, "/borrowings", json!({ "book_id": books[1] })),
        post_json(&client, &token, "/borrowings", json!({ "book_id": books[2] })),
    );
    let statuses = [a.0, b.0, c.0];
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CREATED).count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::UNPROCESSABLE_ENTITY).count(),
        2
    );

    let body: Value = client
        .get(format!("{}/borrowings/user/{}?status=active", BASE_URL, user))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(body["pagination"]["total"], 5);
}
