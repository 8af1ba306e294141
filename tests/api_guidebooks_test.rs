mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use serde_json::json;

async fn create(app: &TestApp, user: &str, name: &str) -> Result<String> {
    let response = app
        .send(authed("POST", "/api/generate", user, Some(sample_guidebook(name))))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    Ok(body["guidebook_id"].as_str().unwrap().to_string())
}

async fn upgrade(app: &TestApp, user: &str, plan: &str) -> Result<()> {
    let response = app.send(webhook_request(&checkout_completed(user, plan))?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_requires_bearer_token() -> Result<()> {
    let app = TestApp::new()?;

    let response = app.send(anonymous("GET", "/api/guidebooks")).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/guidebooks")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .body(Body::empty())?;
    let response = app.send(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await?;
    assert!(body["error"].is_string());

    let response = app.send(anonymous("GET", "/healthz")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_generate_on_free_plan_stays_preview() -> Result<()> {
    let app = TestApp::new()?;

    let response = app
        .send(authed("POST", "/api/generate", "host-1", Some(sample_guidebook("Sea Breeze"))))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id_header = response
        .headers()
        .get("x-guidebook-url")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = body_json(response).await?;
    let id = body["guidebook_id"].as_str().unwrap();
    assert_eq!(body["active"], json!(false));
    assert_eq!(id_header, Some(format!("/guidebook/{}", id)));

    // 未啟用的公開頁導向升級頁
    let response = app.send(anonymous("GET", &format!("/guidebook/{}", id))).await?;
    assert!(response.status().is_redirection());
    let location = response.headers()[header::LOCATION].to_str()?;
    assert_eq!(
        location,
        format!("https://app.guidewise.test/upgrade?guidebook_id={}", id)
    );

    let response = app.send(anonymous("GET", &format!("/preview/{}", id))).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(response).await?)?;
    assert!(html.contains("Sea Breeze"));
    assert!(html.contains("class=\"banner\""));

    let response = app
        .send(authed("POST", &format!("/api/guidebooks/{}/activate", id), "host-1", None))
        .await?;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    Ok(())
}

#[tokio::test]
async fn test_crud_and_ownership() -> Result<()> {
    let app = TestApp::new()?;
    let id = create(&app, "host-1", "Mountain Cabin").await?;

    let response = app.send(authed("GET", "/api/guidebooks", "host-1", None)).await?;
    let body = body_json(response).await?;
    assert_eq!(body["guidebooks"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["plan"], json!("free"));
    assert_eq!(body["guidebook_limit"], json!(0));

    let response = app
        .send(authed("GET", &format!("/api/guidebooks/{}", id), "host-1", None))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await?;
    assert_eq!(record["property"]["name"], json!("Mountain Cabin"));
    assert_eq!(record["rules"].as_array().map(Vec::len), Some(2));

    // 其他使用者看不到
    let response = app
        .send(authed("GET", &format!("/api/guidebooks/{}", id), "intruder", None))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let mut edited = sample_guidebook("Mountain Cabin Deluxe");
    edited["rules"] = json!(["Shoes off"]);
    let response = app
        .send(authed("PUT", &format!("/api/guidebooks/{}", id), "host-1", Some(edited)))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await?;
    assert_eq!(updated["rules"], json!(["Shoes off"]));

    let response = app
        .send(authed(
            "POST",
            &format!("/api/guidebook/{}/template", id),
            "host-1",
            Some(json!({ "template_key": "template_9" })),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(authed(
            "POST",
            &format!("/api/guidebook/{}/template", id),
            "host-1",
            Some(json!({ "template_key": "template_2" })),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(authed("DELETE", &format!("/api/guidebooks/{}", id), "host-1", None))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .send(authed("GET", &format!("/api/guidebooks/{}", id), "host-1", None))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_validation_rejects_missing_name_and_long_lists() -> Result<()> {
    let app = TestApp::new()?;

    let response = app
        .send(authed("POST", "/api/generate", "host-1", Some(json!({ "host_name": "Mia" }))))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut payload = sample_guidebook("Too Many Rules");
    payload["rules"] = json!((0..16).map(|i| format!("rule {}", i)).collect::<Vec<_>>());
    let response = app
        .send(authed("POST", "/api/generate", "host-1", Some(payload)))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_script_urls_never_reach_pages() -> Result<()> {
    let app = TestApp::new()?;

    let mut payload = sample_guidebook("Script Manual");
    payload["house_manual"] = json!([{
        "name": "Heater",
        "description": "How to start it",
        "media_url": "javascript:alert(document.cookie)",
        "media_type": "video"
    }]);
    let response = app
        .send(authed("POST", "/api/generate", "host-1", Some(payload)))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut payload = sample_guidebook("Script Cover");
    payload["cover_image_url"] = json!("javascript:alert(1)");
    let response = app
        .send(authed("POST", "/api/generate", "host-1", Some(payload)))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut payload = sample_guidebook("Video Manual");
    payload["house_manual"] = json!([{
        "name": "Heater",
        "media_url": "https://videos.test/heater.mp4",
        "media_type": "video"
    }]);
    let response = app
        .send(authed("POST", "/api/generate", "host-1", Some(payload)))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await?["guidebook_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app.send(anonymous("GET", &format!("/preview/{}", id))).await?;
    let html = String::from_utf8(body_bytes(response).await?)?;
    assert!(html.contains("href=\"https://videos.test/heater.mp4\""));
    assert!(!html.contains("javascript:"));
    Ok(())
}

#[tokio::test]
async fn test_upgrade_activates_newest_guidebooks() -> Result<()> {
    let app = TestApp::new()?;
    let first = create(&app, "host-1", "First").await?;
    let second = create(&app, "host-1", "Second").await?;

    upgrade(&app, "host-1", "starter").await?;

    let first_gb = app.store.get_guidebook(&first)?.unwrap();
    let second_gb = app.store.get_guidebook(&second)?.unwrap();
    assert!(!first_gb.active);
    assert!(second_gb.active);
    let slug = second_gb.public_slug.clone().unwrap();
    assert!(slug.starts_with("second-"));

    let response = app.send(anonymous("GET", &format!("/g/{}", slug))).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(response).await?)?;
    assert!(html.contains("Second"));
    assert!(!html.contains("class=\"banner\""));

    let response = app.send(anonymous("GET", "/g/no-such-slug")).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // starter 只有一個名額：手動切換需要先停用另一本
    let response = app
        .send(authed("POST", &format!("/api/guidebooks/{}/activate", first), "host-1", None))
        .await?;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let response = app
        .send(authed("POST", &format!("/api/guidebooks/{}/deactivate", second), "host-1", None))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .send(authed("POST", &format!("/api/guidebooks/{}/activate", first), "host-1", None))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.send(authed("GET", "/api/profile", "host-1", None)).await?;
    let profile = body_json(response).await?;
    assert_eq!(profile["plan"], json!("starter"));
    assert_eq!(profile["guidebook_limit"], json!(1));
    assert_eq!(profile["active_count"], json!(1));
    Ok(())
}

#[tokio::test]
async fn test_publish_and_pdf() -> Result<()> {
    let app = TestApp::new()?;
    let id = create(&app, "host-1", "Harbor Loft").await?;
    upgrade(&app, "host-1", "growth").await?;

    let response = app
        .send(authed("POST", &format!("/api/guidebooks/{}/publish", id), "host-1", None))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let published = body_json(response).await?;
    assert!(published["url"]
        .as_str()
        .unwrap()
        .starts_with("https://api.guidewise.test/g/harbor-loft-"));

    let response = app.send(anonymous("GET", &format!("/guidebook/{}", id))).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(authed(
            "GET",
            &format!("/api/guidebook/{}/pdf?download=1&include_qr=1", id),
            "host-1",
            None,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str()?.to_string();
    assert!(disposition.starts_with("attachment"));
    assert!(body_bytes(response).await?.starts_with(b"%PDF"));

    let response = app
        .send(authed(
            "GET",
            &format!("/api/guidebook/{}/pdf?template=nope", id),
            "host-1",
            None,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
