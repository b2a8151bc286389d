//! End-to-end requests through the axum router

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tilawa_lib::assembler::{assemble, SourceAyah, SourceSurah, SurahMeta, TextDocument};
use tilawa_lib::{router, AppState, Config, JsonFileStore, ProgressStore, SqliteStore};
use tower::ServiceExt;

fn corpus() -> tilawa_lib::Corpus {
    let quran = TextDocument {
        surahs: vec![
            SourceSurah {
                number: 1,
                ayahs: ["بسم الله الرحمن الرحيم", "الحمد لله رب العالمين"]
                    .iter()
                    .map(|t| SourceAyah {
                        text: t.to_string(),
                        page: Some(1),
                        juz: Some(1),
                        hizb_quarter: Some(1),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
            SourceSurah {
                number: 112,
                ayahs: ["قل هو الله أحد", "الله الصمد"]
                    .iter()
                    .map(|t| SourceAyah {
                        text: t.to_string(),
                        page: Some(604),
                        juz: Some(30),
                        hizb_quarter: Some(240),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
        ],
    };
    let tafsir = TextDocument {
        surahs: vec![SourceSurah {
            number: 112,
            ayahs: vec![SourceAyah {
                text: "تفسير الإخلاص".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }],
    };
    let meta = vec![
        SurahMeta {
            number: 1,
            name: "الفاتحة".to_string(),
            english_name: "Al-Faatiha".to_string(),
            english_name_translation: "The Opening".to_string(),
            number_of_ayahs: Some(2),
            revelation_type: Some("Meccan".to_string()),
        },
        SurahMeta {
            number: 112,
            name: "الإخلاص".to_string(),
            english_name: "Al-Ikhlaas".to_string(),
            english_name_translation: "Sincerity".to_string(),
            number_of_ayahs: Some(2),
            revelation_type: Some("Meccan".to_string()),
        },
    ];
    assemble(quran, tafsir, meta)
}

fn app_with(store: impl FnOnce(&TempDir) -> Arc<dyn ProgressStore>) -> (TempDir, Router) {
    app_with_config(store, |_| {})
}

fn app_with_config(
    store: impl FnOnce(&TempDir) -> Arc<dyn ProgressStore>,
    tweak: impl FnOnce(&mut Config),
) -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let mut config = Config::with_data_dir(dir.path());
    tweak(&mut config);
    let state = AppState::with_parts(config, corpus(), store);
    (dir, router(Arc::new(state)))
}

fn json_app() -> (TempDir, Router) {
    app_with(|dir| Arc::new(JsonFileStore::new(dir.path().join("students.json"))))
}

fn sqlite_app() -> (TempDir, Router) {
    app_with(|dir| Arc::new(SqliteStore::open(dir.path().join("tilawa.db")).unwrap()))
}

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, email: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({"name": "Fatima", "email": email, "password": "bismillah"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn surah_endpoint_merges_tafsir() {
    let (_dir, app) = json_app();

    let (status, body) = send(&app, Method::GET, "/api/quran/surah/112", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "الإخلاص");
    assert_eq!(body["numberOfAyahs"], 2);
    assert_eq!(body["ayahs"][0]["tafsir"], "تفسير الإخلاص");
    assert_eq!(body["ayahs"][1]["tafsir"], "");

    for missing in ["/api/quran/surah/2", "/api/quran/surah/0", "/api/quran/surah/abc"] {
        let (status, _) = send(&app, Method::GET, missing, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", missing);
    }

    let (status, body) = send(&app, Method::GET, "/api/quran/surahs", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert!(body[0].get("ayahs").is_none());
}

#[tokio::test]
async fn page_endpoint_groups_and_404s() {
    let (_dir, app) = json_app();

    let (status, body) = send(&app, Method::GET, "/api/quran/page/604", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 604);
    assert_eq!(body["surahs"]["112"].as_array().unwrap().len(), 2);

    for missing in ["/api/quran/page/0", "/api/quran/page/605", "/api/quran/page/300"] {
        let (status, _) = send(&app, Method::GET, missing, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", missing);
    }
}

#[tokio::test]
async fn search_endpoint_validates_and_caps() {
    let (_dir, app) = json_app();

    let (status, body) = send(&app, Method::GET, "/api/quran/search?q=%D8%A7%D9%84%D9%84%D9%87", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r["text"].as_str().unwrap().contains("الله")));

    let (status, body) = send(&app, Method::GET, "/api/quran/search?q=%D8%A7%D9%84%D9%84%D9%87&limit=1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["total"], 3);

    let (status, _) = send(&app, Method::GET, "/api/quran/search?q=a", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, Method::GET, "/api/quran/search", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reciters_and_audio_urls() {
    let (_dir, app) = json_app();

    let (status, body) = send(&app, Method::GET, "/api/quran/reciters", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.as_array().unwrap().is_empty());

    let (status, body) = send(&app, Method::GET, "/api/quran/reciters/alafasy/audio/112", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://server8.mp3quran.net/afs/112.mp3");

    let (status, _) = send(&app, Method::GET, "/api/quran/reciters/nobody/audio/1", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn student_routes_require_a_session() {
    let (_dir, app) = json_app();

    let (status, _) = send(&app, Method::POST, "/api/student/progress", None, Some(json!({"lastSurah": 2}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, Method::GET, "/api/student/notes", Some("not-a-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    for (_dir, app) in [json_app(), sqlite_app()] {
        register(&app, "fatima@example.com").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"name": "Other", "email": "FATIMA@example.com", "password": "another1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT, "{}", body);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "fatima@example.com", "password": "another1"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn registration_validation_lists_problems() {
    let (_dir, app) = json_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({"name": "", "email": "bad", "password": "123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"].as_array().unwrap().len(), 3);

    let (status, _) = send(&app, Method::POST, "/api/auth/register", None, Some(json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_logout_cycle() {
    let (_dir, app) = json_app();
    register(&app, "zaid@example.com").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"email": "zaid@example.com", "password": "bismillah"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["student"].get("password").is_none());
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "zaid@example.com");

    let (status, _) = send(&app, Method::POST, "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_logins_are_throttled() {
    let (_dir, app) = app_with_config(
        |dir| Arc::new(JsonFileStore::new(dir.path().join("students.json"))),
        |config| config.login_per_minute = 1,
    );
    let attempt = json!({"email": "hamza@example.com", "password": "not-his-password"});

    let (status, _) = send(&app, Method::POST, "/api/auth/login", None, Some(attempt.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, Method::POST, "/api/auth/login", None, Some(attempt)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"email": "other@example.com", "password": "not-their-password"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn progress_updates_merge_over_http() {
    for (_dir, app) in [json_app(), sqlite_app()] {
        let token = register(&app, "huda@example.com").await;

        let (status, body) = send(&app, Method::GET, "/api/student/progress", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!((body["lastSurah"].as_u64(), body["lastAyah"].as_u64()), (Some(1), Some(1)));

        send(&app, Method::POST, "/api/student/progress", Some(&token), Some(json!({"lastSurah": 2}))).await;
        let (status, body) =
            send(&app, Method::POST, "/api/student/progress", Some(&token), Some(json!({"lastAyah": 5}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lastSurah"], 2);
        assert_eq!(body["lastAyah"], 5);

        let (status, _) =
            send(&app, Method::POST, "/api/student/progress", Some(&token), Some(json!({"lastSurah": 200}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/student/bookmarks",
            Some(&token),
            Some(json!({"surah": 2, "ayah": 255})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bookmarkedVerses"], json!([{"surah": 2, "ayah": 255}]));
    }
}

#[tokio::test]
async fn notes_and_records_are_created() {
    let (_dir, app) = sqlite_app();
    let token = register(&app, "bilal@example.com").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/student/notes",
        Some(&token),
        Some(json!({"surahNumber": 112, "ayahNumber": 1, "note": "done", "tags": ["memorized"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["surahNumber"], 112);

    let (status, body) = send(&app, Method::GET, "/api/student/notes?surah=112", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&app, Method::GET, "/api/student/memorized", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["taggedSurahNumbers"], json!([112]));

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/student/errors",
        Some(&token),
        Some(json!({"surahNumber": 1, "ayahNumber": 2, "description": "madd too short"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/student/sessions",
        Some(&token),
        Some(json!({"durationMinutes": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/student/payments",
        Some(&token),
        Some(json!({"amount": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for path in ["/api/student/errors", "/api/student/sessions"] {
        let (status, body) = send(&app, Method::GET, path, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1, "{}", path);
    }
    let (_, body) = send(&app, Method::GET, "/api/student/payments", Some(&token), None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn health_reports_backend() {
    let (_dir, app) = sqlite_app();
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "sqlite");
}
