use crate::utils::TestApp;

#[tokio::test]
async fn health_check() {
    let app = TestApp::spawn_server().await;

    let response = app.get("/health_check").await;

    assert!(response.status().is_success());
    assert_eq!(Some(0), response.content_length());
}

#[tokio::test]
async fn healthcheck_should_return_200_even_if_url_with_extra_trailing_slash() {
    let app = TestApp::spawn_server().await;

    let response = app.get("/health_check/").await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(Some(0), response.content_length());
}

#[tokio::test]
async fn startup_writes_one_log_file_per_app() {
    let app = TestApp::spawn_server().await;

    assert!(app.log_file.is_file());
    let name = app.log_file.file_name().unwrap().to_str().unwrap();
    assert!(
        regex::Regex::new(r"^app_\d{8}_\d{6}\.log$")
            .unwrap()
            .is_match(name),
        "unexpected log file name {name}"
    );

    let siblings = std::fs::read_dir(app.log_file.parent().unwrap())
        .unwrap()
        .count();
    assert_eq!(siblings, 1);
}
