use crate::utils::TestApp;

#[tokio::test]
async fn auth_group_is_mounted_under_its_prefix() {
    let app = TestApp::spawn_server().await;

    let response = app.get("/auth").await;

    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn unregistered_groups_are_not_served() {
    let app = TestApp::spawn_server().await;

    let response = app.get("/bridges").await;

    assert_eq!(response.status().as_u16(), 404);
}
