// src/tasks.rs

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::TaskError;
use crate::models::Identity;

#[derive(Debug, Deserialize)]
pub struct AddTaskRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SetCheckedRequest {
    pub checked: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetPrivateRequest {
    pub private: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub hide_completed: bool,
}

fn acting_user(req: &HttpRequest) -> Option<Identity> {
    req.extensions().get::<Identity>().cloned()
}

/// GET /tasks
/// Tasks visible to the caller, newest first.
pub async fn list_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, TaskError> {
    let acting = acting_user(&req);
    let tasks = data.tasks.list_visible(acting.as_ref(), query.hide_completed).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// GET /tasks/incomplete_count
pub async fn incomplete_count(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, TaskError> {
    let acting = acting_user(&req);
    let count = data.tasks.incomplete_count(acting.as_ref()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "count": count })))
}

/// POST /tasks
pub async fn add_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<AddTaskRequest>,
) -> Result<HttpResponse, TaskError> {
    let acting = acting_user(&req);
    let id = data.tasks.add_task(&payload.text, acting.as_ref()).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "id": id })))
}

/// DELETE /tasks/{task_id}
pub async fn delete_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> Result<HttpResponse, TaskError> {
    let acting = acting_user(&req);
    data.tasks.delete_task(&task_id, acting.as_ref()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// PUT /tasks/{task_id}/checked
pub async fn set_checked(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<SetCheckedRequest>,
) -> Result<HttpResponse, TaskError> {
    let acting = acting_user(&req);
    data.tasks.set_checked(&task_id, payload.checked, acting.as_ref()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// PUT /tasks/{task_id}/private
pub async fn set_private(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<SetPrivateRequest>,
) -> Result<HttpResponse, TaskError> {
    let acting = acting_user(&req);
    data.tasks.set_private(&task_id, payload.private, acting.as_ref()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tasks")
            .route("", web::get().to(list_tasks))
            .route("", web::post().to(add_task))
            .route("/incomplete_count", web::get().to(incomplete_count))
            .route("/{task_id}", web::delete().to(delete_task))
            .route("/{task_id}/checked", web::put().to(set_checked))
            .route("/{task_id}/private", web::put().to(set_private)),
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix::Actor;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use serde_json::{json, Value};

    use crate::app_state::AppState;
    use crate::auth::{self, create_jwt, Authentication};
    use crate::config::Config;
    use crate::models::{Identity, Task, User};
    use crate::store::{MemoryTaskStore, MemoryUserStore, UserStore};
    use crate::task_feed::TaskFeed;
    use crate::task_service::TaskService;

    const SECRET: &str = "test-secret";

    fn state() -> AppState {
        let config = Config::from_lookup(|name| (name == "JWT_SECRET").then(|| SECRET.to_string()))
            .unwrap();
        let tasks = Arc::new(TaskService::new(Arc::new(MemoryTaskStore::new()), 64));
        AppState {
            feed: TaskFeed::new(tasks.clone()).start(),
            tasks,
            users: Arc::new(MemoryUserStore::new()),
            config,
        }
    }

    fn bearer(identity: &Identity) -> (header::HeaderName, String) {
        let token = create_jwt(identity, SECRET, 1).unwrap();
        (header::AUTHORIZATION, format!("Bearer {}", token))
    }

    fn alice() -> Identity {
        Identity::new("u-alice", "alice")
    }

    fn bob() -> Identity {
        Identity::new("u-bob", "bob")
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .wrap(Authentication::new(SECRET))
                    .app_data(actix_web::web::Data::new($state))
                    .service(
                        actix_web::web::scope("/auth")
                            .route("/signup", actix_web::web::post().to(auth::signup))
                            .route("/login", actix_web::web::post().to(auth::login)),
                    )
                    .configure(super::configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn full_task_lifecycle_over_http() {
        let app = app!(state());

        // Scenario: alice adds a task, everyone sees it.
        let req = test::TestRequest::post()
            .uri("/tasks")
            .insert_header(bearer(&alice()))
            .set_json(json!({ "text": "buy milk" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        let id = body["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get().uri("/tasks").to_request();
        let tasks: Vec<Task> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].owner, "u-alice");
        assert!(!tasks[0].is_checked());

        // alice makes it private; bob no longer sees it.
        let req = test::TestRequest::put()
            .uri(&format!("/tasks/{}/private", id))
            .insert_header(bearer(&alice()))
            .set_json(json!({ "private": true }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get().uri("/tasks").insert_header(bearer(&bob())).to_request();
        let tasks: Vec<Task> = test::call_and_read_body_json(&app, req).await;
        assert!(tasks.is_empty());

        // bob cannot check it.
        let req = test::TestRequest::put()
            .uri(&format!("/tasks/{}/checked", id))
            .insert_header(bearer(&bob()))
            .set_json(json!({ "checked": true }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "not-authorized");

        // alice checks then deletes it; afterwards it is gone.
        let req = test::TestRequest::put()
            .uri(&format!("/tasks/{}/checked", id))
            .insert_header(bearer(&alice()))
            .set_json(json!({ "checked": true }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::delete()
            .uri(&format!("/tasks/{}", id))
            .insert_header(bearer(&alice()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::put()
            .uri(&format!("/tasks/{}/checked", id))
            .insert_header(bearer(&alice()))
            .set_json(json!({ "checked": false }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "not-found");
    }

    #[actix_web::test]
    async fn anonymous_add_is_unauthenticated() {
        let app = app!(state());
        let req = test::TestRequest::post()
            .uri("/tasks")
            .set_json(json!({ "text": "buy milk" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "unauthenticated");

        let req = test::TestRequest::get().uri("/tasks").to_request();
        let tasks: Vec<Task> = test::call_and_read_body_json(&app, req).await;
        assert!(tasks.is_empty());
    }

    #[actix_web::test]
    async fn invalid_token_is_rejected() {
        let app = app!(state());
        let req = test::TestRequest::get()
            .uri("/tasks")
            .insert_header((header::AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn hide_completed_and_count() {
        let app = app!(state());
        for text in ["one", "two"] {
            let req = test::TestRequest::post()
                .uri("/tasks")
                .insert_header(bearer(&alice()))
                .set_json(json!({ "text": text }))
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            if text == "one" {
                let req = test::TestRequest::put()
                    .uri(&format!("/tasks/{}/checked", body["id"].as_str().unwrap()))
                    .insert_header(bearer(&bob()))
                    .set_json(json!({ "checked": true }))
                    .to_request();
                assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
            }
        }

        let req = test::TestRequest::get().uri("/tasks?hide_completed=true").to_request();
        let tasks: Vec<Task> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "two");

        let req = test::TestRequest::get().uri("/tasks/incomplete_count").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
    }

    #[actix_web::test]
    async fn signup_login_and_use_token() {
        let app = app!(state());
        let creds = json!({ "username": "alice", "password": "hunter22" });

        let req = test::TestRequest::post().uri("/auth/signup").set_json(&creds).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post().uri("/auth/signup").set_json(&creds).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "username": "alice", "password": "wrong" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post().uri("/auth/login").set_json(&creds).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let token = body["token"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri("/tasks")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token)))
            .set_json(json!({ "text": "from a real login" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::get().uri("/tasks").to_request();
        let tasks: Vec<Task> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(tasks[0].username, "alice");
        assert_eq!(tasks[0].owner, body["user_id"].as_str().unwrap());
    }

    #[actix_web::test]
    async fn signup_rejects_bad_usernames() {
        let app = app!(state());
        let req = test::TestRequest::post()
            .uri("/auth/signup")
            .set_json(json!({ "username": "a b", "password": "hunter22" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn login_with_corrupt_hash_is_a_server_error() {
        let state = state();
        state
            .users
            .insert(&User {
                user_id: "u-carol".into(),
                username: "carol".into(),
                password: "not-a-bcrypt-hash".into(),
            })
            .await
            .unwrap();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "username": "carol", "password": "hunter22" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "internal");
    }
}
