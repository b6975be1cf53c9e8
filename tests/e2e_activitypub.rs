//! E2E tests for ActivityPub actor documents and signed inbox delivery

mod common;

use common::TestServer;
use fedsig::error::AppError;

#[tokio::test]
async fn test_person_document() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.actor_url("user1"))
        .header("Accept", "application/activity+json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        fedsig::federation::ACTIVITY_STREAMS_CONTENT_TYPE
    );

    let json: serde_json::Value = response.json().await.unwrap();
    let actor_url = server.actor_url("user1");

    assert!(json["@context"].is_array());
    assert_eq!(json["type"], "Person");
    assert_eq!(json["preferredUsername"], "user1");
    assert_eq!(json["id"], actor_url);
    assert_eq!(json["inbox"], format!("{}/inbox", actor_url));
    assert_eq!(json["outbox"], format!("{}/outbox", actor_url));
    assert_eq!(json["publicKey"]["id"], format!("{}#main-key", actor_url));
    assert_eq!(json["publicKey"]["owner"], actor_url);
    assert!(
        json["publicKey"]["publicKeyPem"]
            .as_str()
            .unwrap()
            .starts_with("-----BEGIN PUBLIC KEY-----")
    );
}

#[tokio::test]
async fn test_person_not_found() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.actor_url("nobody"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let json: serde_json::Value = response.json().await.unwrap();
    assert!(json["error"].as_str().unwrap().contains("does not exist"));
}

#[tokio::test]
async fn test_signed_delivery_accepted() {
    let server = TestServer::new().await;
    let client = server.state.signing_client("user1").await.unwrap();

    let activity = serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "Follow",
        "actor": server.actor_url("user1"),
        "object": server.actor_url("user2"),
    });
    let body = serde_json::to_vec(&activity).unwrap();

    let response = client
        .deliver(&body, &server.inbox_url("user2"))
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    // The signer's key is now cached
    assert!(
        server
            .state
            .gate
            .keys()
            .contains(&format!("{}#main-key", server.actor_url("user1")))
    );
}

#[tokio::test]
async fn test_signed_empty_body_accepted() {
    let server = TestServer::new().await;
    let client = server.state.signing_client("user2").await.unwrap();

    let response = client
        .deliver(b"", &server.inbox_url("user1"))
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_unsigned_delivery_rejected() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.inbox_url("user2"))
        .header("Content-Type", "application/activity+json")
        .body(r#"{"type":"Follow"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_tampered_body_rejected() {
    let server = TestServer::new().await;
    let client = server.state.signing_client("user1").await.unwrap();

    let mut request = client
        .build_signed_request(br#"{"type":"Like"}"#, &server.inbox_url("user2"))
        .unwrap();
    *request.body_mut() = Some(reqwest::Body::from(r#"{"type":"Delete"}"#));

    let response = server.client.execute(request).await.unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_garbage_signature_rejected() {
    let server = TestServer::new().await;
    let client = server.state.signing_client("user1").await.unwrap();

    let mut request = client
        .build_signed_request(b"{}", &server.inbox_url("user2"))
        .unwrap();
    request.headers_mut().insert(
        "signature",
        format!(
            r#"keyId="{}#main-key",algorithm="rsa-sha256",headers="(request-target) date digest",signature="Zm9vYmFy""#,
            server.actor_url("user1")
        )
        .parse()
        .unwrap(),
    );

    let response = server.client.execute(request).await.unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_delivery_to_unknown_user_is_transport_error() {
    let server = TestServer::new().await;
    let client = server.state.signing_client("user1").await.unwrap();

    let result = client.deliver(b"{}", &server.inbox_url("nobody")).await;

    match result {
        Err(AppError::Transport(error)) => {
            assert_eq!(error.status().map(|s| s.as_u16()), Some(404));
        }
        other => panic!("expected transport error, got {:?}", other.map(|r| r.status())),
    }
}

#[tokio::test]
async fn test_signing_client_unknown_actor() {
    let server = TestServer::new().await;

    let result = server.state.signing_client("nobody").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_federation_disabled_hides_routes() {
    let server = TestServer::with_federation(fedsig::config::FederationConfig {
        enabled: false,
        ..TestServer::federation_config()
    })
    .await;

    let response = server
        .client
        .get(server.actor_url("user1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = server
        .client
        .post(server.inbox_url("user1"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_oversized_inbox_body_rejected() {
    let server = TestServer::with_federation(fedsig::config::FederationConfig {
        max_size: 1,
        ..TestServer::federation_config()
    })
    .await;

    let response = server
        .client
        .post(server.inbox_url("user1"))
        .header("Content-Type", "application/activity+json")
        .body(vec![b'a'; 2 * 1024 * 1024])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn test_invalid_federation_config_is_fatal() {
    let config = fedsig::config::AppConfig {
        server: fedsig::config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            domain: "localhost".to_string(),
            protocol: "http".to_string(),
        },
        federation: fedsig::config::FederationConfig {
            algorithms: vec!["rsa-md5".to_string()],
            ..Default::default()
        },
        actors: Default::default(),
        logging: fedsig::config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    };

    let result = fedsig::AppState::new(config).await;
    assert!(matches!(result, Err(AppError::Config(_))));
}
