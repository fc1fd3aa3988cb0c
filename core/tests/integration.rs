//! End-to-end tests against the sandbox server.
//!
//! # Design
//! Each test starts its own sandbox on a random port, so tests never share
//! templates. The client talks to it over real HTTP through `UreqTransport`;
//! the sandbox handle stays with the test so rendered output can be checked.
//! Tests that create templates finish with `remove_all_templates`.

use std::net::{SocketAddr, TcpListener};

use mock_server::{Sandbox, DEFAULT_SERVER_TOKEN};
use postmark_core::{
    ApiError, ClientConfig, CreateTemplate, DeliveryStatus, EditTemplate, PostmarkClient,
    TemplateModel, TemplateTarget, TemplatedMessage, ValidationRequest,
};
use serde_json::json;

const SENDER: &str = "sender@example.com";
const INVALID_ALIAS_MESSAGE: &str =
    "The Template's 'Alias' associated with this request is not valid or was not found.";

/// Start a sandbox on a random port and return its address with a handle
/// sharing its store.
fn start_sandbox() -> (SocketAddr, Sandbox) {
    let std_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    let sandbox = Sandbox::default();
    let served = sandbox.clone();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::serve(listener, served).await
        })
    });

    (addr, sandbox)
}

fn client_for(addr: SocketAddr, token: &str) -> PostmarkClient {
    let config = ClientConfig::new(token).with_base_url(format!("http://{addr}"));
    PostmarkClient::new(&config).unwrap()
}

fn setup() -> (PostmarkClient, Sandbox) {
    let (addr, sandbox) = start_sandbox();
    (client_for(addr, DEFAULT_SERVER_TOKEN), sandbox)
}

fn welcome(name: &str) -> CreateTemplate {
    CreateTemplate::new(name)
        .with_subject("Hi {{name}}")
        .with_html_body("<b>Hello, {{name}}</b>")
        .with_text_body("Hello, {{name}}!")
}

/// Deactivate every active template page by page, several deletes in
/// flight at once.
fn remove_all_templates(client: &PostmarkClient) {
    loop {
        let listing = client.list_templates(0).unwrap();
        if listing.total_count == 0 {
            break;
        }
        assert!(!listing.templates.is_empty(), "non-zero total with an empty page");
        std::thread::scope(|s| {
            for id in listing.ids() {
                s.spawn(move || client.delete_template(id).unwrap());
            }
        });
    }
}

#[test]
fn template_lifecycle() {
    let (client, _sandbox) = setup();

    // Step 1: create and read back.
    let created = client.create_template(&welcome("lifecycle")).unwrap();
    assert!(created.template_id > 0);
    assert!(created.active);

    let fetched = client.get_template(created.template_id).unwrap();
    assert_eq!(fetched.template_id, created.template_id);
    assert_eq!(fetched.name, "lifecycle");
    assert_eq!(fetched.subject.as_deref(), Some("Hi {{name}}"));
    assert_eq!(fetched.html_body.as_deref(), Some("<b>Hello, {{name}}</b>"));
    assert_eq!(fetched.text_body.as_deref(), Some("Hello, {{name}}!"));
    assert!(fetched.active);
    assert!(fetched.associated_server_id > 0);

    // Step 2: edit is observable, omitted fields are untouched.
    client
        .edit_template(
            created.template_id,
            &EditTemplate::default()
                .with_name("lifecycle-v2")
                .with_subject("Bye {{name}}"),
        )
        .unwrap();
    let edited = client.get_template(created.template_id).unwrap();
    assert_eq!(edited.name, "lifecycle-v2");
    assert_eq!(edited.subject.as_deref(), Some("Bye {{name}}"));
    assert_eq!(edited.html_body.as_deref(), Some("<b>Hello, {{name}}</b>"));
    assert_eq!(edited.text_body.as_deref(), Some("Hello, {{name}}!"));

    // Step 3: every field can be replaced.
    client
        .edit_template(
            created.template_id,
            &EditTemplate::default()
                .with_name("lifecycle-v3")
                .with_subject("Subject {{order}}")
                .with_html_body("<p>Order {{order}}</p>")
                .with_text_body("Order {{order}}"),
        )
        .unwrap();
    let replaced = client.get_template(created.template_id).unwrap();
    assert_eq!(replaced.template_id, created.template_id);
    assert_eq!(replaced.name, "lifecycle-v3");
    assert_eq!(replaced.subject.as_deref(), Some("Subject {{order}}"));
    assert_eq!(replaced.html_body.as_deref(), Some("<p>Order {{order}}</p>"));
    assert_eq!(replaced.text_body.as_deref(), Some("Order {{order}}"));
    assert!(replaced.active);

    // Step 4: delete is soft.
    let confirmation = client.delete_template(created.template_id).unwrap();
    assert_eq!(confirmation.error_code, 0);
    let deleted = client.get_template(created.template_id).unwrap();
    assert!(!deleted.active);
    assert!(!client.list_templates(0).unwrap().ids().contains(&created.template_id));

    remove_all_templates(&client);
}

#[test]
fn listing_excludes_deleted_templates() {
    let (client, _sandbox) = setup();

    let ids: Vec<i64> = (0..10)
        .map(|i| client.create_template(&welcome(&format!("t{i}"))).unwrap().template_id)
        .collect();
    client.delete_template(ids[3]).unwrap();

    let listing = client.list_templates(0).unwrap();
    assert_eq!(listing.total_count, 9);
    assert_eq!(listing.templates.len(), 9);
    assert!(!listing.ids().contains(&ids[3]));

    remove_all_templates(&client);
    let listing = client.list_templates(0).unwrap();
    assert_eq!(listing.total_count, 0);
    assert!(listing.templates.is_empty());
}

#[test]
fn teardown_removes_templates_beyond_first_page() {
    let (addr, _sandbox) = start_sandbox();
    let config = ClientConfig::new(DEFAULT_SERVER_TOKEN)
        .with_base_url(format!("http://{addr}"))
        .with_page_size(2);
    let client = PostmarkClient::new(&config).unwrap();
    for i in 0..5 {
        client.create_template(&welcome(&format!("t{i}"))).unwrap();
    }
    assert_eq!(client.list_templates(0).unwrap().templates.len(), 2);

    remove_all_templates(&client);
    assert_eq!(client.list_templates(0).unwrap().total_count, 0);
}

#[test]
fn listing_offset_matches_skipped_first_page() {
    let (client, _sandbox) = setup();
    for i in 0..8 {
        client.create_template(&welcome(&format!("t{i}"))).unwrap();
    }

    let first = client.list_templates(0).unwrap();
    let shifted = client.list_templates(5).unwrap();
    let skipped: Vec<i64> = first.ids().into_iter().skip(5).collect();
    assert_eq!(shifted.ids(), skipped);
    assert_eq!(shifted.total_count, first.total_count);

    let window = client.list_templates_page(2, 3).unwrap();
    assert_eq!(window.ids(), first.ids()[2..5]);

    remove_all_templates(&client);
}

#[test]
fn get_unknown_template_is_not_found() {
    let (client, _sandbox) = setup();
    let err = client.get_template(424242).unwrap_err();
    assert!(matches!(err, ApiError::NotFound { code: Some(1101), .. }));
}

#[test]
fn validate_infers_model_shape() {
    let (client, _sandbox) = setup();
    let request = ValidationRequest::new(
        "{{name}}",
        "<html><body>{{content}}{{company.address}}{{#each products}}{{/each}}{{^competitors}}There are no substitutes.{{/competitors}}</body></html>",
        "{{content}}",
        json!({"name": "Johnny", "content": "hello, world!"}),
    );

    let result = client.validate_template(&request).unwrap();
    assert!(result.all_content_is_valid);
    assert_eq!(result.all_content_is_valid, result.per_field_valid());
    assert_eq!(
        result.subject.as_ref().unwrap().rendered_content.as_deref(),
        Some("Johnny")
    );

    let suggested = &result.suggested_template_model;
    assert_eq!(suggested["products"].as_array().unwrap().len(), 3);
    assert!(suggested["company"].get("address").is_some());
}

#[test]
fn validate_reports_invalid_field() {
    let (client, _sandbox) = setup();
    let request = ValidationRequest::new("ok", "{{#each items}}", "ok", json!({}));

    let result = client.validate_template(&request).unwrap();
    assert!(!result.all_content_is_valid);
    assert_eq!(result.all_content_is_valid, result.per_field_valid());
    let html = result.html_body.unwrap();
    assert!(!html.content_is_valid);
    assert!(!html.validation_errors.is_empty());
}

#[test]
fn structured_and_raw_models_render_identically() {
    let (client, sandbox) = setup();
    let template = client.create_template(&welcome("models")).unwrap();
    let target = TemplateTarget::Id(template.template_id);

    let structured = TemplatedMessage::new(target.clone(), SENDER, "a@example.com")
        .with_model(TemplateModel::from_serializable(&json!({"name": "Andrew"})).unwrap())
        .with_inline_css(false);
    let raw = TemplatedMessage::new(target, SENDER, "a@example.com")
        .with_model(TemplateModel::raw(r#"{ "name" : "Andrew" }"#))
        .with_inline_css(false);

    let first = client.send_email_with_template(&structured).unwrap();
    let second = client.send_email_with_template(&raw).unwrap();
    for result in [&first, &second] {
        assert!(!result.message_id.is_nil());
        assert_eq!(result.error_code, 0);
        assert_eq!(result.status, DeliveryStatus::Success);
    }
    assert_ne!(first.message_id, second.message_id);

    let sent = sandbox.sent_messages_blocking();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].subject, "Hi Andrew");
    assert_eq!(sent[0].html_body.as_deref(), Some("<b>Hello, Andrew</b>"));
    assert_eq!(sent[0].subject, sent[1].subject);
    assert_eq!(sent[0].html_body, sent[1].html_body);
    assert_eq!(sent[0].text_body, sent[1].text_body);
    assert_eq!(sent[0].model, sent[1].model);

    remove_all_templates(&client);
}

#[test]
fn send_to_unknown_alias_is_rejected_result() {
    let (client, sandbox) = setup();
    let msg = TemplatedMessage::new(
        TemplateTarget::Alias("invalid-alias".into()),
        SENDER,
        SENDER,
    );

    let result = client.send_email_with_template(&msg).unwrap();
    assert_eq!(result.error_code, 1101);
    assert!(result.message_id.is_nil());
    assert_eq!(result.status, DeliveryStatus::Unknown);
    assert!(sandbox.sent_messages_blocking().is_empty());
}

#[test]
fn batch_with_invalid_alias() {
    let (client, _sandbox) = setup();
    let msg = TemplatedMessage::new(
        TemplateTarget::Alias("invalid-alias".into()),
        SENDER,
        SENDER,
    );

    let results = client.send_messages(&[msg]).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].message_id.is_nil());
    assert_eq!(results[0].error_code, 1101);
    assert_eq!(results[0].message, INVALID_ALIAS_MESSAGE);
    assert_eq!(results[0].status, DeliveryStatus::Unknown);
}

#[test]
fn batch_keeps_results_in_message_order() {
    let (client, sandbox) = setup();
    let template = client
        .create_template(&welcome("batch").with_alias("batch-welcome"))
        .unwrap();

    let messages = vec![
        TemplatedMessage::new(TemplateTarget::Id(template.template_id), SENDER, "a@example.com"),
        TemplatedMessage::new(TemplateTarget::Alias("invalid-alias".into()), SENDER, "b@example.com"),
        TemplatedMessage::new(TemplateTarget::Alias("batch-welcome".into()), SENDER, "c@example.com"),
    ];

    let results = client.send_messages(&messages).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_success());
    assert_eq!(results[1].error_code, 1101);
    assert!(results[1].message_id.is_nil());
    assert!(results[2].is_success());
    assert_eq!(results[2].to.as_deref(), Some("c@example.com"));

    let recipients: Vec<String> = sandbox
        .sent_messages_blocking()
        .into_iter()
        .map(|m| m.to)
        .collect();
    assert_eq!(recipients, ["a@example.com", "c@example.com"]);

    remove_all_templates(&client);
}

#[test]
fn empty_batch_returns_empty() {
    let (client, _sandbox) = setup();
    assert!(client.send_messages(&[]).unwrap().is_empty());
}

#[test]
fn wrong_token_is_rejected_by_provider() {
    let (addr, _sandbox) = start_sandbox();
    let client = client_for(addr, "not-the-token");

    let err = client.list_templates(0).unwrap_err();
    assert!(matches!(
        err,
        ApiError::ProviderRejection {
            status: 401,
            code: 10,
            ..
        }
    ));
}

#[test]
fn closed_port_is_transport_error() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = client_for(addr, DEFAULT_SERVER_TOKEN);

    let err = client.get_template(1).unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
}
