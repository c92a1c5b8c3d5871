//! Token request, approval and storage

mod fixtures;

use std::time::Duration;

use fixtures::Harness;
use remote_spool::protocol::Operation;
use remote_spool::token::{
    await_token, default_token_name, request_token, write_token, DEFAULT_AUTHORIZATIONS,
};
use tempfile::TempDir;

fn authz() -> Vec<String> {
    DEFAULT_AUTHORIZATIONS.iter().map(|a| a.to_string()).collect()
}

#[test]
fn test_request_approve_and_store() {
    let h = Harness::new();
    h.schedd()
        .script_token_ids(vec!["0042".to_string(), "7731".to_string()]);
    let client = h.client();

    let request_id = request_token(
        &client,
        "alice@fs",
        &authz(),
        h.config.token_request_attempts,
        h.config.retry_policy(),
    )
    .unwrap();
    assert_eq!(request_id, "7731");
    assert_eq!(h.schedd().calls(Operation::RequestToken), 2);

    // approved out of band by an administrator
    assert!(h.schedd().approve_token(&request_id));
    let token = await_token(&client, &request_id, Duration::from_millis(1), None).unwrap();

    let home = TempDir::new().unwrap();
    let dir = h.config.token_dir_path(Some(home.path()));
    let name = default_token_name(&client.address().name);
    let path = write_token(&dir, &name, &token).unwrap();

    assert!(path.starts_with(home.path()));
    assert!(path.ends_with("remote-submit-for-mock-schedd"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{}\n", token));
}

#[test]
fn test_pending_until_approved() {
    let h = Harness::new();
    h.schedd().set_auto_approve_after(Some(3));
    let client = h.client();

    let request_id = request_token(&client, "bob@fs", &authz(), 1, h.config.retry_policy()).unwrap();
    let token = await_token(&client, &request_id, Duration::from_millis(1), None).unwrap();

    assert!(!token.is_empty());
    assert_eq!(h.schedd().calls(Operation::FetchToken), 4);
}

#[test]
fn test_tokens_differ_per_identity() {
    let h = Harness::new();
    h.schedd().set_auto_approve_after(Some(0));
    let client = h.client();

    let mut tokens = Vec::new();
    for identity in ["alice@fs", "bob@fs"] {
        let id = request_token(&client, identity, &authz(), 1, h.config.retry_policy()).unwrap();
        tokens.push(await_token(&client, &id, Duration::from_millis(1), None).unwrap());
    }
    assert_ne!(tokens[0], tokens[1]);
}
