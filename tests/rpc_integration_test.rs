use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use goal_sync::sources::goal_address;
use goal_sync::types::events::GoalCompleted;
use goal_sync::types::GoalAccount;
use goal_sync::{ChainClient, ContractEvent, GoalSyncError, RpcChainClient, goal_key};
use serde_json::{Value, json};
use solana_sdk::pubkey::Pubkey;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": 1
    }))
}

async fn mock_rpc(server: &MockServer, rpc_method: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(body_string_contains(rpc_method))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn setup_rpc_mocks(server: &MockServer) {
    mock_rpc(
        server,
        "getVersion",
        rpc_result(json!({ "solana-core": "1.18.26", "feature-set": 0 })),
    )
    .await;
}

#[tokio::test]
async fn test_current_height_reads_slot() {
    let server = MockServer::start().await;
    setup_rpc_mocks(&server).await;
    mock_rpc(&server, "getSlot", rpc_result(json!(123_456))).await;

    let client = RpcChainClient::new(server.uri());
    assert_eq!(client.current_height().await.unwrap(), 123_456);
}

#[tokio::test]
async fn test_balance_returns_lamports() {
    let server = MockServer::start().await;
    setup_rpc_mocks(&server).await;
    mock_rpc(
        &server,
        "getBalance",
        rpc_result(json!({ "context": { "slot": 1 }, "value": 500_000_000 })),
    )
    .await;

    let client = RpcChainClient::new(server.uri());
    let address = Pubkey::new_unique().to_string();
    assert_eq!(client.balance(&address).await.unwrap(), 500_000_000);

    assert!(matches!(
        client.balance("not-an-address").await,
        Err(GoalSyncError::DecodingError(_))
    ));
}

#[tokio::test]
async fn test_goal_record_decodes_account() {
    let server = MockServer::start().await;
    setup_rpc_mocks(&server).await;

    let program_id = Pubkey::new_unique();
    let key = goal_key(7, 42);
    let account = GoalAccount {
        user: Pubkey::new_unique(),
        amount: 1_000_000_000,
        deadline: 1_700_000_000,
        recipient: Pubkey::new_unique(),
        completed: true,
        claimed: false,
    };
    let mut data = account.encode().unwrap();
    data.resize(data.len() + 16, 0);

    Mock::given(method("POST"))
        .and(body_string_contains("getAccountInfo"))
        .and(body_string_contains(goal_address(&program_id, &key).to_string()))
        .respond_with(rpc_result(json!({
            "context": { "slot": 1 },
            "value": {
                "data": [STANDARD.encode(&data), "base64"],
                "executable": false,
                "lamports": 2_039_280,
                "owner": program_id.to_string(),
                "rentEpoch": 0,
                "space": data.len()
            }
        })))
        .mount(&server)
        .await;

    let client = RpcChainClient::new(server.uri());
    let record = client.goal_record(&program_id, &key).await.unwrap();
    assert!(record.exists);
    assert_eq!(record.amount, 1_000_000_000);
    assert!(record.completed);
    assert!(!record.claimed);
    assert_eq!(record.deadline, 1_700_000_000);
}

#[tokio::test]
async fn test_missing_goal_account_is_not_an_error() {
    let server = MockServer::start().await;
    setup_rpc_mocks(&server).await;
    mock_rpc(
        &server,
        "getAccountInfo",
        rpc_result(json!({ "context": { "slot": 1 }, "value": null })),
    )
    .await;

    let client = RpcChainClient::new(server.uri());
    let record = client
        .goal_record(&Pubkey::new_unique(), &goal_key(7, 42))
        .await
        .unwrap();
    assert!(!record.exists);
}

#[tokio::test]
async fn test_skipped_slot_yields_no_logs() {
    let server = MockServer::start().await;
    setup_rpc_mocks(&server).await;
    mock_rpc(
        &server,
        "getBlock",
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32007,
                "message": "Slot 55 was skipped, or missing due to ledger jump to recent snapshot"
            },
            "id": 1
        })),
    )
    .await;

    let client = RpcChainClient::new(server.uri());
    let logs = client.program_logs(&Pubkey::new_unique(), 55).await.unwrap();
    assert!(logs.is_empty());
}

fn block_transaction(signature: &str, err: Value, logs: &[String]) -> Value {
    let status = if err.is_null() {
        json!({ "Ok": null })
    } else {
        json!({ "Err": err.clone() })
    };
    json!({
        "transaction": {
            "signatures": [signature],
            "message": {
                "header": {
                    "numRequiredSignatures": 1,
                    "numReadonlySignedAccounts": 0,
                    "numReadonlyUnsignedAccounts": 0
                },
                "accountKeys": [],
                "instructions": [],
                "recentBlockhash": "11111111111111111111111111111111"
            }
        },
        "meta": {
            "err": err,
            "status": status,
            "fee": 5000,
            "preBalances": [],
            "postBalances": [],
            "innerInstructions": [],
            "logMessages": logs,
            "preTokenBalances": [],
            "postTokenBalances": [],
            "rewards": []
        },
        "version": 0
    })
}

#[tokio::test]
async fn test_program_logs_skip_failed_transactions() {
    let server = MockServer::start().await;
    setup_rpc_mocks(&server).await;

    let program_id = Pubkey::new_unique();
    let event = ContractEvent::GoalCompleted(GoalCompleted {
        goal_id: goal_key(7, 42),
        validated_by_ai: true,
    });
    let logs = vec![
        format!("Program {program_id} invoke [1]"),
        format!("Program data: {}", STANDARD.encode(event.encode().unwrap())),
        format!("Program {program_id} success"),
    ];

    mock_rpc(
        &server,
        "getBlock",
        rpc_result(json!({
            "previousBlockhash": "11111111111111111111111111111111",
            "blockhash": "11111111111111111111111111111111",
            "parentSlot": 99,
            "transactions": [
                block_transaction("sig-ok", Value::Null, &logs),
                block_transaction("sig-failed", json!({ "InstructionError": [0, "InvalidArgument"] }), &logs)
            ],
            "blockTime": null,
            "blockHeight": 100
        })),
    )
    .await;

    let client = RpcChainClient::new(server.uri());
    let found = client.program_logs(&program_id, 100).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].signature, "sig-ok");
    assert_eq!(found[0].slot, 100);
    assert_eq!(ContractEvent::decode(&found[0].data).unwrap(), event);
}
