#![cfg(test)]

//! End-to-end tests of the MCP server.
//!
//! Each test starts a mock of the APS endpoints and a server pointed at it, each on its own port,
//! and talks to the server over HTTP the way an MCP client would.

use super::Options;
use anyhow::Error;
use aps::testing::{fixtures, MockAps};
use async_std::task::{sleep, spawn};
use futures::future::join_all;
use portpicker::pick_unused_port;
use serde_json::{json, Value};
use std::time::Duration;
use surf::{http::StatusCode, Client};

struct TestServer {
    mock: MockAps,
    client: Client,
}

impl TestServer {
    async fn start() -> Self {
        aps::init_logging();
        let mock = MockAps::start().await;

        let port = pick_unused_port().unwrap();
        let opt = Options {
            port,
            host: "127.0.0.1".into(),
            aps: mock.options(),
        };
        spawn(async move {
            if let Err(err) = opt.serve().await {
                tracing::error!("server exited: {err}");
            }
        });

        let client: Client = surf::Config::default()
            .set_base_url(format!("http://127.0.0.1:{port}").parse().unwrap())
            .try_into()
            .unwrap();
        wait_for_server(&client).await.unwrap();
        Self { mock, client }
    }

    /// Post a raw message, returning the status and the parsed body (if any).
    async fn post(&self, body: Value) -> (StatusCode, Option<Value>) {
        let mut res = self
            .client
            .post("/mcp")
            .body_json(&body)
            .unwrap()
            .await
            .unwrap();
        let text = res.body_string().await.unwrap();
        (res.status(), serde_json::from_str(&text).ok())
    }

    /// Make a request, returning the full JSON-RPC response.
    async fn request(&self, method: &str, params: Value) -> Value {
        let (status, body) = self
            .post(json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params }))
            .await;
        assert_eq!(status, StatusCode::Ok);
        let body = body.unwrap();
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 1);
        body
    }

    /// Call a tool, returning its text output and error flag.
    async fn call(&self, tool: &str, arguments: Value) -> (String, bool) {
        let res = self
            .request("tools/call", json!({ "name": tool, "arguments": arguments }))
            .await;
        let result = &res["result"];
        assert_eq!(result["content"][0]["type"], "text", "{res}");
        (
            result["content"][0]["text"].as_str().unwrap().to_string(),
            result["isError"].as_bool().unwrap(),
        )
    }
}

async fn wait_for_server(client: &Client) -> Result<(), Error> {
    const MAX_CONNECT_RETRIES: usize = 60;

    for _ in 0..MAX_CONNECT_RETRIES {
        match client.get("/health").await {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::warn!("waiting for server to start: {err}");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    Err(Error::msg("timed out waiting for server"))
}

#[async_std::test]
async fn test_health_and_get() {
    let server = TestServer::start().await;

    let mut res = server.client.get("/health").await.unwrap();
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.body_string().await.unwrap(), "ok");

    let res = server.client.get("/mcp").await.unwrap();
    assert_eq!(res.status(), StatusCode::MethodNotAllowed);
}

#[async_std::test]
async fn test_initialize() {
    let server = TestServer::start().await;

    let res = server
        .request(
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "1.0" },
            }),
        )
        .await;
    assert_eq!(res["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(res["result"]["serverInfo"]["name"], "Autodesk ACC Agent");
    assert!(res["result"]["capabilities"]["tools"].is_object());

    // Followed by the `initialized` notification.
    let (status, body) = server
        .post(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    assert_eq!(status, StatusCode::Accepted);
    assert_eq!(body, None);

    let res = server.request("ping", Value::Null).await;
    assert_eq!(res["result"], json!({}));
}

#[async_std::test]
async fn test_protocol_errors() {
    let server = TestServer::start().await;

    let mut res = server
        .client
        .post("/mcp")
        .body_string("{ not json".into())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::Ok);
    let body: Value = res.body_json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);

    let (_, body) = server
        .post(json!([{ "jsonrpc": "2.0", "id": 1, "method": "ping" }]))
        .await;
    assert_eq!(body.unwrap()["error"]["code"], -32600);

    let res = server.request("resources/list", json!({})).await;
    assert_eq!(res["error"]["code"], -32601);

    let res = server
        .request("tools/call", json!({ "name": "no_such_tool", "arguments": {} }))
        .await;
    assert_eq!(res["error"]["code"], -32602);

    let res = server
        .request("tools/call", json!({ "name": "find_project", "arguments": {} }))
        .await;
    assert_eq!(res["error"]["code"], -32602);
}

#[async_std::test]
async fn test_tools_list() {
    let server = TestServer::start().await;

    // Several clients at once.
    let results = join_all((0..4).map(|_| server.request("tools/list", json!({})))).await;
    for res in results {
        let tools = res["result"]["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 16);
        let names = tools
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect::<Vec<_>>();
        for name in [
            "find_project",
            "inspect_file",
            "reprocess_file",
            "count_elements",
            "list_hubs",
            "create_project",
            "list_projects",
            "get_top_folders",
            "list_folder_contents",
            "find_design_files",
            "list_project_users",
            "add_project_user",
            "audit_hub_users",
            "create_folder",
            "replicate_folders",
            "delete_folder",
        ] {
            assert!(names.contains(&name), "missing {name}");
        }
    }
}

#[async_std::test]
async fn test_navigation_tools() {
    let server = TestServer::start().await;

    let (text, is_error) = server.call("list_hubs", json!({})).await;
    assert!(!is_error);
    assert_eq!(
        text,
        format!(
            "Found Hubs:\n- Acme Construction (ID: {})\n- Side Ventures (ID: {})\n",
            fixtures::HUB,
            fixtures::OTHER_HUB
        )
    );

    let (text, is_error) = server
        .call("find_project", json!({ "name_query": "marvel" }))
        .await;
    assert!(!is_error);
    assert_eq!(
        text,
        format!(
            "Found Project:\n  Name:       Marvel Tower\n  Project ID: {}\n  Hub ID:     {}\n\n\
             You can now use this project_id with other tools.",
            fixtures::PROJECT,
            fixtures::HUB
        )
    );

    let (text, is_error) = server
        .call("find_project", json!({ "name_query": "Atlantis" }))
        .await;
    assert!(!is_error);
    assert!(text.starts_with("Project 'Atlantis' not found"), "{text}");

    let (text, _) = server
        .call("list_projects", json!({ "hub_id": fixtures::HUB }))
        .await;
    assert_eq!(text.lines().count(), 4);
    assert!(text.contains("- Harbor Office (ID: b.proj-harbor)"), "{text}");

    let (text, _) = server
        .call("list_projects", json!({ "hub_id": fixtures::OTHER_HUB }))
        .await;
    assert!(
        text.contains(&format!("- Unknown (ID: {})", fixtures::UNNAMED_PROJECT)),
        "{text}"
    );

    let (text, _) = server
        .call(
            "get_top_folders",
            json!({ "hub_id": fixtures::HUB, "project_id": fixtures::PROJECT }),
        )
        .await;
    assert!(
        text.contains(&format!("- Project Files (ID: {})", fixtures::ROOT_FOLDER)),
        "{text}"
    );

    let (text, _) = server
        .call(
            "list_folder_contents",
            json!({ "project_id": fixtures::PROJECT, "folder_id": fixtures::ROOT_FOLDER }),
        )
        .await;
    assert!(text.contains("- [folders] Architecture"), "{text}");
    assert!(text.contains("- [items] Site Plan.dwg"), "{text}");

    let (text, _) = server
        .call(
            "find_design_files",
            json!({ "hub_id": fixtures::HUB, "project_id": fixtures::PROJECT }),
        )
        .await;
    assert!(text.starts_with("Found 2 design files:"), "{text}");
    assert!(
        text.contains("- Tower.rvt (folder: Project Files/Architecture)"),
        "{text}"
    );

    let (text, _) = server
        .call(
            "find_design_files",
            json!({
                "hub_id": fixtures::HUB,
                "project_id": fixtures::PROJECT,
                "extensions": "nwd",
            }),
        )
        .await;
    assert_eq!(text, "No files with extensions 'nwd' found in Project Files.");
}

#[async_std::test]
async fn test_model_tools() {
    let server = TestServer::start().await;

    let (text, is_error) = server
        .call(
            "inspect_file",
            json!({ "project_id": fixtures::PROJECT, "file_id": "Tower.rvt" }),
        )
        .await;
    assert!(!is_error);
    assert_eq!(
        text,
        "Ready for Extraction (translation complete, progress: complete)"
    );

    let (text, is_error) = server
        .call(
            "count_elements",
            json!({
                "project_id": fixtures::PROJECT,
                "file_id": "Tower.rvt",
                "category_name": "Walls",
            }),
        )
        .await;
    assert!(!is_error);
    assert_eq!(
        text,
        format!(
            "Found {} elements matching 'Walls' (including singular variations).",
            fixtures::TOWER_WALLS
        )
    );

    let (text, is_error) = server
        .call(
            "reprocess_file",
            json!({ "project_id": fixtures::PROJECT, "file_id": fixtures::TOWER_LINEAGE }),
        )
        .await;
    assert!(!is_error);
    assert!(
        text.starts_with(&format!(
            "Translation job started for '{}' (status: created).",
            fixtures::TOWER_LINEAGE
        )),
        "{text}"
    );
    assert_eq!(server.mock.translation_jobs().await.len(), 1);
}

#[async_std::test]
async fn test_tool_failures() {
    let server = TestServer::start().await;

    let (text, is_error) = server
        .call(
            "inspect_file",
            json!({ "project_id": fixtures::PROJECT, "file_id": "Missing.rvt" }),
        )
        .await;
    assert!(is_error);
    assert_eq!(
        text,
        "Error inspecting file: Could not find file matching 'Missing.rvt' in project"
    );

    // Translated, but without any views.
    let (text, is_error) = server
        .call(
            "count_elements",
            json!({
                "project_id": fixtures::PROJECT,
                "file_id": "Site Plan.dwg",
                "category_name": "Walls",
            }),
        )
        .await;
    assert!(is_error);
    assert_eq!(text, "Error scanning model: No views found in model metadata.");

    let (text, is_error) = server
        .call(
            "reprocess_file",
            json!({
                "project_id": fixtures::PROJECT,
                "file_id": "urn:adsk.wipprod:dm.lineage:gone",
            }),
        )
        .await;
    assert!(is_error);
    assert_eq!(
        text,
        "Error triggering reprocess: Could not resolve lineage URN to a version URN."
    );

    let (text, is_error) = server
        .call("list_projects", json!({ "hub_id": "b.no-such-hub" }))
        .await;
    assert!(is_error);
    assert!(
        text.starts_with("Failed to list projects: Autodesk API Error 404"),
        "{text}"
    );
}

#[async_std::test]
async fn test_admin_tools() {
    let server = TestServer::start().await;

    let (text, is_error) = server
        .call(
            "create_project",
            json!({ "hub_id": fixtures::HUB, "name": "New Tower", "project_type": "ACC" }),
        )
        .await;
    assert!(!is_error, "{text}");
    assert_eq!(text, "Project 'New Tower' created successfully! ID: proj-new");
    let created = server.mock.created_projects().await;
    assert_eq!(created[0].1["platform"], "acc");

    let (text, is_error) = server
        .call(
            "add_project_user",
            json!({
                "hub_id": fixtures::HUB,
                "project_id": fixtures::PROJECT,
                "email": "new@acme.test",
            }),
        )
        .await;
    assert!(!is_error, "{text}");
    assert_eq!(
        text,
        format!(
            "User 'new@acme.test' added to project {} with administrator access to: docs.",
            fixtures::PROJECT
        )
    );
    let added = server.mock.added_users().await;
    assert_eq!(
        added[0].1["products"],
        json!([{ "key": "docs", "access": "administrator" }])
    );

    let (text, _) = server
        .call("list_project_users", json!({ "project_id": fixtures::PROJECT }))
        .await;
    assert_eq!(
        text,
        format!(
            "Users in project {}:\n- Jane <Jane@Acme.test>: docs, build\n\
             - Bob <bob@acme.test>: docs\n- carol@acme.test <carol@acme.test>: build\n",
            fixtures::PROJECT
        )
    );

    let (text, _) = server
        .call("audit_hub_users", json!({ "hub_id": fixtures::HUB }))
        .await;
    assert_eq!(
        text,
        "Hub user audit (3 users):\n- Bob <bob@acme.test>: docs\n\
         - carol@acme.test <carol@acme.test>: build, docs\n\
         - Jane <jane@acme.test>: build, docs, insight\n"
    );
}

#[async_std::test]
async fn test_folder_tools() {
    let server = TestServer::start().await;

    let (text, is_error) = server
        .call(
            "create_folder",
            json!({
                "project_id": fixtures::DEST_PROJECT,
                "parent_folder_id": fixtures::DEST_ROOT_FOLDER,
                "folder_name": "Handover",
            }),
        )
        .await;
    assert!(!is_error, "{text}");
    assert!(
        text.starts_with("Folder 'Handover' created successfully! ID: urn:"),
        "{text}"
    );

    let (text, is_error) = server
        .call(
            "replicate_folders",
            json!({
                "hub_id": fixtures::HUB,
                "source_project_id": fixtures::PROJECT,
                "dest_project_id": fixtures::DEST_PROJECT,
                "max_depth": 1,
            }),
        )
        .await;
    assert!(!is_error, "{text}");
    // Architecture, Archive and their direct subfolders.
    assert_eq!(
        text,
        "Successfully copied 4 folders from source to destination."
    );
    assert_eq!(server.mock.created_folders().await.len(), 5);

    let (text, is_error) = server
        .call(
            "delete_folder",
            json!({
                "hub_id": fixtures::HUB,
                "project_id": fixtures::PROJECT,
                "folder_name": "ARCHIVE",
            }),
        )
        .await;
    assert!(!is_error, "{text}");
    assert_eq!(text, "Successfully deleted folder 'Archive'.");
    assert_eq!(
        server.mock.hidden_folders().await,
        [fixtures::ARCHIVE_FOLDER]
    );
}
