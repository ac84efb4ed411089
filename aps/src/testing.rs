//! An in-process stand-in for the APS endpoints, for tests.
//!
//! [`MockAps`] serves a small, fixed world over HTTP on a free local port:
//!
//! ```text
//! Acme Construction (HUB)
//!     Marvel Tower (PROJECT)
//!         Plans/
//!         Project Files/
//!             Architecture/
//!                 Tower.rvt               translated, one 3D view
//!                 Models/
//!                     Bridge.ifc          translation failed
//!                     Deep/
//!                         Deeper/
//!                             Deep.rvt
//!             Site Plan.dwg               translation in progress
//!             README.txt
//!             Archive/
//!                 Tower v1.rvt            never translated
//!                 2019/
//!     Grasbaan Bridge (DEST_PROJECT)
//!         Shared/
//!     Harbor Office (EMPTY_PROJECT)
//! Side Ventures (OTHER_HUB)
//!     Research Lab
//!     (a project without a name)
//! ```
//!
//! There are also a few pathological corners, which are not reachable from the hub listing:
//! * `ENDLESS_HUB`, whose project listing never runs out of pages
//! * `ENDLESS_PROJECT`, whose member listing never runs out of pages
//! * `WIDE_PROJECT`, whose `Project Files` has `WIDE_FOLDERS` subfolders, each with one model
//! * `SHORT_LIVED_CLIENT_ID`, which is issued tokens that are already within the expiry margin
//!
//! Writes (new folders, hidden folders, translation jobs, new projects and project members) are
//! recorded so tests can inspect them.

use crate::{
    auth::{Credentials, DEFAULT_SCOPES},
    Aps, Client, Options,
};
use async_std::{net::TcpStream, sync::Mutex, task::sleep};
use base64::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use surf::Url;
use tide::{Body, Request, Response};

/// Identifiers and data served by [`MockAps`].
pub mod fixtures {
    pub const CLIENT_ID: &str = "client";
    pub const CLIENT_SECRET: &str = "secret";
    /// A client whose tokens are only valid for 60 seconds.
    pub const SHORT_LIVED_CLIENT_ID: &str = "short-lived-client";

    pub const HUB: &str = "b.hub-acme";
    pub const ACCOUNT: &str = "hub-acme";
    pub const OTHER_HUB: &str = "b.hub-side";

    pub const PROJECT: &str = "b.proj-marvel";
    pub const DEST_PROJECT: &str = "b.proj-grasbaan";
    pub const EMPTY_PROJECT: &str = "b.proj-harbor";
    pub const LAB_PROJECT: &str = "b.proj-lab";
    pub const UNNAMED_PROJECT: &str = "b.proj-unnamed";

    pub const ENDLESS_HUB: &str = "b.hub-endless";
    pub const ENDLESS_PROJECT: &str = "b.proj-endless";
    pub const WIDE_PROJECT: &str = "b.proj-wide";
    pub const WIDE_ROOT_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.wide";
    pub const WIDE_FOLDERS: usize = 60;

    pub const PLANS_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.plans";
    pub const ROOT_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.root";
    pub const ARCHITECTURE_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.architecture";
    pub const MODELS_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.models";
    pub const DEEP_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.deep";
    pub const DEEPER_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.deeper";
    pub const ARCHIVE_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.archive";
    pub const ARCHIVE_2019_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.2019";
    pub const DEST_ROOT_FOLDER: &str = "urn:adsk.wipprod:fs.folder:co.shared";

    pub const TOWER_LINEAGE: &str = "urn:adsk.wipprod:dm.lineage:tower";
    pub const TOWER_VERSION: &str = "urn:adsk.wipprod:fs.file:vf.tower?version=3";
    pub const SITE_LINEAGE: &str = "urn:adsk.wipprod:dm.lineage:site";
    pub const SITE_VERSION: &str = "urn:adsk.wipprod:fs.file:vf.site?version=1";
    pub const BRIDGE_LINEAGE: &str = "urn:adsk.wipprod:dm.lineage:bridge";
    pub const BRIDGE_VERSION: &str = "urn:adsk.wipprod:fs.file:vf.bridge?version=2";
    pub const OLD_TOWER_LINEAGE: &str = "urn:adsk.wipprod:dm.lineage:old-tower";
    pub const OLD_TOWER_VERSION: &str = "urn:adsk.wipprod:fs.file:vf.old-tower?version=7";
    pub const DEEP_LINEAGE: &str = "urn:adsk.wipprod:dm.lineage:deep";
    pub const DEEP_VERSION: &str = "urn:adsk.wipprod:fs.file:vf.deep?version=1";

    /// The 3D view of `Tower.rvt`.
    pub const TOWER_VIEW: &str = "6bfb4886-f2ee-9ccb-8db0-c5c170220c40";
    /// Number of walls in `Tower.rvt`.
    pub const TOWER_WALLS: u64 = 1500;
    /// Number of doors in `Tower.rvt`.
    pub const TOWER_DOORS: u64 = 240;

    pub const ADMIN_EMAIL: &str = "admin@acme.test";
    pub const ADMIN_USER_ID: &str = "ADMIN1234";

    /// Lineage and latest version of every file.
    pub(super) const VERSIONS: [(&str, &str); 5] = [
        (TOWER_LINEAGE, TOWER_VERSION),
        (SITE_LINEAGE, SITE_VERSION),
        (BRIDGE_LINEAGE, BRIDGE_VERSION),
        (OLD_TOWER_LINEAGE, OLD_TOWER_VERSION),
        (DEEP_LINEAGE, DEEP_VERSION),
    ];
}

use fixtures::*;

type State = Arc<MockState>;

struct MockState {
    base_url: Url,
    token_requests: AtomicUsize,
    last_scope: Mutex<Option<String>>,
    hub_listings: AtomicUsize,
    project_pages: AtomicUsize,
    user_pages: AtomicUsize,
    folder_listings: AtomicUsize,
    rate_limited: AtomicUsize,
    created_folders: Mutex<Vec<(String, String, String)>>,
    hidden_folders: Mutex<Vec<String>>,
    translation_jobs: Mutex<Vec<Value>>,
    created_projects: Mutex<Vec<(String, Value)>>,
    added_users: Mutex<Vec<(String, Value)>>,
}

/// A mock APS deployment running in the background.
pub struct MockAps {
    base_url: Url,
    state: State,
}

impl MockAps {
    /// Start serving on a free local port.
    pub async fn start() -> Self {
        let port = portpicker::pick_unused_port().expect("no free port");
        let base_url: Url = format!("http://127.0.0.1:{port}/").parse().unwrap();
        let state = Arc::new(MockState {
            base_url: base_url.clone(),
            token_requests: Default::default(),
            last_scope: Default::default(),
            hub_listings: Default::default(),
            project_pages: Default::default(),
            user_pages: Default::default(),
            folder_listings: Default::default(),
            rate_limited: Default::default(),
            created_folders: Default::default(),
            hidden_folders: Default::default(),
            translation_jobs: Default::default(),
            created_projects: Default::default(),
            added_users: Default::default(),
        });

        let app = app(state.clone());
        async_std::task::spawn(async move {
            if let Err(err) = app.listen(format!("127.0.0.1:{port}")).await {
                tracing::error!("mock APS server exited: {err}");
            }
        });
        wait_for_port(port).await;

        Self { base_url, state }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Options for connecting to this mock with valid credentials.
    pub fn options(&self) -> Options {
        Options {
            client_id: Some(CLIENT_ID.into()),
            client_secret: Some(CLIENT_SECRET.into()),
            scopes: DEFAULT_SCOPES.into(),
            base_url: self.base_url.clone(),
            region: "EMEA".into(),
            admin_email: Some(ADMIN_EMAIL.into()),
            dev_admin_email: None,
            website_site_name: None,
            functions_worker_runtime: None,
        }
    }

    pub fn aps(&self) -> Aps {
        Aps::new(&self.options()).unwrap()
    }

    pub fn client(&self) -> Client {
        let opt = self.options();
        Client::new(
            opt.base_url.clone(),
            opt.region.clone(),
            Credentials {
                client_id: opt.client_id,
                client_secret: opt.client_secret,
                scopes: opt.scopes,
            },
        )
        .unwrap()
    }

    /// The number of requests to the token endpoint so far.
    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    /// The scopes requested by the most recent token request.
    pub async fn last_scope(&self) -> Option<String> {
        self.state.last_scope.lock().await.clone()
    }

    /// The number of times the hubs have been listed.
    pub fn hub_listings(&self) -> usize {
        self.state.hub_listings.load(Ordering::SeqCst)
    }

    /// The number of pages of projects served so far.
    pub fn project_pages(&self) -> usize {
        self.state.project_pages.load(Ordering::SeqCst)
    }

    /// The number of pages of project members served so far.
    pub fn user_pages(&self) -> usize {
        self.state.user_pages.load(Ordering::SeqCst)
    }

    /// The number of folder listings served so far.
    pub fn folder_listings(&self) -> usize {
        self.state.folder_listings.load(Ordering::SeqCst)
    }

    /// Folders created so far, as (parent ID, name, new ID).
    pub async fn created_folders(&self) -> Vec<(String, String, String)> {
        self.state.created_folders.lock().await.clone()
    }

    /// IDs of folders hidden so far.
    pub async fn hidden_folders(&self) -> Vec<String> {
        self.state.hidden_folders.lock().await.clone()
    }

    /// Bodies of translation jobs submitted so far.
    pub async fn translation_jobs(&self) -> Vec<Value> {
        self.state.translation_jobs.lock().await.clone()
    }

    /// Projects created so far, as (`User-Id` header, request body).
    pub async fn created_projects(&self) -> Vec<(String, Value)> {
        self.state.created_projects.lock().await.clone()
    }

    /// Project members added so far, as (`User-Id` header, request body).
    pub async fn added_users(&self) -> Vec<(String, Value)> {
        self.state.added_users.lock().await.clone()
    }
}

async fn wait_for_port(port: u16) {
    const MAX_CONNECT_RETRIES: usize = 100;

    for _ in 0..MAX_CONNECT_RETRIES {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for mock APS server");
}

fn app(state: State) -> tide::Server<State> {
    let mut app = tide::with_state(state);
    app.at("/authentication/v2/token").post(token);

    app.at("/project/v1/hubs").get(hubs);
    app.at("/project/v1/hubs/:hub/projects").get(projects);
    app.at("/project/v1/hubs/:hub/projects/:project/topFolders")
        .get(top_folders);
    app.at("/data/v1/projects/:project/folders").post(create_folder);
    app.at("/data/v1/projects/:project/folders/:folder")
        .patch(update_folder);
    app.at("/data/v1/projects/:project/folders/:folder/contents")
        .get(folder_contents);
    app.at("/data/v1/projects/:project/items/:item").get(item);

    app.at("/modelderivative/v2/designdata/job").post(job);
    app.at("/modelderivative/v2/designdata/:urn/manifest")
        .get(manifest);
    app.at("/modelderivative/v2/designdata/:urn/metadata")
        .get(metadata);
    app.at("/modelderivative/v2/designdata/:urn/metadata/:guid")
        .get(object_tree);

    app.at("/hq/v1/regions/eu/accounts/:account/users/search")
        .get(search_users);
    app.at("/construction/admin/v1/accounts/:account/projects")
        .post(create_project);
    app.at("/construction/admin/v1/projects/:project/users")
        .get(project_users)
        .post(add_project_user);

    app.at("/test/echo").get(echo).post(echo);
    app.at("/test/reject-first-token").get(reject_first_token);
    app.at("/test/rate-limited").get(rate_limited);
    app.at("/test/forbidden").get(|_| async {
        respond(403, json!({ "errors": [{ "detail": "forbidden" }] }))
    });
    app
}

fn respond(status: u16, body: Value) -> tide::Result {
    Ok(Response::builder(status)
        .body(Body::from_json(&body)?)
        .build())
}

fn not_found(what: &str) -> tide::Result {
    respond(404, json!({ "errors": [{ "detail": format!("{what} not found") }] }))
}

fn header(req: &Request<State>, name: &str) -> Option<String> {
    req.header(name)
        .map(|values| values.last().as_str().to_string())
}

fn param(req: &Request<State>, name: &str) -> tide::Result<String> {
    let raw = req.param(name)?;
    Ok(urlencoding::decode(raw)?.into_owned())
}

fn query(req: &Request<State>, name: &str) -> Option<String> {
    req.url()
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Reject requests without an access token minted by [`token`].
fn authorize(req: &Request<State>) -> tide::Result<()> {
    match header(req, "Authorization") {
        Some(auth) if auth.starts_with("Bearer token-") => Ok(()),
        _ => Err(tide::Error::from_str(401, "missing or invalid token")),
    }
}

#[derive(Deserialize)]
struct TokenForm {
    client_id: String,
    client_secret: String,
    grant_type: String,
    scope: String,
}

async fn token(mut req: Request<State>) -> tide::Result {
    let form: TokenForm = req.body_form().await?;
    let n = req.state().token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    *req.state().last_scope.lock().await = Some(form.scope);

    if form.grant_type != "client_credentials" {
        return respond(400, json!({ "errorCode": "unsupported_grant_type" }));
    }
    let expires_in = match form.client_id.as_str() {
        CLIENT_ID => 3599,
        SHORT_LIVED_CLIENT_ID => 60,
        _ => 0,
    };
    if expires_in == 0 || form.client_secret != CLIENT_SECRET {
        return respond(
            400,
            json!({
                "developerMessage": "The client_id or client_secret is invalid.",
                "errorCode": "invalid_client",
            }),
        );
    }
    respond(
        200,
        json!({
            "access_token": format!("token-{n}"),
            "token_type": "Bearer",
            "expires_in": expires_in,
        }),
    )
}

fn resource(ty: &str, id: &str, attributes: Value) -> Value {
    json!({ "type": ty, "id": id, "attributes": attributes })
}

async fn hubs(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    req.state().hub_listings.fetch_add(1, Ordering::SeqCst);
    respond(
        200,
        json!({
            "data": [
                resource("hubs", HUB, json!({ "name": "Acme Construction" })),
                resource("hubs", OTHER_HUB, json!({ "name": "Side Ventures" })),
            ],
        }),
    )
}

/// Projects are served one per page, to exercise pagination.
async fn projects(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    req.state().project_pages.fetch_add(1, Ordering::SeqCst);
    let hub = param(&req, "hub")?;
    let page = query(&req, "page[number]")
        .and_then(|page| page.parse::<usize>().ok())
        .unwrap_or(0);
    let next_url = format!(
        "{}project/v1/hubs/{hub}/projects?page[number]={}",
        req.state().base_url,
        page + 1
    );

    let projects = match hub.as_str() {
        HUB => vec![
            (PROJECT, Some("Marvel Tower")),
            (DEST_PROJECT, Some("Grasbaan Bridge")),
            (EMPTY_PROJECT, Some("Harbor Office")),
        ],
        OTHER_HUB => vec![(LAB_PROJECT, Some("Research Lab")), (UNNAMED_PROJECT, None)],
        ENDLESS_HUB => {
            let id = format!("b.proj-endless-{page}");
            let project = resource("projects", &id, json!({ "name": format!("Endless {page}") }));
            return respond(
                200,
                json!({ "data": [project], "links": { "next": { "href": next_url } } }),
            );
        }
        _ => return not_found("hub"),
    };

    let data = projects
        .get(page)
        .map(|(id, name)| {
            let attributes = match name {
                Some(name) => json!({ "name": name }),
                None => json!({}),
            };
            vec![resource("projects", id, attributes)]
        })
        .unwrap_or_default();

    // APS has been seen to render `next` both as an object and as a bare URL.
    let next = if page + 1 >= projects.len() {
        Value::Null
    } else if page % 2 == 0 {
        json!({ "href": next_url })
    } else {
        json!(next_url)
    };
    respond(200, json!({ "data": data, "links": { "next": next } }))
}

async fn top_folders(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    let folders = match param(&req, "project")?.as_str() {
        PROJECT => vec![(PLANS_FOLDER, "Plans"), (ROOT_FOLDER, "Project Files")],
        DEST_PROJECT => vec![(DEST_ROOT_FOLDER, "Shared")],
        EMPTY_PROJECT => vec![],
        WIDE_PROJECT => vec![(WIDE_ROOT_FOLDER, "Project Files")],
        _ => return not_found("project"),
    };
    let data = folders
        .into_iter()
        .map(|(id, name)| resource("folders", id, json!({ "name": name, "displayName": name })))
        .collect::<Vec<_>>();
    respond(200, json!({ "data": data }))
}

fn folder(id: &str, name: &str) -> Value {
    resource("folders", id, json!({ "name": name, "displayName": name }))
}

fn file(name: &str, lineage: &str) -> Value {
    let version = VERSIONS
        .iter()
        .find(|(l, _)| *l == lineage)
        .map(|(_, v)| *v);
    let mut item = resource("items", lineage, json!({ "displayName": name }));
    if let Some(version) = version {
        item["relationships"] = json!({ "tip": { "data": { "type": "versions", "id": version } } });
    }
    item
}

async fn folder_contents(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    req.state().folder_listings.fetch_add(1, Ordering::SeqCst);
    let folder_id = param(&req, "folder")?;
    let contents = match folder_id.as_str() {
        ROOT_FOLDER => vec![
            folder(ARCHITECTURE_FOLDER, "Architecture"),
            file("Site Plan.dwg", SITE_LINEAGE),
            file("README.txt", "urn:adsk.wipprod:dm.lineage:readme"),
            folder(ARCHIVE_FOLDER, "Archive"),
        ],
        ARCHITECTURE_FOLDER => vec![
            file("Tower.rvt", TOWER_LINEAGE),
            folder(MODELS_FOLDER, "Models"),
        ],
        MODELS_FOLDER => vec![
            file("Bridge.ifc", BRIDGE_LINEAGE),
            folder(DEEP_FOLDER, "Deep"),
        ],
        DEEP_FOLDER => vec![folder(DEEPER_FOLDER, "Deeper")],
        DEEPER_FOLDER => vec![file("Deep.rvt", DEEP_LINEAGE)],
        ARCHIVE_FOLDER => vec![
            file("Tower v1.rvt", OLD_TOWER_LINEAGE),
            folder(ARCHIVE_2019_FOLDER, "2019"),
        ],
        PLANS_FOLDER | ARCHIVE_2019_FOLDER | DEST_ROOT_FOLDER => vec![],
        WIDE_ROOT_FOLDER => (0..WIDE_FOLDERS)
            .map(|i| folder(&format!("{WIDE_ROOT_FOLDER}-{i}"), &format!("Level {i}")))
            .collect(),
        id => match id.strip_prefix(WIDE_ROOT_FOLDER).and_then(|n| n.strip_prefix('-')) {
            Some(n) => vec![file(
                &format!("Sheet {n}.rvt"),
                &format!("urn:adsk.wipprod:dm.lineage:wide-{n}"),
            )],
            None => return not_found("folder"),
        },
    };
    respond(200, json!({ "data": contents }))
}

async fn create_folder(mut req: Request<State>) -> tide::Result {
    authorize(&req)?;
    if !header(&req, "Content-Type").is_some_and(|ty| ty.contains("vnd.api+json")) {
        return respond(415, json!({ "detail": "expected JSON:API content" }));
    }
    let body: Value = req.body_json().await?;
    let (Some(parent), Some(name)) = (
        body.pointer("/data/relationships/parent/data/id")
            .and_then(Value::as_str),
        body.pointer("/data/attributes/name").and_then(Value::as_str),
    ) else {
        return respond(400, json!({ "detail": "malformed folder" }));
    };

    let mut created = req.state().created_folders.lock().await;
    let id = format!("urn:adsk.wipprod:fs.folder:co.new-{}", created.len() + 1);
    created.push((parent.to_string(), name.to_string(), id.clone()));
    respond(201, json!({ "data": folder(&id, name) }))
}

async fn update_folder(mut req: Request<State>) -> tide::Result {
    authorize(&req)?;
    let id = param(&req, "folder")?;
    let body: Value = req.body_json().await?;
    if body.pointer("/data/attributes/hidden") == Some(&Value::Bool(true)) {
        req.state().hidden_folders.lock().await.push(id.clone());
    }
    respond(200, json!({ "data": resource("folders", &id, json!({ "hidden": true })) }))
}

async fn item(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    let id = param(&req, "item")?;
    if !VERSIONS.iter().any(|(lineage, _)| *lineage == id) {
        return not_found("item");
    }
    respond(200, json!({ "data": file("", &id) }))
}

/// Decode the base64 URN in a Model Derivative path.
fn derivative_urn(req: &Request<State>) -> tide::Result<String> {
    let encoded = param(req, "urn")?;
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|err| tide::Error::from_str(400, err.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}

async fn manifest(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    match derivative_urn(&req)?.as_str() {
        TOWER_VERSION => respond(200, json!({ "status": "success", "progress": "complete" })),
        SITE_VERSION => respond(202, json!({ "status": "inprogress", "progress": "35% complete" })),
        BRIDGE_VERSION => respond(200, json!({ "status": "failed", "progress": "complete" })),
        _ => not_found("manifest"),
    }
}

async fn metadata(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    let views = match derivative_urn(&req)?.as_str() {
        TOWER_VERSION => json!([{ "name": "{3D}", "role": "3d", "guid": TOWER_VIEW }]),
        SITE_VERSION => json!([]),
        _ => return not_found("metadata"),
    };
    respond(200, json!({ "data": { "type": "metadata", "metadata": views } }))
}

async fn object_tree(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    if derivative_urn(&req)? != TOWER_VERSION || param(&req, "guid")? != TOWER_VIEW {
        return not_found("view");
    }

    let walls = (0..TOWER_WALLS)
        .map(|i| json!({ "objectid": 100 + i, "name": format!("Basic Wall [{}]", 31000 + i) }));
    let doors = (0..TOWER_DOORS).map(|i| {
        json!({ "objectid": 5000 + i, "name": format!("Single-Flush Door [{}]", 42000 + i) })
    });
    let tree = json!({
        "data": {
            "type": "objects",
            "objects": [{
                "objectid": 1,
                "name": "Tower",
                "objects": walls.chain(doors).collect::<Vec<_>>(),
            }],
        },
    });
    Ok(Response::builder(200)
        .body(Body::from_string(tree.to_string()))
        .content_type(tide::http::mime::JSON)
        .build())
}

async fn job(mut req: Request<State>) -> tide::Result {
    authorize(&req)?;
    if header(&req, "x-ads-force").as_deref() != Some("true") {
        return respond(409, json!({ "diagnostic": "derivatives already exist" }));
    }
    let body: Value = req.body_json().await?;
    let urn = body["input"]["urn"].clone();
    req.state().translation_jobs.lock().await.push(body);
    respond(
        201,
        json!({ "result": "created", "urn": urn, "acceptedJobs": { "output": { "formats": [] } } }),
    )
}

async fn search_users(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    if param(&req, "account")? != ACCOUNT {
        return not_found("account");
    }
    let users = match query(&req, "email").as_deref() {
        Some(ADMIN_EMAIL) => json!([{ "id": ADMIN_USER_ID, "email": ADMIN_EMAIL, "role": "account_admin" }]),
        _ => json!([]),
    };
    respond(200, users)
}

async fn create_project(mut req: Request<State>) -> tide::Result {
    authorize(&req)?;
    if param(&req, "account")? != ACCOUNT {
        return not_found("account");
    }
    let Some(user_id) = header(&req, "User-Id") else {
        return respond(403, json!({ "detail": "User-Id header is required" }));
    };
    let body: Value = req.body_json().await?;
    let name = body["name"].clone();
    req.state()
        .created_projects
        .lock()
        .await
        .push((user_id, body));
    respond(202, json!({ "id": "proj-new", "name": name, "status": "pending" }))
}

fn member(email: Option<&str>, name: Option<&str>, products: &[&str]) -> Value {
    let products = products
        .iter()
        .map(|key| json!({ "key": key, "access": "member" }))
        .collect::<Vec<_>>();
    json!({ "email": email, "name": name, "products": products })
}

async fn project_users(req: Request<State>) -> tide::Result {
    authorize(&req)?;
    req.state().user_pages.fetch_add(1, Ordering::SeqCst);
    let project = param(&req, "project")?;
    let offset = query(&req, "offset").unwrap_or_default();
    let (results, next) = match (project.as_str(), offset.as_str()) {
        ("proj-marvel", "") => (
            vec![member(Some("Jane@Acme.test"), Some("Jane"), &["docs", "build"])],
            Some(format!(
                "{}construction/admin/v1/projects/proj-marvel/users?offset=1",
                req.state().base_url
            )),
        ),
        ("proj-marvel", _) => (
            vec![
                member(Some("bob@acme.test"), Some("Bob"), &["docs"]),
                member(Some("carol@acme.test"), None, &["build"]),
            ],
            None,
        ),
        ("proj-grasbaan", _) => (
            vec![
                member(Some("jane@acme.test"), Some("Jane Doe"), &["insight", "docs"]),
                member(Some("carol@acme.test"), None, &["docs"]),
                member(None, Some("Pending Invite"), &["docs"]),
            ],
            None,
        ),
        ("proj-endless", _) => {
            let page = offset.parse::<usize>().unwrap_or(0);
            let email = format!("user{page}@acme.test");
            (
                vec![member(Some(&email), None, &["docs"])],
                Some(format!(
                    "{}construction/admin/v1/projects/proj-endless/users?offset={}",
                    req.state().base_url,
                    page + 1
                )),
            )
        }
        ("proj-harbor", _) => {
            return respond(500, json!({ "detail": "internal error" }));
        }
        _ => return not_found("project"),
    };
    respond(
        200,
        json!({ "results": results, "pagination": { "nextUrl": next } }),
    )
}

async fn add_project_user(mut req: Request<State>) -> tide::Result {
    authorize(&req)?;
    let Some(user_id) = header(&req, "User-Id") else {
        return respond(403, json!({ "detail": "User-Id header is required" }));
    };
    let body: Value = req.body_json().await?;
    let email = body["email"].clone();
    req.state().added_users.lock().await.push((user_id, body));
    respond(201, json!({ "id": "member-new", "email": email, "status": "active" }))
}

async fn echo(mut req: Request<State>) -> tide::Result {
    let body = req.body_string().await.unwrap_or_default();
    respond(
        200,
        json!({
            "authorization": header(&req, "Authorization"),
            "region": header(&req, "x-ads-region"),
            "content_type": header(&req, "Content-Type"),
            "user_id": header(&req, "User-Id"),
            "body": serde_json::from_str::<Value>(&body).unwrap_or(Value::Null),
        }),
    )
}

/// Rejects the first token ever minted, as if it had been revoked.
async fn reject_first_token(req: Request<State>) -> tide::Result {
    match header(&req, "Authorization").as_deref() {
        Some("Bearer token-1") => respond(401, json!({ "detail": "token expired" })),
        Some(auth) => respond(200, json!({ "token": auth.trim_start_matches("Bearer ") })),
        None => respond(401, json!({ "detail": "missing token" })),
    }
}

/// Rate limits the first request.
async fn rate_limited(req: Request<State>) -> tide::Result {
    let attempt = req.state().rate_limited.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt == 1 {
        return Ok(Response::builder(429).header("Retry-After", "0").build());
    }
    respond(200, json!({ "attempts": attempt }))
}
