//! The tools offered to agents.
//!
//! [`ToolName`] is the catalog (names, descriptions and argument schemas, as advertised by
//! `tools/list`), and [`ToolCall`] is a parsed `tools/call` request. Every tool produces plain
//! text. Failures are reported to the agent as text too, flagged with `isError`, so the agent can
//! read the reason and try something else.

use crate::mcp::{RpcError, INVALID_PARAMS};
use anyhow::{bail, Error};
use aps::{
    admin::Platform,
    data::{EntryKind, PROJECT_FILES},
    ids::is_urn,
    Aps,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, IntoStaticStr, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum ToolName {
    FindProject,
    InspectFile,
    ReprocessFile,
    CountElements,
    ListHubs,
    CreateProject,
    ListProjects,
    GetTopFolders,
    ListFolderContents,
    FindDesignFiles,
    ListProjectUsers,
    AddProjectUser,
    AuditHubUsers,
    CreateFolder,
    ReplicateFolders,
    DeleteFolder,
}

/// An argument in a tool's input schema.
struct Arg {
    name: &'static str,
    ty: &'static str,
    description: &'static str,
    required: bool,
}

const fn required(name: &'static str, description: &'static str) -> Arg {
    Arg {
        name,
        ty: "string",
        description,
        required: true,
    }
}

const fn optional(name: &'static str, ty: &'static str, description: &'static str) -> Arg {
    Arg {
        name,
        ty,
        description,
        required: false,
    }
}

const PROJECT_ID: Arg = required("project_id", "The project ID (from find_project).");
const HUB_ID: Arg = required(
    "hub_id",
    "The hub ID (starts with 'b.'). Use list_hubs or find_project to find it.",
);
const FILE_ID: Arg = required(
    "file_id",
    "File name (e.g. \"MyFile.rvt\"), lineage URN, or version URN.",
);

impl ToolName {
    pub fn description(self) -> &'static str {
        match self {
            Self::FindProject => {
                "Search for an ACC/BIM 360 project by name across ALL accessible hubs. Use this \
                 FIRST to obtain a project_id before calling any other tool. The search is \
                 case-insensitive and matches substrings."
            }
            Self::InspectFile => {
                "Inspect a file's translation status in the Model Derivative service (Ready, \
                 Processing, Failed or not translated). Accepts a file name or a URN."
            }
            Self::ReprocessFile => {
                "Trigger a fresh Model Derivative translation of a file. Use this when a file \
                 shows translation errors, or when count_elements unexpectedly returns 0. \
                 Translation typically takes 5-10 minutes; use inspect_file to check progress."
            }
            Self::CountElements => {
                "Count the elements of a Revit/IFC model matching a category name (e.g. Walls, \
                 Doors, Windows). Works on models of any size. The search is case-insensitive \
                 and also tries the singular form (\"Walls\" matches \"Wall\")."
            }
            Self::ListHubs => {
                "List all Autodesk hubs (BIM 360 / ACC accounts) accessible to the agent. Use \
                 this to find the hub_id needed for creating projects."
            }
            Self::CreateProject => "Create a new project in a hub.",
            Self::ListProjects => "List all projects in a hub.",
            Self::GetTopFolders => {
                "Get the top-level folders (Project Files, Plans, ...) of a project."
            }
            Self::ListFolderContents => "List the files and subfolders in a folder.",
            Self::FindDesignFiles => {
                "Search a project's Project Files folder (up to 3 levels deep) for design files \
                 with the given extensions."
            }
            Self::ListProjectUsers => "List the members of a project and their products.",
            Self::AddProjectUser => {
                "Add a user to a project, with administrator access to the given products."
            }
            Self::AuditHubUsers => {
                "Audit the users of a hub: every member of the first projects in the hub, with \
                 the products each of them can access."
            }
            Self::CreateFolder => "Create a subfolder inside a folder.",
            Self::ReplicateFolders => {
                "Copy the folder structure (folders only, no files) of one project's Project \
                 Files into another project in the same hub."
            }
            Self::DeleteFolder => {
                "Delete (hide) a folder directly under a project's Project Files, found by name."
            }
        }
    }

    fn args(self) -> Vec<Arg> {
        match self {
            Self::FindProject => vec![required(
                "name_query",
                "Full or partial project name (e.g. \"Marvel\", \"Grasbaan\").",
            )],
            Self::InspectFile | Self::ReprocessFile => vec![PROJECT_ID, FILE_ID],
            Self::CountElements => vec![
                PROJECT_ID,
                FILE_ID,
                required(
                    "category_name",
                    "Category to count (e.g. \"Walls\", \"Doors\", \"Windows\", \"Floors\").",
                ),
            ],
            Self::ListHubs => vec![],
            Self::CreateProject => vec![
                HUB_ID,
                required("name", "The name of the new project."),
                optional("project_type", "string", "'ACC' or 'BIM360' (default: BIM360)."),
            ],
            Self::ListProjects => vec![HUB_ID],
            Self::GetTopFolders => vec![HUB_ID, PROJECT_ID],
            Self::ListFolderContents => vec![
                PROJECT_ID,
                required("folder_id", "The folder URN (from get_top_folders)."),
            ],
            Self::FindDesignFiles => vec![
                HUB_ID,
                PROJECT_ID,
                optional(
                    "extensions",
                    "string",
                    "Comma-separated file extensions, e.g. \"rvt,ifc\" (default: rvt).",
                ),
            ],
            Self::ListProjectUsers => vec![PROJECT_ID],
            Self::AddProjectUser => vec![
                HUB_ID,
                PROJECT_ID,
                required("email", "Email address of the user to add."),
                optional(
                    "products",
                    "array",
                    "Product keys to grant, e.g. [\"docs\", \"build\"] (default: [\"docs\"]).",
                ),
            ],
            Self::AuditHubUsers => vec![
                HUB_ID,
                optional(
                    "max_projects",
                    "integer",
                    "Maximum number of projects to scan (default: 20).",
                ),
            ],
            Self::CreateFolder => vec![
                PROJECT_ID,
                required("parent_folder_id", "URN of the folder to create the new folder in."),
                required("folder_name", "Name of the new folder."),
            ],
            Self::ReplicateFolders => vec![
                HUB_ID,
                required("source_project_id", "The project to copy folders from."),
                required("dest_project_id", "The project to copy folders into."),
                optional(
                    "max_depth",
                    "integer",
                    "How many levels of subfolders to copy (default: 5).",
                ),
            ],
            Self::DeleteFolder => vec![
                HUB_ID,
                PROJECT_ID,
                required("folder_name", "Name of the folder (case-insensitive)."),
            ],
        }
    }

    /// JSON schema of the tool's arguments.
    pub fn input_schema(self) -> Value {
        let args = self.args();
        let properties = args
            .iter()
            .map(|arg| {
                let mut schema = json!({ "type": arg.ty, "description": arg.description });
                if arg.ty == "array" {
                    schema["items"] = json!({ "type": "string" });
                }
                (arg.name.to_string(), schema)
            })
            .collect::<serde_json::Map<_, _>>();
        let required = args
            .iter()
            .filter(|arg| arg.required)
            .map(|arg| arg.name)
            .collect::<Vec<_>>();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Prefix of the message reported when the tool fails.
    fn error_prefix(self) -> &'static str {
        match self {
            Self::FindProject => "Error searching for project",
            Self::InspectFile => "Error inspecting file",
            Self::ReprocessFile => "Error triggering reprocess",
            Self::CountElements => "Error scanning model",
            Self::ListHubs => "Failed to list hubs",
            Self::CreateProject => "Failed to create project",
            Self::ListProjects => "Failed to list projects",
            Self::GetTopFolders => "Failed to get top folders",
            Self::ListFolderContents => "Failed to list folder contents",
            Self::FindDesignFiles => "Error searching for files",
            Self::ListProjectUsers => "Failed to list project users",
            Self::AddProjectUser => "Failed to add user",
            Self::AuditHubUsers => "Failed to audit hub users",
            Self::CreateFolder => "Failed to create folder",
            Self::ReplicateFolders => "Failed to replicate folders",
            Self::DeleteFolder => "Failed to delete folder",
        }
    }
}

/// The `tools/list` catalog.
pub fn catalog() -> Vec<Value> {
    ToolName::iter()
        .map(|tool| {
            json!({
                "name": tool.to_string(),
                "description": tool.description(),
                "inputSchema": tool.input_schema(),
            })
        })
        .collect()
}

fn default_project_type() -> String {
    "BIM360".into()
}

fn default_extensions() -> String {
    "rvt".into()
}

fn default_products() -> Vec<String> {
    vec!["docs".into()]
}

fn default_max_projects() -> usize {
    20
}

fn default_max_depth() -> usize {
    5
}

/// A tool invocation with its arguments.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    FindProject {
        name_query: String,
    },
    InspectFile {
        project_id: String,
        file_id: String,
    },
    ReprocessFile {
        project_id: String,
        file_id: String,
    },
    CountElements {
        project_id: String,
        file_id: String,
        category_name: String,
    },
    ListHubs {},
    CreateProject {
        hub_id: String,
        name: String,
        #[serde(default = "default_project_type")]
        project_type: String,
    },
    ListProjects {
        hub_id: String,
    },
    GetTopFolders {
        hub_id: String,
        project_id: String,
    },
    ListFolderContents {
        project_id: String,
        folder_id: String,
    },
    FindDesignFiles {
        hub_id: String,
        project_id: String,
        #[serde(default = "default_extensions")]
        extensions: String,
    },
    ListProjectUsers {
        project_id: String,
    },
    AddProjectUser {
        hub_id: String,
        project_id: String,
        email: String,
        #[serde(default = "default_products")]
        products: Vec<String>,
    },
    AuditHubUsers {
        hub_id: String,
        #[serde(default = "default_max_projects")]
        max_projects: usize,
    },
    CreateFolder {
        project_id: String,
        parent_folder_id: String,
        folder_name: String,
    },
    ReplicateFolders {
        hub_id: String,
        source_project_id: String,
        dest_project_id: String,
        #[serde(default = "default_max_depth")]
        max_depth: usize,
    },
    DeleteFolder {
        hub_id: String,
        project_id: String,
        folder_name: String,
    },
}

/// The result of a tool call, as returned to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn into_json(self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        })
    }
}

impl ToolCall {
    /// Parse the params of a `tools/call` request.
    pub fn from_params(params: Value) -> Result<Self, RpcError> {
        let Some(name) = params["name"].as_str() else {
            return Err(RpcError::new(INVALID_PARAMS, "Invalid params: missing tool name"));
        };
        let tool: ToolName = name
            .parse()
            .map_err(|_| RpcError::new(INVALID_PARAMS, format!("Unknown tool: {name}")))?;
        let arguments = match &params["arguments"] {
            Value::Null => json!({}),
            arguments => arguments.clone(),
        };
        serde_json::from_value(json!({ "name": name, "arguments": arguments })).map_err(|err| {
            RpcError::new(
                INVALID_PARAMS,
                format!("Invalid arguments for tool {tool}: {err}"),
            )
        })
    }

    pub fn tool(&self) -> ToolName {
        match self {
            Self::FindProject { .. } => ToolName::FindProject,
            Self::InspectFile { .. } => ToolName::InspectFile,
            Self::ReprocessFile { .. } => ToolName::ReprocessFile,
            Self::CountElements { .. } => ToolName::CountElements,
            Self::ListHubs {} => ToolName::ListHubs,
            Self::CreateProject { .. } => ToolName::CreateProject,
            Self::ListProjects { .. } => ToolName::ListProjects,
            Self::GetTopFolders { .. } => ToolName::GetTopFolders,
            Self::ListFolderContents { .. } => ToolName::ListFolderContents,
            Self::FindDesignFiles { .. } => ToolName::FindDesignFiles,
            Self::ListProjectUsers { .. } => ToolName::ListProjectUsers,
            Self::AddProjectUser { .. } => ToolName::AddProjectUser,
            Self::AuditHubUsers { .. } => ToolName::AuditHubUsers,
            Self::CreateFolder { .. } => ToolName::CreateFolder,
            Self::ReplicateFolders { .. } => ToolName::ReplicateFolders,
            Self::DeleteFolder { .. } => ToolName::DeleteFolder,
        }
    }

    /// Run the tool, reporting any failure as an error message for the agent.
    pub async fn run(self, aps: &Aps) -> ToolOutput {
        let tool = self.tool();
        tracing::info!("calling tool {tool}");
        match self.exec(aps).await {
            Ok(text) => ToolOutput {
                text,
                is_error: false,
            },
            Err(err) => {
                tracing::error!("{tool} failed: {err}");
                ToolOutput {
                    text: format!("{}: {err}", tool.error_prefix()),
                    is_error: true,
                }
            }
        }
    }

    async fn exec(self, aps: &Aps) -> Result<String, Error> {
        match self {
            Self::FindProject { name_query } => Ok(match aps.find_project(&name_query).await {
                Some(found) => format!(
                    "Found Project:\n  Name:       {}\n  Project ID: {}\n  Hub ID:     {}\n\n\
                     You can now use this project_id with other tools.",
                    found.name, found.project_id, found.hub_id
                ),
                None => format!(
                    "Project '{name_query}' not found in any accessible hub. Please check the \
                     name and try again."
                ),
            }),
            Self::InspectFile {
                project_id,
                file_id,
            } => aps.inspect_file(&project_id, &file_id).await,
            Self::ReprocessFile {
                project_id,
                file_id,
            } => {
                let version_urn = resolve_version(aps, &project_id, &file_id, "lineage ").await?;
                let status = aps.trigger_translation(&version_urn).await?;
                Ok(format!(
                    "Translation job started for '{file_id}' (status: {status}).\nPlease wait \
                     5-10 minutes, then use inspect_file or count_elements to verify."
                ))
            }
            Self::CountElements {
                project_id,
                file_id,
                category_name,
            } => {
                let version_urn = resolve_version(aps, &project_id, &file_id, "").await?;
                let count = aps.count_elements(&version_urn, &category_name).await?;
                Ok(format!(
                    "Found {count} elements matching '{category_name}' (including singular \
                     variations)."
                ))
            }
            Self::ListHubs {} => {
                let hubs = aps.hubs().await?;
                if hubs.is_empty() {
                    return Ok("No hubs found. Check your Autodesk account permissions.".into());
                }
                let mut report = "Found Hubs:\n".to_string();
                for hub in hubs {
                    writeln!(report, "- {} (ID: {})", display_name(&hub.name), hub.id)?;
                }
                Ok(report)
            }
            Self::CreateProject {
                hub_id,
                name,
                project_type,
            } => {
                let platform = Platform::from_project_type(&project_type);
                let id = aps.create_project(&hub_id, &name, platform).await?;
                Ok(format!(
                    "Project '{name}' created successfully! ID: {}",
                    id.as_deref().unwrap_or("unknown")
                ))
            }
            Self::ListProjects { hub_id } => {
                let mut report = format!("Projects in Hub {hub_id}:\n");
                for project in aps.projects(&hub_id, 50, &[]).await? {
                    writeln!(report, "- {} (ID: {})", display_name(&project.name), project.id)?;
                }
                Ok(report)
            }
            Self::GetTopFolders { hub_id, project_id } => {
                let mut report = "Top Level Folders:\n".to_string();
                for folder in aps.top_folders(&hub_id, &project_id).await? {
                    writeln!(report, "- {} (ID: {})", folder.name, folder.id)?;
                }
                Ok(report)
            }
            Self::ListFolderContents {
                project_id,
                folder_id,
            } => {
                let mut report = format!("Contents of folder {folder_id}:\n");
                for entry in aps.folder_contents(&project_id, &folder_id).await? {
                    writeln!(report, "- [{}] {} (ID: {})", entry.ty, entry.name, entry.id)?;
                    if entry.kind == EntryKind::File {
                        if let Some(version) = &entry.tip_version_urn {
                            writeln!(report, "  Latest version: {version}")?;
                        }
                    }
                }
                Ok(report)
            }
            Self::FindDesignFiles {
                hub_id,
                project_id,
                extensions,
            } => {
                let files = aps
                    .find_design_files(&hub_id, &project_id, &extensions)
                    .await?;
                if files.is_empty() {
                    return Ok(format!(
                        "No files with extensions '{extensions}' found in {PROJECT_FILES}."
                    ));
                }
                let mut report = format!("Found {} design files:\n", files.len());
                for file in files {
                    writeln!(report, "- {} (folder: {})", file.name, file.folder_path)?;
                    writeln!(report, "  Item ID: {}", file.item_id)?;
                    writeln!(
                        report,
                        "  Version ID: {}",
                        file.version_id.as_deref().unwrap_or("unknown")
                    )?;
                }
                Ok(report)
            }
            Self::ListProjectUsers { project_id } => {
                let users = aps.project_users(&project_id).await?;
                if users.is_empty() {
                    return Ok(format!("No users found in project {project_id}."));
                }
                let mut report = format!("Users in project {project_id}:\n");
                for user in users {
                    let email = user.email.unwrap_or_else(|| "no email".into());
                    let name = user.name.unwrap_or_else(|| email.clone());
                    let products = user
                        .products
                        .into_iter()
                        .filter_map(|product| product.key)
                        .collect::<Vec<_>>();
                    writeln!(report, "- {name} <{email}>: {}", product_list(&products))?;
                }
                Ok(report)
            }
            Self::AddProjectUser {
                hub_id,
                project_id,
                email,
                products,
            } => {
                aps.add_project_user(&hub_id, &project_id, &email, &products)
                    .await?;
                Ok(format!(
                    "User '{email}' added to project {project_id} with administrator access to: \
                     {}.",
                    product_list(&products)
                ))
            }
            Self::AuditHubUsers {
                hub_id,
                max_projects,
            } => {
                let users = aps.hub_users(&hub_id, max_projects).await?;
                if users.is_empty() {
                    return Ok(format!("No users found in hub {hub_id}."));
                }
                let mut report = format!("Hub user audit ({} users):\n", users.len());
                for user in users {
                    writeln!(
                        report,
                        "- {} <{}>: {}",
                        user.name,
                        user.email,
                        product_list(&user.products)
                    )?;
                }
                Ok(report)
            }
            Self::CreateFolder {
                project_id,
                parent_folder_id,
                folder_name,
            } => {
                let id = aps
                    .create_folder(&project_id, &parent_folder_id, &folder_name)
                    .await?;
                Ok(format!(
                    "Folder '{folder_name}' created successfully! ID: {id}"
                ))
            }
            Self::ReplicateFolders {
                hub_id,
                source_project_id,
                dest_project_id,
                max_depth,
            } => {
                aps.replicate_folders(&hub_id, &source_project_id, &dest_project_id, max_depth)
                    .await
            }
            Self::DeleteFolder {
                hub_id,
                project_id,
                folder_name,
            } => {
                aps.soft_delete_folder(&hub_id, &project_id, &folder_name)
                    .await
            }
        }
    }
}

/// Hubs and projects without a name are listed as `Unknown`.
fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "Unknown"
    } else {
        name
    }
}

fn product_list(products: &[String]) -> String {
    if products.is_empty() {
        "no products".into()
    } else {
        products.join(", ")
    }
}

/// Resolve a file name or URN to the URN of the latest version of the file.
async fn resolve_version(
    aps: &Aps,
    project_id: &str,
    file_id: &str,
    kind: &str,
) -> Result<String, Error> {
    let urn = aps.resolve_file_to_urn(project_id, file_id).await?;
    if !is_urn(&urn) {
        bail!("Could not resolve '{file_id}' to a valid {kind}URN.");
    }
    match aps.latest_version_urn(project_id, &urn).await {
        Some(version) if is_urn(&version) => Ok(version),
        _ => bail!("Could not resolve lineage URN to a version URN."),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Minimal arguments for a tool: a placeholder for each required argument.
    fn required_args(tool: ToolName) -> Value {
        let schema = tool.input_schema();
        let args = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|name| (name.as_str().unwrap().to_string(), json!("x")))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(args)
    }

    #[test]
    fn test_catalog() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 16);
        for entry in &catalog {
            assert!(!entry["description"].as_str().unwrap().is_empty());
            assert_eq!(entry["inputSchema"]["type"], "object");
        }
        assert_eq!(catalog[0]["name"], "find_project");
        assert_eq!(
            catalog[0]["inputSchema"]["required"],
            json!(["name_query"])
        );

        let add_user = ToolName::AddProjectUser.input_schema();
        assert_eq!(add_user["properties"]["products"]["type"], "array");
        assert_eq!(add_user["properties"]["products"]["items"]["type"], "string");
        assert_eq!(
            add_user["required"],
            json!(["hub_id", "project_id", "email"])
        );
    }

    #[test]
    fn test_every_tool_accepts_its_schema() {
        for tool in ToolName::iter() {
            let call = ToolCall::from_params(json!({
                "name": tool.to_string(),
                "arguments": required_args(tool),
            }))
            .unwrap_or_else(|err| panic!("{tool}: {err}"));
            assert_eq!(call.tool(), tool);
        }
    }

    #[test]
    fn test_defaults() {
        let call = ToolCall::from_params(json!({
            "name": "create_project",
            "arguments": { "hub_id": "b.1", "name": "Tower" },
        }))
        .unwrap();
        assert_eq!(
            call,
            ToolCall::CreateProject {
                hub_id: "b.1".into(),
                name: "Tower".into(),
                project_type: "BIM360".into(),
            }
        );

        let call = ToolCall::from_params(json!({
            "name": "add_project_user",
            "arguments": { "hub_id": "b.1", "project_id": "b.2", "email": "a@b.test" },
        }))
        .unwrap();
        assert_eq!(
            call,
            ToolCall::AddProjectUser {
                hub_id: "b.1".into(),
                project_id: "b.2".into(),
                email: "a@b.test".into(),
                products: vec!["docs".into()],
            }
        );

        let call = ToolCall::from_params(json!({
            "name": "replicate_folders",
            "arguments": { "hub_id": "h", "source_project_id": "s", "dest_project_id": "d" },
        }))
        .unwrap();
        assert!(matches!(call, ToolCall::ReplicateFolders { max_depth: 5, .. }));
    }

    #[test]
    fn test_missing_arguments_object() {
        let call = ToolCall::from_params(json!({ "name": "list_hubs" })).unwrap();
        assert_eq!(call, ToolCall::ListHubs {});
    }

    #[test]
    fn test_invalid_calls() {
        let err = ToolCall::from_params(json!({ "name": "format_disk" })).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
        assert_eq!(err.message, "Unknown tool: format_disk");

        let err = ToolCall::from_params(json!({
            "name": "inspect_file",
            "arguments": { "project_id": "b.1" },
        }))
        .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
        assert!(err.message.contains("file_id"), "{}", err.message);

        let err = ToolCall::from_params(json!({ "arguments": {} })).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn test_output_json() {
        let out = ToolOutput {
            text: "hello".into(),
            is_error: true,
        };
        assert_eq!(
            out.into_json(),
            json!({ "content": [{ "type": "text", "text": "hello" }], "isError": true })
        );
    }
}
