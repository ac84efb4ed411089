//! Hubs, projects, folders and items, via the Data Management API.

use crate::{
    ids::{encode_urn, ensure_b_prefix, is_adsk_urn, is_version_urn},
    Aps,
};
use anyhow::{bail, Error};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;

/// Upper bound on pages fetched when listing the projects in a hub.
const MAX_PROJECT_PAGES: usize = 50;

/// Depth limit for design file searches.
const SEARCH_MAX_DEPTH: usize = 3;

/// Maximum number of folders scanned by a design file search.
const SEARCH_MAX_FOLDERS: usize = 50;

/// Design file extensions tried when resolving a file name, in order of preference.
const DESIGN_EXTENSIONS: [&str; 6] = ["rvt", "dwg", "nwc", "rcp", "ifc", "nwd"];

/// Name of the root folder for project documents.
pub const PROJECT_FILES: &str = "Project Files";

/// A JSON:API document, as returned by the Data Management API.
#[derive(Clone, Debug, Deserialize)]
struct Document<T> {
    data: T,
    #[serde(default)]
    links: Links,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Links {
    next: Option<Link>,
}

/// A pagination link, which APS renders either as a bare URL or as `{ "href": URL }`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Link {
    Href { href: String },
    Url(String),
}

impl Link {
    fn into_url(self) -> String {
        match self {
            Self::Href { href } => href,
            Self::Url(url) => url,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Attributes {
    name: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Relationships {
    tip: Option<Relationship>,
}

#[derive(Clone, Debug, Deserialize)]
struct Relationship {
    data: Option<Reference>,
}

#[derive(Clone, Debug, Deserialize)]
struct Reference {
    id: Option<String>,
}

impl Relationships {
    fn tip(&self) -> Option<String> {
        self.tip.as_ref()?.data.as_ref()?.id.clone()
    }
}

/// A JSON:API resource object.
#[derive(Clone, Debug, Deserialize)]
struct Resource {
    id: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    relationships: Relationships,
}

/// A hub (a BIM 360 or ACC account) or a project within a hub.
///
/// The name is empty if APS did not report one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub name: String,
}

impl From<Resource> for Entity {
    fn from(res: Resource) -> Self {
        Self {
            id: res.id,
            name: res.attributes.name.unwrap_or_default(),
        }
    }
}

/// The result of a project search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectMatch {
    pub hub_id: String,
    pub project_id: String,
    pub name: String,
}

/// A top-level folder of a project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub ty: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
    Other,
}

/// An entry in the contents of a folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderEntry {
    pub id: String,
    pub name: String,
    pub ty: String,
    pub kind: EntryKind,
    /// For files, the URN of the latest version.
    pub tip_version_urn: Option<String>,
}

impl From<Resource> for FolderEntry {
    fn from(res: Resource) -> Self {
        let kind = match res.ty.as_str() {
            "items" => EntryKind::File,
            "folders" => EntryKind::Folder,
            _ => EntryKind::Other,
        };
        let tip_version_urn = match kind {
            EntryKind::File => res.relationships.tip(),
            _ => None,
        };
        Self {
            id: res.id,
            name: res.attributes.display_name.unwrap_or_default(),
            ty: res.ty,
            kind,
            tip_version_urn,
        }
    }
}

/// A design file found by [`Aps::find_design_files`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesignFile {
    pub name: String,
    /// Lineage URN of the file.
    pub item_id: String,
    /// URN of the latest version of the file.
    pub version_id: Option<String>,
    /// Path of the containing folder, starting with `Project Files`.
    pub folder_path: String,
}

impl Aps {
    /// List all hubs accessible to the application.
    pub async fn hubs(&self) -> Result<Vec<Entity>, Error> {
        let doc: Document<Vec<Resource>> =
            self.client.get("/project/v1/hubs").recv_json().await?;
        Ok(doc.data.into_iter().map(Entity::from).collect())
    }

    /// The first accessible hub.
    ///
    /// The result is cached after the first successful lookup.
    pub async fn hub_id(&self) -> Result<Option<String>, Error> {
        let mut cached = self.hub.lock().await;
        if cached.is_none() {
            *cached = self.hubs().await?.into_iter().next().map(|hub| hub.id);
        }
        Ok(cached.clone())
    }

    /// List all projects in a hub, following pagination links.
    pub async fn projects(
        &self,
        hub_id: &str,
        limit: usize,
        fields: &[&str],
    ) -> Result<Vec<Entity>, Error> {
        let mut url = format!(
            "/project/v1/hubs/{}/projects?page[limit]={limit}",
            ensure_b_prefix(hub_id)
        );
        if !fields.is_empty() {
            url = format!("{url}&fields[projects]={}", fields.join(","));
        }

        let mut projects = vec![];
        let mut next = Some(url);
        for _ in 0..MAX_PROJECT_PAGES {
            let Some(url) = next.take() else {
                break;
            };
            let doc: Document<Vec<Resource>> = self.client.get(url).recv_json().await?;
            projects.extend(doc.data.into_iter().map(Entity::from));
            next = doc
                .links
                .next
                .map(Link::into_url)
                .filter(|url| !url.is_empty());
        }
        Ok(projects)
    }

    /// Search every accessible hub for a project whose name contains `query`.
    ///
    /// The match is case-insensitive. Hubs are searched in order and the first match wins. Errors
    /// are logged and reported as no match.
    pub async fn find_project(&self, query: &str) -> Option<ProjectMatch> {
        tracing::info!("searching globally for project: {query}");
        match self.try_find_project(query).await {
            Ok(found) => {
                if found.is_none() {
                    tracing::warn!("project '{query}' not found");
                }
                found
            }
            Err(err) => {
                tracing::error!("project search error: {err}");
                None
            }
        }
    }

    async fn try_find_project(&self, query: &str) -> Result<Option<ProjectMatch>, Error> {
        let hubs = self.hubs().await?;
        if hubs.is_empty() {
            tracing::error!("no hubs found");
            return Ok(None);
        }

        let needle = query.trim().to_lowercase();
        for hub in hubs {
            tracing::info!("searching hub: {}", hub.name);
            for project in self.projects(&hub.id, 50, &[]).await? {
                if project.name.to_lowercase().contains(&needle) {
                    tracing::info!("found: {}", project.name);
                    return Ok(Some(ProjectMatch {
                        hub_id: hub.id,
                        project_id: project.id,
                        name: project.name,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// The top-level folders of a project.
    pub async fn top_folders(&self, hub_id: &str, project_id: &str) -> Result<Vec<Folder>, Error> {
        let url = format!(
            "/project/v1/hubs/{}/projects/{}/topFolders",
            ensure_b_prefix(hub_id),
            ensure_b_prefix(project_id)
        );
        let doc: Document<Vec<Resource>> = self.client.get(url).recv_json().await?;
        Ok(doc
            .data
            .into_iter()
            .map(|res| Folder {
                id: res.id,
                name: res.attributes.display_name.unwrap_or_default(),
                ty: res.ty,
            })
            .collect())
    }

    /// The files and subfolders directly inside a folder.
    pub async fn folder_contents(
        &self,
        project_id: &str,
        folder_id: &str,
    ) -> Result<Vec<FolderEntry>, Error> {
        let url = format!(
            "/data/v1/projects/{}/folders/{}/contents",
            ensure_b_prefix(project_id),
            encode_urn(folder_id)
        );
        let doc: Document<Vec<Resource>> = self.client.get(url).recv_json().await?;
        Ok(doc.data.into_iter().map(FolderEntry::from).collect())
    }

    /// The ID of the `Project Files` folder of a project.
    ///
    /// Falls back to the first top-level folder if there is no folder with that name.
    pub async fn project_files_root(&self, hub_id: &str, project_id: &str) -> Result<String, Error> {
        let folders = self.top_folders(hub_id, project_id).await?;
        folders
            .iter()
            .find(|folder| folder.name.eq_ignore_ascii_case(PROJECT_FILES))
            .or_else(|| folders.first())
            .map(|folder| folder.id.clone())
            .ok_or_else(|| {
                Error::msg(format!("No top-level folders found in project {project_id}"))
            })
    }

    /// Search a project for files with the given extensions.
    ///
    /// `extensions` is a comma-separated list (e.g. `"rvt,ifc"`), matched case-insensitively.
    /// This is a breadth-first search starting from `Project Files`. It descends at most 3 levels
    /// and scans at most 50 folders. Folders which cannot be listed are skipped.
    pub async fn find_design_files(
        &self,
        hub_id: &str,
        project_id: &str,
        extensions: &str,
    ) -> Result<Vec<DesignFile>, Error> {
        tracing::info!("searching for files: {extensions}");
        let root = self
            .project_files_root(hub_id, project_id)
            .await
            .map_err(|err| Error::msg(format!("Failed to get top folders: {err}")))?;
        let suffixes = extensions
            .split(',')
            .map(|ext| format!(".{}", ext.trim().to_lowercase()))
            .collect::<Vec<_>>();

        let mut queue = VecDeque::from([(root, PROJECT_FILES.to_string(), 0)]);
        let mut matching = vec![];
        let mut scanned = 0;
        while scanned < SEARCH_MAX_FOLDERS {
            let Some((folder_id, path, depth)) = queue.pop_front() else {
                break;
            };
            scanned += 1;
            tracing::info!("scanning {scanned}/{SEARCH_MAX_FOLDERS} (depth {depth}): {path}");

            let contents = match self.folder_contents(project_id, &folder_id).await {
                Ok(contents) => contents,
                Err(err) => {
                    tracing::warn!("skipping folder {path}: {err}");
                    continue;
                }
            };
            for entry in contents {
                match entry.kind {
                    EntryKind::File => {
                        let name = entry.name.to_lowercase();
                        if suffixes.iter().any(|suffix| name.ends_with(suffix)) {
                            tracing::info!("found: {}", entry.name);
                            matching.push(DesignFile {
                                name: entry.name,
                                item_id: entry.id,
                                version_id: entry.tip_version_urn,
                                folder_path: path.clone(),
                            });
                        }
                    }
                    EntryKind::Folder if depth < SEARCH_MAX_DEPTH => {
                        queue.push_back((entry.id, format!("{path}/{}", entry.name), depth + 1));
                    }
                    _ => {}
                }
            }
        }

        tracing::info!(
            "search complete: {scanned} folders, {} files",
            matching.len()
        );
        Ok(matching)
    }

    /// Resolve a file name or URN to the lineage URN of a file in a project.
    ///
    /// Autodesk URNs are returned as-is. Anything else is treated as a file name and looked up in
    /// the project, preferring the file's own extension and then `rvt`, `dwg`, `nwc`, `rcp`,
    /// `ifc`, `nwd` in that order. A file matches if its name contains the identifier.
    pub async fn resolve_file_to_urn(
        &self,
        project_id: &str,
        identifier: &str,
    ) -> Result<String, Error> {
        if is_adsk_urn(identifier) {
            tracing::info!("identifier is already a URN");
            return Ok(identifier.to_string());
        }
        tracing::info!("searching for filename: {identifier}");

        let Some(hub_id) = self.hub_id().await? else {
            bail!("Could not determine hub_id for file search");
        };

        let target = identifier.to_lowercase();
        let mut extensions = DESIGN_EXTENSIONS.to_vec();
        if let Some((_, ext)) = target.rsplit_once('.') {
            if let Some(pos) = extensions.iter().position(|candidate| *candidate == ext) {
                let preferred = extensions.remove(pos);
                extensions.insert(0, preferred);
            }
        }

        let files = match self
            .find_design_files(&hub_id, project_id, &DESIGN_EXTENSIONS.join(","))
            .await
        {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!("file search failed: {err}");
                vec![]
            }
        };
        for ext in extensions {
            let suffix = format!(".{ext}");
            let found = files.iter().find(|file| {
                let name = file.name.to_lowercase();
                name.ends_with(&suffix) && name.contains(&target)
            });
            if let Some(file) = found {
                tracing::info!("resolved to: {}", file.item_id);
                return Ok(file.item_id.clone());
            }
        }

        bail!("Could not find file matching '{identifier}' in project")
    }

    /// Resolve a lineage URN to the URN of its latest version.
    ///
    /// Version URNs are returned as-is. Errors are logged and reported as [`None`].
    pub async fn latest_version_urn(&self, project_id: &str, item_id: &str) -> Option<String> {
        if is_version_urn(item_id) {
            tracing::info!("already a version URN: {item_id}");
            return Some(item_id.to_string());
        }

        let url = format!(
            "/data/v1/projects/{}/items/{}",
            ensure_b_prefix(project_id),
            encode_urn(item_id)
        );
        match self.client.get(url).recv_json::<Document<Resource>>().await {
            Ok(doc) => {
                let tip = doc.data.relationships.tip();
                match &tip {
                    Some(tip) => tracing::info!("resolved to version: {tip}"),
                    None => tracing::warn!("no tip version found in item relationships"),
                }
                tip
            }
            Err(err) => {
                tracing::error!("version resolution error: {err}");
                None
            }
        }
    }

    /// Create a subfolder, returning the ID of the new folder.
    pub async fn create_folder(
        &self,
        project_id: &str,
        parent_folder_id: &str,
        name: &str,
    ) -> Result<String, Error> {
        let body = json!({
            "jsonapi": { "version": "1.0" },
            "data": {
                "type": "folders",
                "attributes": {
                    "name": name,
                    "extension": {
                        "type": "folders:autodesk.bim360:Folder",
                        "version": "1.0",
                    },
                },
                "relationships": {
                    "parent": {
                        "data": { "type": "folders", "id": parent_folder_id },
                    },
                },
            },
        });
        let url = format!("/data/v1/projects/{}/folders", ensure_b_prefix(project_id));
        let doc: Document<Value> = self
            .client
            .post(url)
            .header("Content-Type", "application/vnd.api+json")
            .json(body)
            .recv_json()
            .await?;
        doc.data["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::msg("folder creation response has no ID"))
    }

    /// Copy the folder structure (but not the files) of one project into another.
    ///
    /// Both projects must be in the same hub. Copying starts at `Project Files` and descends at
    /// most `max_depth` levels. Folders which cannot be created are skipped, along with their
    /// subfolders.
    pub async fn replicate_folders(
        &self,
        hub_id: &str,
        source_project_id: &str,
        dest_project_id: &str,
        max_depth: usize,
    ) -> Result<String, Error> {
        let source_root = self.project_files_root(hub_id, source_project_id).await?;
        let dest_root = self.project_files_root(hub_id, dest_project_id).await?;
        tracing::info!("copying folder structure from {source_project_id} to {dest_project_id}");

        // Folders waiting to be created, as (source folder, destination parent, path, depth).
        // Each folder is copied in full before its next sibling.
        let mut pending = self
            .subfolders(source_project_id, &source_root, PROJECT_FILES)
            .await
            .into_iter()
            .rev()
            .map(|entry| (entry, dest_root.clone(), PROJECT_FILES.to_string(), 0))
            .collect::<Vec<_>>();
        let mut count = 0;
        while let Some((entry, parent, path, depth)) = pending.pop() {
            let name = if entry.name.is_empty() {
                "Unnamed".to_string()
            } else {
                entry.name
            };
            let full_path = format!("{path}/{name}");
            let created = match self.create_folder(dest_project_id, &parent, &name).await {
                Ok(created) => created,
                Err(err) => {
                    tracing::warn!("failed to create '{full_path}': {err}");
                    continue;
                }
            };
            count += 1;
            tracing::info!("created: {full_path}");

            if depth < max_depth {
                let children = self
                    .subfolders(source_project_id, &entry.id, &full_path)
                    .await;
                pending.extend(
                    children
                        .into_iter()
                        .rev()
                        .map(|child| (child, created.clone(), full_path.clone(), depth + 1)),
                );
            }
        }

        tracing::info!("done, {count} folders created");
        Ok(format!(
            "Successfully copied {count} folders from source to destination."
        ))
    }

    /// The folders directly inside a folder. Errors are logged and treated as an empty folder.
    async fn subfolders(&self, project_id: &str, folder_id: &str, path: &str) -> Vec<FolderEntry> {
        match self.folder_contents(project_id, folder_id).await {
            Ok(contents) => contents
                .into_iter()
                .filter(|entry| entry.kind == EntryKind::Folder)
                .collect(),
            Err(err) => {
                tracing::warn!("could not read source folder {path}: {err}");
                vec![]
            }
        }
    }

    /// Hide a folder directly under `Project Files`, found by case-insensitive name.
    pub async fn soft_delete_folder(
        &self,
        hub_id: &str,
        project_id: &str,
        folder_name: &str,
    ) -> Result<String, Error> {
        let root = self.project_files_root(hub_id, project_id).await?;
        let contents = self
            .folder_contents(project_id, &root)
            .await
            .map_err(|err| Error::msg(format!("Could not read folder contents: {err}")))?;

        let target = folder_name.trim().to_lowercase();
        let Some(folder) = contents.into_iter().find(|entry| {
            entry.kind == EntryKind::Folder && entry.name.trim().to_lowercase() == target
        }) else {
            return Ok(format!(
                "Folder '{folder_name}' not found under Project Files."
            ));
        };

        let url = format!(
            "/data/v1/projects/{}/folders/{}",
            ensure_b_prefix(project_id),
            encode_urn(&folder.id)
        );
        let body = json!({
            "jsonapi": { "version": "1.0" },
            "data": {
                "type": "folders",
                "id": folder.id,
                "attributes": { "hidden": true },
            },
        });
        self.client
            .patch(url)
            .header("Content-Type", "application/vnd.api+json")
            .json(body)
            .send()
            .await?;

        let name = folder.name.trim();
        tracing::info!("folder '{name}' hidden in project {project_id}");
        Ok(format!("Successfully deleted folder '{name}'."))
    }
}
