//! Translation status, translation jobs and metadata scans via the Model Derivative API.

use crate::{
    ids::{is_lineage_urn, is_version_urn, safe_b64encode},
    scan, Aps,
};
use anyhow::{bail, Error};
use serde::Deserialize;
use serde_json::{json, Value};
use surf::http::StatusCode;

/// The translation manifest of a model.
#[derive(Clone, Debug, Default, Deserialize)]
struct Manifest {
    status: Option<String>,
    progress: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
struct MetadataResponse {
    data: Metadata,
}

#[derive(Clone, Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    metadata: Vec<View>,
}

#[derive(Clone, Debug, Deserialize)]
struct View {
    guid: String,
}

#[derive(Clone, Debug, Deserialize)]
struct JobResponse {
    result: Option<String>,
}

/// Describe the translation status from a manifest.
fn describe_manifest(manifest: &Manifest) -> String {
    let status = manifest
        .status
        .as_deref()
        .unwrap_or("unknown")
        .to_lowercase();
    let progress = match &manifest.progress {
        Some(Value::String(progress)) => progress.clone(),
        Some(progress) => progress.to_string(),
        None => "unknown".to_string(),
    };
    match status.as_str() {
        "success" => {
            format!("Ready for Extraction (translation complete, progress: {progress})")
        }
        "inprogress" => format!("Processing (translation {progress}% complete)"),
        "failed" => "Translation Failed — check file format or try re-uploading".to_string(),
        "timeout" => "Translation Timeout — file may be too large or complex".to_string(),
        _ => format!("Status: {status} (progress: {progress})"),
    }
}

impl Aps {
    /// Report the translation status of a file.
    ///
    /// `file_id` may be a file name, a lineage URN or a version URN.
    pub async fn inspect_file(&self, project_id: &str, file_id: &str) -> Result<String, Error> {
        tracing::info!("inspecting: {file_id}");
        let resolved = self.resolve_file_to_urn(project_id, file_id).await?;

        let version_urn = if is_lineage_urn(&resolved) {
            match self.latest_version_urn(project_id, &resolved).await {
                Some(urn) => urn,
                None => bail!("Could not resolve lineage URN to version URN."),
            }
        } else if is_version_urn(&resolved) {
            resolved
        } else {
            self.latest_version_urn(project_id, &resolved)
                .await
                .unwrap_or(resolved)
        };

        let url = format!(
            "/modelderivative/v2/designdata/{}/manifest",
            safe_b64encode(&version_urn)
        );
        let mut res = self.client.get(url).send().await?;
        if res.status() == StatusCode::Accepted {
            return Ok("Processing — translation in progress.".to_string());
        }
        let manifest: Manifest = res.body_json().await.map_err(Error::msg)?;
        Ok(describe_manifest(&manifest))
    }

    /// The GUID of the first viewable in a translated model.
    pub async fn view_guid(&self, version_urn: &str) -> Result<String, Error> {
        let url = format!(
            "/modelderivative/v2/designdata/{}/metadata",
            safe_b64encode(version_urn)
        );
        let res: MetadataResponse = self.client.get(url).recv_json().await?;
        let Some(view) = res.data.metadata.into_iter().next() else {
            bail!("No views found in model metadata.");
        };
        tracing::info!("view GUID: {}", view.guid);
        Ok(view.guid)
    }

    /// Start a fresh SVF translation of a model version.
    ///
    /// Existing derivatives are overwritten, which is the way to recover from a partial or failed
    /// translation. Returns the job status reported by APS.
    pub async fn trigger_translation(&self, version_urn: &str) -> Result<String, Error> {
        tracing::info!("starting translation job for: {version_urn}");
        let body = json!({
            "input": { "urn": safe_b64encode(version_urn) },
            "output": {
                "formats": [{ "type": "svf", "views": ["2d", "3d"] }],
            },
        });
        let res: JobResponse = self
            .client
            .post("/modelderivative/v2/designdata/job")
            .header("x-ads-force", "true")
            .json(body)
            .recv_json()
            .await?;
        let result = res.result.unwrap_or_else(|| "unknown".to_string());
        tracing::info!("job submitted: {result}");
        Ok(result)
    }

    /// Count the elements of a model version whose properties mention `category`.
    ///
    /// The object tree of the model's first view is streamed and scanned without being loaded
    /// into memory, so this works on models of any size. See [`scan`](crate::scan).
    pub async fn count_elements(&self, version_urn: &str, category: &str) -> Result<u64, Error> {
        tracing::info!(
            terms = ?scan::search_terms(category),
            "counting elements: {category}"
        );
        let guid = self.view_guid(version_urn).await?;
        let url = format!(
            "/modelderivative/v2/designdata/{}/metadata/{guid}",
            safe_b64encode(version_urn)
        );
        let mut res = self.client.get(url).streaming().send().await?;
        let count = scan::count_matches(res.take_body().into_reader(), category)
            .await
            .map_err(|err| Error::msg(format!("Error streaming metadata: {err}")))?;
        tracing::info!("found {count} elements matching '{category}'");
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{fixtures, MockAps};

    fn manifest(status: &str, progress: Value) -> Manifest {
        Manifest {
            status: Some(status.into()),
            progress: Some(progress),
        }
    }

    #[test]
    fn test_describe_manifest() {
        assert_eq!(
            describe_manifest(&manifest("success", json!("complete"))),
            "Ready for Extraction (translation complete, progress: complete)"
        );
        assert_eq!(
            describe_manifest(&manifest("inprogress", json!("42"))),
            "Processing (translation 42% complete)"
        );
        assert_eq!(
            describe_manifest(&manifest("FAILED", json!("complete"))),
            "Translation Failed — check file format or try re-uploading"
        );
        assert_eq!(
            describe_manifest(&manifest("timeout", json!("0%"))),
            "Translation Timeout — file may be too large or complex"
        );
        assert_eq!(
            describe_manifest(&manifest("pending", json!(0))),
            "Status: pending (progress: 0)"
        );
        assert_eq!(
            describe_manifest(&Manifest::default()),
            "Status: unknown (progress: unknown)"
        );
    }

    #[async_std::test]
    async fn test_inspect_file() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        // By name, lineage and version.
        for file in [
            "Tower.rvt",
            fixtures::TOWER_LINEAGE,
            fixtures::TOWER_VERSION,
        ] {
            assert_eq!(
                aps.inspect_file(fixtures::PROJECT, file).await.unwrap(),
                "Ready for Extraction (translation complete, progress: complete)"
            );
        }

        assert_eq!(
            aps.inspect_file(fixtures::PROJECT, "Site Plan.dwg")
                .await
                .unwrap(),
            "Processing — translation in progress."
        );
        assert_eq!(
            aps.inspect_file(fixtures::PROJECT, "Bridge.ifc")
                .await
                .unwrap(),
            "Translation Failed — check file format or try re-uploading"
        );
    }

    #[async_std::test]
    async fn test_inspect_file_errors() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        let err = aps
            .inspect_file(fixtures::PROJECT, "urn:adsk.wipprod:dm.lineage:gone")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not resolve lineage URN to version URN."
        );

        // Never translated.
        let err = aps
            .inspect_file(fixtures::PROJECT, "Tower v1.rvt")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Autodesk API Error 404"), "{err}");
    }

    #[async_std::test]
    async fn test_view_guid() {
        let mock = MockAps::start().await;
        let aps = mock.aps();
        assert_eq!(
            aps.view_guid(fixtures::TOWER_VERSION).await.unwrap(),
            fixtures::TOWER_VIEW
        );

        // Translated, but without any views.
        let err = aps.view_guid(fixtures::SITE_VERSION).await.unwrap_err();
        assert_eq!(err.to_string(), "No views found in model metadata.");
    }

    #[async_std::test]
    async fn test_trigger_translation() {
        let mock = MockAps::start().await;
        let aps = mock.aps();
        assert_eq!(
            aps.trigger_translation(fixtures::TOWER_VERSION)
                .await
                .unwrap(),
            "created"
        );

        let jobs = mock.translation_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["input"]["urn"], safe_b64encode(fixtures::TOWER_VERSION));
        assert_eq!(jobs[0]["output"]["formats"][0]["type"], "svf");
        assert_eq!(jobs[0]["output"]["formats"][0]["views"], json!(["2d", "3d"]));
    }

    #[async_std::test]
    async fn test_count_elements() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        assert_eq!(
            aps.count_elements(fixtures::TOWER_VERSION, "Walls")
                .await
                .unwrap(),
            fixtures::TOWER_WALLS
        );
        assert_eq!(
            aps.count_elements(fixtures::TOWER_VERSION, "doors")
                .await
                .unwrap(),
            fixtures::TOWER_DOORS
        );
        assert_eq!(
            aps.count_elements(fixtures::TOWER_VERSION, "Stairs")
                .await
                .unwrap(),
            0
        );
    }
}
