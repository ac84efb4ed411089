//! Projects and users, via the ACC Account Admin API.
//!
//! Write operations in this API act on behalf of a user, identified by the `User-Id` header. We
//! use the account admin configured with `ACC_ADMIN_EMAIL`.

use crate::{ids::strip_b_prefix, Aps};
use anyhow::{bail, Error};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use strum::{Display, EnumString};

/// Upper bound on pages fetched when listing the users of a project.
const MAX_USER_PAGES: usize = 5;

/// The platform on which a project is created.
#[derive(Clone, Copy, Debug, Default, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Platform {
    Acc,
    #[default]
    Bim360,
}

impl Platform {
    /// Interpret a user-supplied project type. Anything but `ACC` means BIM 360.
    pub fn from_project_type(project_type: &str) -> Self {
        project_type.trim().parse().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Deserialize)]
struct User {
    id: Option<String>,
}

/// A member of a project.
#[derive(Clone, Debug, Deserialize)]
pub struct ProjectUser {
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub products: Vec<Product>,
}

/// A product (e.g. Docs, Build) to which a project member has access.
#[derive(Clone, Debug, Deserialize)]
pub struct Product {
    pub key: Option<String>,
    pub access: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    results: Vec<ProjectUser>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct Pagination {
    #[serde(rename = "nextUrl")]
    next_url: Option<String>,
}

/// A user of a hub, with their product entitlements across all of the projects in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubUser {
    pub email: String,
    pub name: String,
    pub products: Vec<String>,
}

impl Aps {
    /// The Autodesk user ID for an email address.
    pub async fn user_id_by_email(&self, account_id: &str, email: &str) -> Result<String, Error> {
        let url = format!(
            "/hq/v1/regions/eu/accounts/{account_id}/users/search?email={}",
            urlencoding::encode(email)
        );
        let users: Vec<User> = self.client.get(url).recv_json().await?;
        let Some(user) = users.into_iter().next() else {
            bail!("Could not find an Autodesk user with email: {email}");
        };
        user.id.ok_or_else(|| {
            Error::msg(format!(
                "Autodesk returned a user for {email}, but the 'id' field is missing."
            ))
        })
    }

    /// The user ID of the account admin, on whose behalf admin operations are performed.
    pub async fn admin_user_id(&self, account_id: &str) -> Result<String, Error> {
        let email = match (&self.admin_email, &self.dev_admin_email) {
            (Some(email), _) => email,
            (None, _) if self.hosted => bail!(
                "CRITICAL: ACC_ADMIN_EMAIL environment variable is missing in production \
                 environment."
            ),
            (None, Some(email)) => {
                tracing::warn!("ACC_ADMIN_EMAIL missing, using local development admin {email}");
                email
            }
            (None, None) => bail!("ACC_ADMIN_EMAIL environment variable is missing."),
        };
        self.user_id_by_email(account_id, email).await
    }

    /// Create a project in a hub, returning the ID of the new project.
    pub async fn create_project(
        &self,
        hub_id: &str,
        name: &str,
        platform: Platform,
    ) -> Result<Option<String>, Error> {
        let account_id = strip_b_prefix(hub_id);
        let user_id = self.admin_user_id(account_id).await?;

        tracing::info!(%platform, "creating project '{name}' as {user_id}");
        let res: Value = self
            .client
            .post(format!(
                "/construction/admin/v1/accounts/{account_id}/projects"
            ))
            .header("User-Id", user_id)
            .json(json!({
                "name": name,
                "type": "Office",
                "platform": platform.to_string(),
            }))
            .recv_json()
            .await?;
        tracing::info!("project creation succeeded");

        Ok(res
            .get("id")
            .or_else(|| res.pointer("/data/id"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    /// List the members of a project (up to 5 pages).
    pub async fn project_users(&self, project_id: &str) -> Result<Vec<ProjectUser>, Error> {
        let mut next = Some(format!(
            "/construction/admin/v1/projects/{}/users",
            strip_b_prefix(project_id)
        ));
        let mut users = vec![];
        for _ in 0..MAX_USER_PAGES {
            let Some(url) = next.take() else {
                break;
            };
            let page: UsersPage = self.client.get(url).recv_json().await?;
            users.extend(page.results);
            next = page.pagination.next_url.filter(|url| !url.is_empty());
        }
        Ok(users)
    }

    /// Add a user to a project, with administrator access to each of `products`.
    pub async fn add_project_user(
        &self,
        hub_id: &str,
        project_id: &str,
        email: &str,
        products: &[String],
    ) -> Result<Value, Error> {
        let account_id = strip_b_prefix(hub_id);
        let user_id = self.admin_user_id(account_id).await?;
        let products = products
            .iter()
            .map(|key| json!({ "key": key, "access": "administrator" }))
            .collect::<Vec<_>>();

        self.client
            .post(format!(
                "/construction/admin/v1/projects/{}/users",
                strip_b_prefix(project_id)
            ))
            .header("User-Id", user_id)
            .json(json!({ "email": email, "products": products }))
            .recv_json()
            .await
    }

    /// Audit the users of a hub.
    ///
    /// Scans the members of the first `max_projects` projects and merges them by email, collecting
    /// the products each user has access to in any project. Projects whose members cannot be
    /// listed are skipped. The result is sorted by email.
    pub async fn hub_users(&self, hub_id: &str, max_projects: usize) -> Result<Vec<HubUser>, Error> {
        let mut projects = self.projects(hub_id, 50, &[]).await?;
        projects.truncate(max_projects);
        tracing::info!("scanning {} projects in hub {hub_id}", projects.len());

        let mut users: BTreeMap<String, (String, BTreeSet<String>)> = BTreeMap::new();
        for project in &projects {
            let members = match self.project_users(&project.id).await {
                Ok(members) => members,
                Err(err) => {
                    tracing::warn!("skipping project '{}': {err}", project.name);
                    continue;
                }
            };
            for member in members {
                let email = member.email.unwrap_or_default().to_lowercase();
                if email.is_empty() {
                    continue;
                }
                let (_, products) = users.entry(email.clone()).or_insert_with(|| {
                    (member.name.unwrap_or_else(|| email.clone()), BTreeSet::new())
                });
                products.extend(
                    member
                        .products
                        .into_iter()
                        .filter_map(|product| product.key)
                        .filter(|key| !key.is_empty()),
                );
            }
        }

        tracing::info!(
            "found {} unique users across {} projects",
            users.len(),
            projects.len()
        );
        Ok(users
            .into_iter()
            .map(|(email, (name, products))| HubUser {
                email,
                name,
                products: products.into_iter().collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{fixtures, MockAps};

    #[test]
    fn test_platform() {
        assert_eq!(Platform::from_project_type("ACC"), Platform::Acc);
        assert_eq!(Platform::from_project_type(" acc "), Platform::Acc);
        assert_eq!(Platform::from_project_type("BIM360"), Platform::Bim360);
        assert_eq!(Platform::from_project_type("anything"), Platform::Bim360);
        assert_eq!(Platform::Acc.to_string(), "acc");
        assert_eq!(Platform::Bim360.to_string(), "bim360");
    }

    #[async_std::test]
    async fn test_user_id_by_email() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        assert_eq!(
            aps.user_id_by_email(fixtures::ACCOUNT, fixtures::ADMIN_EMAIL)
                .await
                .unwrap(),
            fixtures::ADMIN_USER_ID
        );

        let err = aps
            .user_id_by_email(fixtures::ACCOUNT, "nobody@example.com")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find an Autodesk user with email: nobody@example.com"
        );
    }

    #[async_std::test]
    async fn test_admin_user_id_fallback() {
        let mock = MockAps::start().await;

        let mut opt = mock.options();
        opt.admin_email = None;
        let aps = Aps::new(&opt).unwrap();
        let err = aps.admin_user_id(fixtures::ACCOUNT).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "ACC_ADMIN_EMAIL environment variable is missing."
        );

        opt.dev_admin_email = Some(fixtures::ADMIN_EMAIL.into());
        let aps = Aps::new(&opt).unwrap();
        assert_eq!(
            aps.admin_user_id(fixtures::ACCOUNT).await.unwrap(),
            fixtures::ADMIN_USER_ID
        );

        // Hosted environments never fall back.
        for (site, runtime) in [(Some("acc-agent"), None), (None, Some("python"))] {
            opt.website_site_name = site.map(String::from);
            opt.functions_worker_runtime = runtime.map(String::from);
            assert!(opt.is_hosted());
            let aps = Aps::new(&opt).unwrap();
            let err = aps.admin_user_id(fixtures::ACCOUNT).await.unwrap_err();
            assert!(err.to_string().starts_with("CRITICAL"), "{err}");
        }
    }

    #[async_std::test]
    async fn test_hosted_admin_email() {
        let mock = MockAps::start().await;
        let mut opt = mock.options();
        opt.website_site_name = Some("acc-agent".into());
        let aps = Aps::new(&opt).unwrap();
        // A configured admin email is used as usual.
        assert_eq!(
            aps.admin_user_id(fixtures::ACCOUNT).await.unwrap(),
            fixtures::ADMIN_USER_ID
        );
    }

    #[async_std::test]
    async fn test_create_project() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        let id = aps
            .create_project(fixtures::HUB, "New Tower", Platform::Acc)
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("proj-new"));

        let created = mock.created_projects().await;
        assert_eq!(created.len(), 1);
        let (user_id, body) = &created[0];
        assert_eq!(user_id, fixtures::ADMIN_USER_ID);
        assert_eq!(
            *body,
            json!({ "name": "New Tower", "type": "Office", "platform": "acc" })
        );
    }

    #[async_std::test]
    async fn test_project_users_pagination() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        let users = aps.project_users(fixtures::PROJECT).await.unwrap();
        let emails = users
            .iter()
            .map(|user| user.email.as_deref().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(
            emails,
            ["Jane@Acme.test", "bob@acme.test", "carol@acme.test"]
        );
    }

    #[async_std::test]
    async fn test_project_user_pages_are_capped() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        let users = aps.project_users(fixtures::ENDLESS_PROJECT).await.unwrap();
        assert_eq!(users.len(), MAX_USER_PAGES);
        assert_eq!(users[4].email.as_deref(), Some("user4@acme.test"));
        assert_eq!(mock.user_pages(), MAX_USER_PAGES);
    }

    #[async_std::test]
    async fn test_add_project_user() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        aps.add_project_user(
            fixtures::HUB,
            fixtures::PROJECT,
            "new@acme.test",
            &["docs".into(), "build".into()],
        )
        .await
        .unwrap();

        let added = mock.added_users().await;
        assert_eq!(added.len(), 1);
        let (user_id, body) = &added[0];
        assert_eq!(user_id, fixtures::ADMIN_USER_ID);
        assert_eq!(
            *body,
            json!({
                "email": "new@acme.test",
                "products": [
                    { "key": "docs", "access": "administrator" },
                    { "key": "build", "access": "administrator" },
                ],
            })
        );
    }

    #[async_std::test]
    async fn test_hub_users() {
        let mock = MockAps::start().await;
        let aps = mock.aps();

        let users = aps.hub_users(fixtures::HUB, 20).await.unwrap();
        assert_eq!(
            users,
            [
                HubUser {
                    email: "bob@acme.test".into(),
                    name: "Bob".into(),
                    products: vec!["docs".into()],
                },
                HubUser {
                    email: "carol@acme.test".into(),
                    name: "carol@acme.test".into(),
                    products: vec!["build".into(), "docs".into()],
                },
                HubUser {
                    email: "jane@acme.test".into(),
                    name: "Jane".into(),
                    products: vec!["build".into(), "docs".into(), "insight".into()],
                },
            ]
        );

        // Only the first project.
        let users = aps.hub_users(fixtures::HUB, 1).await.unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[2].products, ["build", "docs"]);
    }
}
