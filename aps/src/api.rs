use crate::{
    auth::{Credentials, DEFAULT_SCOPES},
    client::Client,
};
use anyhow::Error;
use async_std::sync::Mutex;
use clap::Args;
use surf::Url;

/// Options for connecting to Autodesk Platform Services.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Client ID of the APS application.
    #[clap(long, env = "APS_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Client secret of the APS application.
    #[clap(long, env = "APS_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// OAuth scopes to request, separated by spaces.
    #[clap(long, env = "APS_SCOPES", default_value = DEFAULT_SCOPES)]
    pub scopes: String,

    /// Root URL of the APS API.
    #[clap(
        long,
        env = "APS_BASE_URL",
        default_value = "https://developer.api.autodesk.com"
    )]
    pub base_url: Url,

    /// Data region sent in the `x-ads-region` header.
    #[clap(long, env = "APS_REGION", default_value = "EMEA")]
    pub region: String,

    /// Email of the account admin on whose behalf projects are created and users are added.
    #[clap(long, env = "ACC_ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    /// Admin email to fall back to during local development, when `ACC_ADMIN_EMAIL` is unset.
    ///
    /// Ignored in hosted environments, where a missing admin email is always an error.
    #[clap(long, env = "ACC_DEV_ADMIN_EMAIL")]
    pub dev_admin_email: Option<String>,

    /// Set by Azure App Service. Its presence marks a hosted environment.
    #[clap(long, env = "WEBSITE_SITE_NAME", hide = true)]
    pub website_site_name: Option<String>,

    /// Set by Azure Functions. Its presence marks a hosted environment.
    #[clap(long, env = "FUNCTIONS_WORKER_RUNTIME", hide = true)]
    pub functions_worker_runtime: Option<String>,
}

impl Options {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: self.scopes.clone(),
        }
    }

    /// Are we running in a hosted (Azure App Service or Functions) environment?
    pub fn is_hosted(&self) -> bool {
        self.website_site_name.is_some() || self.functions_worker_runtime.is_some()
    }
}

/// Entry point for all APS operations.
///
/// The operations themselves are spread across the [`data`](crate::data),
/// [`derivative`](crate::derivative) and [`admin`](crate::admin) modules.
pub struct Aps {
    pub(crate) client: Client,
    pub(crate) admin_email: Option<String>,
    pub(crate) dev_admin_email: Option<String>,
    pub(crate) hosted: bool,
    pub(crate) hub: Mutex<Option<String>>,
}

impl Aps {
    pub fn new(opt: &Options) -> Result<Self, Error> {
        Ok(Self {
            client: Client::new(opt.base_url.clone(), opt.region.clone(), opt.credentials())?,
            admin_email: opt.admin_email.clone(),
            dev_admin_email: opt.dev_admin_email.clone(),
            hosted: opt.is_hosted(),
            hub: Mutex::new(None),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Make sure we can obtain an access token with the configured credentials.
    pub async fn authenticate(&self) -> Result<(), Error> {
        self.client.tokens().token(false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cli {
        #[clap(flatten)]
        aps: Options,
    }

    #[test]
    fn test_hosted_detection() {
        let opt = Cli::try_parse_from(["server", "--website-site-name", "acc-agent"])
            .unwrap()
            .aps;
        assert!(opt.is_hosted());

        let opt = Cli::try_parse_from(["server", "--functions-worker-runtime", "python"])
            .unwrap()
            .aps;
        assert!(opt.is_hosted());
    }
}
