use anyhow::Error;
use aps::{init_logging, Aps};
use clap::Parser;
use std::sync::Arc;

mod mcp;
mod test_runner;
mod tools;

/// Serve the Autodesk ACC agent tools over MCP.
#[derive(Clone, Debug, Parser)]
struct Options {
    /// The port where the app should be served.
    #[clap(short, long, env = "PORT", default_value = "8000")]
    port: u16,

    /// The interface to listen on.
    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[clap(flatten)]
    aps: aps::Options,
}

impl Options {
    async fn serve(self) -> Result<(), Error> {
        let aps = Aps::new(&self.aps)?;
        let app = mcp::app(Arc::new(aps));
        let addr = format!("{}:{}", self.host, self.port);
        tracing::info!("starting MCP server on {addr}");
        app.listen(addr).await?;
        Ok(())
    }
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    init_logging();
    Options::parse().serve().await
}

#[cfg(test)]
mod test {
    use std::{fs, path::Path};

    #[test]
    fn test_build_image_toolchain() {
        let dockerfile =
            fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join("../Dockerfile"))
                .unwrap();
        let image = dockerfile
            .lines()
            .find_map(|line| line.strip_prefix("FROM rust:"))
            .unwrap();
        let version = image.split(['-', ' ']).next().unwrap();
        assert_eq!(version, env!("CARGO_PKG_RUST_VERSION"));
    }
}
