use refresh_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, port: Option<u16>, start: bool) -> anyhow::Result<()> {
    let config = Config::load(root)?;
    let port = port.unwrap_or(config.server.port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(refresh_server::serve(root.to_path_buf(), port, start))
}
