use std::path::Path;

use task_api_core::config::ConfigSource;

pub fn run(config: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let source = ConfigSource::new(config);
    rt.block_on(task_api_server::serve(source, port))
}
