use crate::cli::ShowGraphArgs;
use crate::config::PartialRunConfig;
use crate::error::Result;
use cvflow::engine::registry::ActionRegistry;
use cvflow::workflows::session::Session;
use std::path::Path;
use tracing::info;

pub fn run(args: ShowGraphArgs) -> Result<()> {
    let base = args.config.parent().unwrap_or(Path::new("."));
    let config = PartialRunConfig::from_file(&args.config)?.resolve(base, true)?;
    let registry = ActionRegistry::with_builtins();
    let session = Session::new(&registry, config.engine, &config.actions, config.structures)?;

    let chart = session.graph().to_mermaid(args.force);
    match &args.out {
        Some(path) => {
            info!("Writing flowchart to {:?}", path);
            std::fs::write(path, chart)?;
        }
        None => print!("{chart}"),
    }
    Ok(())
}
