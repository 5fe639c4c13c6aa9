use anyhow::Context;

use bridge_disease::startup::create_app;
use bridge_disease::startup::engine::Engine;
use bridge_disease::startup::prepare::prepare_listener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging, configuration, route groups and the database binding
    let app = create_app().context("Failed to start the bridge disease backend")?;

    // From here on, request handlers log into the same session
    app.log_session().install_global()?;

    let listener = prepare_listener(app.settings()).context("Failed to bind listener")?;
    tracing::info!(address = ?listener.local_addr()?, "Accepting connections");

    Engine::build(app, listener)?.spinup().await?;
    Ok(())
}
