use daas_config::load_config;
use daas_config::shared::AgentConfig;
use daas_telemetry::init_tracing;

mod core;

fn main() -> anyhow::Result<()> {
    let agent_config = load_config::<AgentConfig>()?;
    agent_config.validate()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(core::start_agent_with_config(agent_config))?;

    Ok(())
}
