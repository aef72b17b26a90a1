use clap::Parser;

fn main() -> anyhow::Result<()> {
    let options = weather_producer::CliOptions::parse();

    let subscriber =
        weather_producer::tracing::get_tracing_subscriber("info", options.log_format);
    weather_producer::tracing::init_subscriber(subscriber);

    let settings = weather_producer::Settings::load(&options).map_err(|error| {
        tracing::error!("FATAL: failed to load settings: {error}");
        error
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let outcome = runtime.block_on(async {
        let agent = match weather_producer::Agent::build(&settings).await {
            Ok(agent) => agent,
            Err(error) => {
                tracing::error!("FATAL: {error}");
                return Err(anyhow::anyhow!("agent failed to start: {error}"));
            },
        };

        agent.run_until_stopped().await;
        Ok(())
    });

    // a send abandoned at its deadline must not keep the process alive
    runtime.shutdown_timeout(settings.bus.close_timeout);
    outcome
}
