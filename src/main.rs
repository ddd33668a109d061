use std::sync::Arc;

use tracing::{error, info};

use coldsnap::config::Config;
use coldsnap::engine::Engine;
use coldsnap::env::{Clock, SystemClock};
use coldsnap::sim::{SimEnvironment, SimParams};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = match Config::load(None) {
        Ok(config) => config,
        Err(e) => {
            error!("cannot load configuration: {e}");
            std::process::exit(1);
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let env = SimEnvironment::new(clock.clone(), SimParams::default());
    let mut engine = Engine::new(env, config, clock);

    info!("campaign engine starting (simulated environment)");
    match engine.run().await {
        Ok(()) => info!("engine stopped cleanly"),
        Err(e) => error!("engine stopped: {e}"),
    }
}
