use kiln_host::clock::StdClock;
use kiln_host::{KilnHardware, KilnOs};
use kiln_shared::config::{self, KilnConfig};
use kiln_shared::Clock;
use kiln_simulator::{FirstOrderPlant, SimProbe, SimSwitch};
use std::env;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting Bisque kiln controller");

    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 1 { &args[1] } else { "kiln.toml" };

    let config = match config::load_config(config_path) {
        Ok(config) => config,
        Err(config::ConfigError::Io(_)) => {
            tracing::warn!("no config at '{}', using defaults", config_path);
            KilnConfig::default()
        }
        Err(e) => {
            tracing::error!("failed to load config from '{}': {}", config_path, e);
            return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>);
        }
    };

    tracing::info!(
        driver = %config.hardware.driver,
        data_dir = %config.storage.data_dir,
        "configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(StdClock::new());
    let hardware = match config.hardware.driver.as_str() {
        "sim" => sim_hardware(clock.clone()),
        other => {
            tracing::error!("unknown hardware driver '{}'", other);
            return Err(format!("unknown hardware driver '{other}'").into());
        }
    };

    let mut kiln = KilnOs::new(config, hardware)?;
    kiln.start();
    tracing::info!("kiln controller ready");

    tokio::signal::ctrl_c().await?;
    kiln.shutdown();
    Ok(())
}

/// Wire the controller to the built-in plant model: the simulated probe
/// reads the plant, and a stepper task integrates it against the real
/// SSR line the supervisor drives.
fn sim_hardware(clock: Arc<dyn Clock>) -> KilnHardware {
    let plant = Arc::new(Mutex::new(FirstOrderPlant::new(20.0)));
    let probe = SimProbe::new(plant.clone());
    let ssr = SimSwitch::new("ssr");
    let ssr_level = ssr.level_handle();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(250));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let drive = if ssr_level.load(std::sync::atomic::Ordering::SeqCst) {
                1.0
            } else {
                0.0
            };
            plant
                .lock()
                .expect("plant lock poisoned")
                .step(drive, 0.25);
        }
    });

    KilnHardware {
        probe: Box::new(probe),
        ssr: Box::new(ssr),
        vent: Some(Box::new(SimSwitch::new("vent"))),
        alarm: Some(Box::new(SimSwitch::new("alarm"))),
        clock,
    }
}
