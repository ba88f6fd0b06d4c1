use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let cfg = config::Config::load();
    tracing::info!(
        camera = %cfg.camera_device,
        db = %cfg.db_path.display(),
        device = %cfg.device_address,
        "configuration resolved"
    );

    let (engine, tracker) = engine::spawn_engine(cfg)?;
    let service = dbus_interface::AttendanceService::new(engine, tracker);

    let _conn = zbus::connection::Builder::system()?
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
