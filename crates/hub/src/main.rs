mod automation;
mod config;
mod control;
mod db;
mod dispatch;
mod history;
mod mqtt;
mod protocol;
mod scheduler;
mod state;
mod thresholds;
mod watering;
mod web;

use anyhow::Result;
use std::{env, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use db::Db;
use dispatch::Hub;
use mqtt::MqttSettings;
use scheduler::Scheduler;
use state::ControllerState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:irrigation.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (seed profiles, rules, schedules) ───────────────
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;

    // Storage is the source of truth from here on.
    let rules = db.load_automation_rules().await?;
    let schedules = db.load_schedules().await?;
    let profiles = db.load_profiles().await?;

    // ── Controller state ────────────────────────────────────────────
    let mut controller = ControllerState::new(cfg.cycle, cfg.controller.initial_moisture);
    controller.set_automation_rules(rules);
    if let Some(id) = &cfg.controller.initial_profile {
        match profiles.iter().find(|p| &p.id == id) {
            Some(p) => controller.apply_profile(&p.id, &p.thresholds),
            None => warn!(profile = %id, "initial_profile not found, using default thresholds"),
        }
    }
    let state = controller.shared();

    let scheduler = Scheduler::new(Arc::clone(&state), schedules);
    let hub = Hub::new(Arc::clone(&state), scheduler.clone(), db);

    info!(
        profiles = profiles.len(),
        schedules = scheduler.status().await.schedules.len(),
        tick_ms = cfg.controller.tick_ms,
        "controller ready"
    );

    // ── Shutdown ────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received Ctrl+C, shutting down");
        shutdown.cancel();
    });

    if cfg.controller.scheduler_enabled {
        scheduler.set_enabled(true).await;
    }

    let mut tasks: JoinSet<()> = JoinSet::new();

    // ── Control loop ────────────────────────────────────────────────
    tasks.spawn({
        let run = control::run(
            hub.clone(),
            Duration::from_millis(cfg.controller.tick_ms),
            cancel.clone(),
        );
        async move {
            run.await;
        }
    });

    // Scheduler fires and deferred stops change the actuator off-tick.
    {
        let hub = hub.clone();
        let changed = scheduler.changed();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = changed.notified() => hub.publish_snapshot().await,
                }
            }
        });
    }

    // ── MQTT bridge (optional) ──────────────────────────────────────
    match MqttSettings::from_env() {
        Some(settings) => {
            let hub = hub.clone();
            let cancel = cancel.clone();
            tasks.spawn(mqtt::run(hub, settings, cancel));
        }
        None => info!("MQTT_HOST not set, mqtt bridge disabled"),
    }

    // ── Web server ──────────────────────────────────────────────────
    let served = web::serve(hub, web_port, cancel.clone()).await;
    cancel.cancel();

    scheduler.shutdown().await;
    while tasks.join_next().await.is_some() {}

    served
}
