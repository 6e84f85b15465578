use corral_shared::{Command, CommandPayload, Envelope};
use server::config::ServerConfig;
use server::dispatch::{CronScheduler, DispatchChannel, TimeoutSupervisor};
use server::session::{SessionManager, TargetSession};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ServerConfig::default();

    let sessions = Arc::new(SessionManager::new());
    let channel = Arc::new(DispatchChannel::new(sessions.clone()));
    let scheduler = Arc::new(CronScheduler::new(channel.clone(), config.jitter_seed));

    let supervisor = TimeoutSupervisor::with_interval(channel.clone(), config.supervisor_tick);
    tokio::spawn(async move { supervisor.run().await });

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Management server listening on {}", config.bind_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Connection from: {}", addr);

        let sessions = sessions.clone();
        let channel = channel.clone();
        let scheduler = scheduler.clone();
        let config = config.clone();

        tokio::spawn(async move {
            let mut session = TargetSession::new(stream, addr);

            let Some(report) = session.handshake().await else {
                warn!(addr = %addr, "handshake failed; closing connection");
                return;
            };
            let target_id = report.target_id.clone();

            sessions.register(session.get_handle(), &report).await;
            channel.register_target(&target_id).await;
            register_default_crons(&scheduler, &target_id, &config).await;
            info!(target = %target_id, addr = %addr, version = %report.version, "target online");

            // Feed answers into the channel until the agent disconnects
            while let Some(envelope) = session.recv().await {
                match envelope {
                    Envelope::Answer(frame) => {
                        channel
                            .handle_answer(&target_id, frame.sequence, frame.answer)
                            .await;
                    }
                    Envelope::Startup(_) => {
                        warn!(target = %target_id, "duplicate startup report ignored");
                    }
                    Envelope::Command(_) => {
                        warn!(target = %target_id, "agents do not send commands; frame dropped");
                    }
                }
            }

            info!(target = %target_id, "target disconnected");
            scheduler.drop_target(&target_id).await;
            channel.drop_target(&target_id).await;
            sessions.unregister(&target_id).await;
        });
    }
}

/// Recurring commands every target gets on registration
async fn register_default_crons(scheduler: &CronScheduler, target_id: &str, config: &ServerConfig) {
    let ping = Command::new(CommandPayload::Ping {
        include_stats: true,
    })
    .every_secs(config.ping_interval_secs);

    let cleanup = Command::new(CommandPayload::CleanupNetworkRules {
        max_age_secs: config.rule_max_age_secs,
    })
    .every_secs(config.cleanup_interval_secs);

    for command in [ping, cleanup] {
        let kind = command.kind();
        if let Err(e) = scheduler.register(target_id, command).await {
            error!(target = %target_id, kind = ?kind, error = %e, "failed to register recurring command");
        }
    }
}
