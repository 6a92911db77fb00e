//! herald - run an ordered delivery queue against a simulated SMS provider.
//!
//! The provider accepts every send and later "calls the webhook" for it:
//! delivered by default, failed for every `--fail-every`th send, and never
//! for every `--drop-every`th send (left to the stall sweeper).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use herald_core::app::StallSweeper;
use herald_core::domain::{DeliveryStatus, MessagePayload, ProviderMessageId, TransportError};
use herald_core::impls::{InMemoryQueueStore, InMemoryTransport};
use herald_core::ports::DeliveryTransport;
use herald_core::{EngineBuilder, HeraldConfig, QueueEngine};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "herald", version, about, long_about = None)]
struct Cli {
    /// TOML settings file; `HERALD__*` variables override it.
    #[arg(long, env = "HERALD_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deliver a batch through the simulated provider and print the result.
    Simulate(SimulateArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(clap::Args, Debug)]
struct SimulateArgs {
    #[arg(long, default_value = "user-1")]
    recipient: String,

    #[arg(long, default_value = "daily")]
    queue: String,

    /// Messages to enqueue.
    #[arg(long, default_value_t = 5)]
    messages: usize,

    /// Report every Nth send as failed (0 = never).
    #[arg(long, default_value_t = 0)]
    fail_every: u64,

    /// Never call the webhook for every Nth send (0 = never).
    #[arg(long, default_value_t = 0)]
    drop_every: u64,

    /// Provider-side delay before the webhook fires.
    #[arg(long, default_value_t = 50)]
    webhook_delay_ms: u64,

    /// Overrides `engine.send_timeout_ms`.
    #[arg(long)]
    send_timeout_ms: Option<u64>,

    /// Overrides `sweeper.stall_cutoff_secs`; must exceed the send timeout.
    #[arg(long)]
    stall_cutoff_secs: Option<u64>,

    /// Overrides `sweeper.interval_secs`.
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Give up waiting after this long.
    #[arg(long, default_value_t = 60)]
    deadline_secs: u64,
}

/// Transport that forwards to the in-memory provider and reports every
/// accepted send to the simulated webhook.
struct SimulatedProvider {
    inner: InMemoryTransport,
    accepted: mpsc::UnboundedSender<ProviderMessageId>,
}

#[async_trait]
impl DeliveryTransport for SimulatedProvider {
    async fn send(
        &self,
        recipient_id: &str,
        payload: &MessagePayload,
    ) -> Result<ProviderMessageId, TransportError> {
        let message_id = self.inner.send(recipient_id, payload).await?;
        // webhook task gone means we are shutting down
        let _ = self.accepted.send(message_id.clone());
        Ok(message_id)
    }

    async fn status(&self, message_id: &ProviderMessageId) -> Result<DeliveryStatus, TransportError> {
        self.inner.status(message_id).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_core=info,herald_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = HeraldConfig::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Simulate(args)) => simulate(&mut config, args).await,
        None => simulate(&mut config, SimulateArgs::parse_defaults()).await,
    }
}

impl SimulateArgs {
    fn parse_defaults() -> Self {
        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: SimulateArgs,
        }
        Wrapper::parse_from(["herald"]).args
    }
}

async fn simulate(
    config: &mut HeraldConfig,
    args: SimulateArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ms) = args.send_timeout_ms {
        config.engine.send_timeout_ms = ms;
    }
    if let Some(secs) = args.stall_cutoff_secs {
        config.sweeper.stall_cutoff_secs = secs;
    }
    if let Some(secs) = args.sweep_interval_secs {
        config.sweeper.interval_secs = secs;
    }

    let provider = InMemoryTransport::new();
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let engine = EngineBuilder::new()
        .store(InMemoryQueueStore::new())
        .transport(SimulatedProvider {
            inner: provider.clone(),
            accepted: accepted_tx,
        })
        .config(config.clone())
        .build()?;

    let webhook = tokio::spawn(webhook_loop(
        engine.clone(),
        provider.clone(),
        accepted_rx,
        WebhookScript {
            fail_every: args.fail_every,
            drop_every: args.drop_every,
            delay: Duration::from_millis(args.webhook_delay_ms),
        },
    ));
    let sweeper = StallSweeper::spawn(
        engine.clone(),
        config.stall_cutoff(),
        config.sweep_interval(),
    );

    let payloads = (1..=args.messages)
        .map(|n| MessagePayload::text(format!("message {n} of {}", args.messages)))
        .collect();
    let ids = engine.enqueue(&args.recipient, &args.queue, payloads).await?;
    info!(count = ids.len(), recipient = %args.recipient, queue = %args.queue, "batch enqueued");

    let drained = tokio::select! {
        drained = wait_until_drained(&engine, &args, Duration::from_secs(args.deadline_secs)) => drained?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            false
        }
    };

    sweeper.shutdown_and_join().await;
    webhook.abort();

    let status = engine.get_status(&args.recipient, &args.queue).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    for entry in engine.entries(&args.recipient, &args.queue).await? {
        println!(
            "#{:<3} {:<9} retries={} error={}  {}",
            entry.sequence,
            entry.status,
            entry.retry_count,
            entry.last_error.as_deref().unwrap_or("-"),
            entry.payload.text,
        );
    }
    println!("provider accepted {} sends", provider.sent().await.len());

    if !drained {
        return Err("queue did not drain before the deadline".into());
    }
    Ok(())
}

async fn wait_until_drained(
    engine: &QueueEngine,
    args: &SimulateArgs,
    deadline: Duration,
) -> Result<bool, Box<dyn std::error::Error>> {
    let started = Instant::now();
    loop {
        let status = engine.get_status(&args.recipient, &args.queue).await?;
        if status.counts.is_drained() {
            return Ok(true);
        }
        if started.elapsed() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

struct WebhookScript {
    fail_every: u64,
    drop_every: u64,
    delay: Duration,
}

impl WebhookScript {
    fn hits(every: u64, n: u64) -> bool {
        every > 0 && n % every == 0
    }
}

async fn webhook_loop(
    engine: QueueEngine,
    provider: InMemoryTransport,
    mut accepted: mpsc::UnboundedReceiver<ProviderMessageId>,
    script: WebhookScript,
) {
    let mut n: u64 = 0;
    while let Some(message_id) = accepted.recv().await {
        n += 1;
        tokio::time::sleep(script.delay).await;

        let result = if WebhookScript::hits(script.fail_every, n) {
            provider
                .set_status(&message_id, DeliveryStatus::Failed("30003".into()))
                .await;
            engine.confirm_failed(&message_id, "30003").await
        } else if WebhookScript::hits(script.drop_every, n) {
            // Delivered, but the callback is lost; the sweeper finds out via status.
            provider
                .set_status(&message_id, DeliveryStatus::Delivered)
                .await;
            info!(%message_id, "webhook dropped");
            continue;
        } else {
            provider
                .set_status(&message_id, DeliveryStatus::Delivered)
                .await;
            engine.confirm_delivered(&message_id).await
        };

        match result {
            Ok(outcome) => info!(%message_id, ?outcome, "webhook handled"),
            Err(err) => warn!(%message_id, error = %err, "webhook handling failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_simulate_flags() {
        let cli = Cli::parse_from([
            "herald",
            "simulate",
            "--messages",
            "3",
            "--fail-every",
            "2",
            "--send-timeout-ms",
            "500",
            "--stall-cutoff-secs",
            "1",
        ]);
        let Some(Commands::Simulate(args)) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.messages, 3);
        assert_eq!(args.fail_every, 2);
        assert_eq!(args.send_timeout_ms, Some(500));
        assert_eq!(args.stall_cutoff_secs, Some(1));
        assert_eq!(args.recipient, "user-1");
    }

    #[test]
    fn defaults_match_simulate_without_flags() {
        let args = SimulateArgs::parse_defaults();
        assert_eq!(args.messages, 5);
        assert_eq!(args.queue, "daily");
        assert_eq!(args.deadline_secs, 60);
    }

    #[test]
    fn script_hits_every_nth() {
        assert!(!WebhookScript::hits(0, 4));
        assert!(WebhookScript::hits(2, 4));
        assert!(!WebhookScript::hits(3, 4));
    }

    #[tokio::test]
    async fn simulation_drains_with_failures_and_dropped_webhooks() {
        let mut config = HeraldConfig::default();
        let args = SimulateArgs {
            recipient: "user-1".into(),
            queue: "daily".into(),
            messages: 4,
            fail_every: 3,
            drop_every: 4,
            webhook_delay_ms: 1,
            send_timeout_ms: Some(500),
            stall_cutoff_secs: Some(1),
            sweep_interval_secs: Some(1),
            deadline_secs: 30,
        };
        simulate(&mut config, args).await.unwrap();
    }
}
