use chrono::Local;
use clap::Parser;
use log::{error, info};
use peercall::{ClientConfig, ReconnectPolicy, SignalingClient};
use std::time::Duration;

// Watches a rendezvous server: logs connection changes and the list of
// pending calls. It has no media engine, so it never answers.
//
// Usage:
//   cargo run                                            # ws://localhost:50001
//   cargo run -- --server ws://192.168.1.4:50001
//   cargo run -- -s wss://signal.example.org --backoff-max 60

#[derive(Parser, Debug)]
#[command(name = "peercall", about = "Call-signaling monitor")]
struct Args {
    /// Rendezvous server address.
    #[arg(short, long, default_value = peercall::config::DEFAULT_SERVER_URL)]
    server: String,

    /// Seconds to wait before reconnecting.
    #[arg(long, default_value_t = 3)]
    reconnect_delay: u64,

    /// Grow the reconnect delay per consecutive failure, up to this many seconds.
    #[arg(long)]
    backoff_max: Option<u64>,
}

impl Args {
    fn reconnect_policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_secs(self.reconnect_delay);
        match self.backoff_max {
            Some(max) => ReconnectPolicy::Backoff {
                base: delay,
                max: Duration::from_secs(max),
            },
            None => ReconnectPolicy::Fixed(delay),
        }
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return;
        }
    };

    rt.block_on(async {
        let config = ClientConfig::new(args.server.clone()).with_reconnect(args.reconnect_policy());
        let client = SignalingClient::builder(config).build();

        client.events().connection_state_changed.on(|e| match &e.endpoint_id {
            Some(id) => info!("Connection {:?}, endpoint id {id}", e.state),
            None => info!("Connection {:?}", e.state),
        });
        client.events().incoming_call_received.on(|e| {
            if e.calls.is_empty() {
                info!("No pending calls");
            }
            for call in &e.calls {
                info!(
                    "Pending call {} (received {})",
                    call.call_id,
                    call.received_at.with_timezone(&Local).format("%H:%M:%S")
                );
            }
        });
        client.events().call_ended.on(|e| {
            info!("Call {} ended: {:?}", e.call_id, e.reason);
        });

        let runner = client.clone();
        let run_task = tokio::spawn(async move { runner.run().await });

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
        }
        client.disconnect().await;

        match run_task.await {
            Ok(Ok(())) => info!("Monitor stopped."),
            Ok(Err(e)) => error!("Client exited with error: {e}"),
            Err(e) => error!("Client task panicked: {e}"),
        }
    });
}
