//! Thin binary wiring a single `SessionLoop` to the operator's TTY (§B.4);
//! a harness for exercising the library crates, not a distinct protocol
//! module.

use std::sync::Arc;

use clap::Parser;
use hub_common::cli_args::ModeArgs;
use hub_common::settings::SettingsOverrides;
use hub_core::LocalLauncher;
use hub_core::PermissionPipeline;
use hub_core::RemoteLauncher;
use hub_core::SessionLoop;
use hub_protocol::session::QueuedMessage;
use hub_protocol::session::TurnMode;
use hub_protocol::store::SessionEvent;
use hub_protocol::store::SessionEventSink;
use hub_transport::AgentTransport;
use hub_transport::AppServerTransport;
use hub_transport::McpTransport;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run one hub session against the current terminal")]
pub struct Cli {
    /// Working directory to hand the agent on thread start.
    #[arg(long, default_value = ".")]
    pub cwd: String,

    /// Force the MCP transport even when the app-server transport is
    /// available.
    #[arg(long)]
    pub force_mcp: bool,

    #[clap(flatten)]
    pub mode: ModeArgs,
}

struct StdoutSink;

impl SessionEventSink for StdoutSink {
    fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::Message(text) => println!("{text}"),
            SessionEvent::Ready => println!("(ready)"),
        }
    }
}

fn turn_mode(cli: &Cli) -> TurnMode {
    TurnMode {
        permission_mode: cli.mode.permission_mode.into(),
        model: cli.mode.model.clone(),
        collaboration_mode: cli.mode.collaboration_mode.into(),
    }
}

/// Reads lines from stdin and admits them to the queue, honoring
/// `/new`/`/clear`/`/model` as isolate-and-clear commands (§5).
async fn pump_stdin(queue: Arc<hub_core::MessageQueue>, mode: TurnMode) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let msg = QueuedMessage::new(line, mode.clone());
                if msg.is_isolated() {
                    queue.push_isolate_and_clear(msg);
                } else {
                    queue.push(None, msg);
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::error!(%err, "failed to read stdin line");
                break;
            }
        }
    }
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    hub_common::logging::init_logging();

    let settings = hub_common::settings::load(SettingsOverrides::default())?;
    tracing::info!(hub_home = %settings.hub_home.display(), "loaded hub settings");

    let queue = Arc::new(hub_core::MessageQueue::new());
    let local = Arc::new(LocalLauncher::new(
        settings.agent_program.clone(),
        settings.agent_args.clone(),
        cli.cwd.clone(),
    ));

    let app_server: Arc<dyn AgentTransport> =
        Arc::new(AppServerTransport::new(settings.agent_program.clone(), settings.agent_args.clone()));
    let mcp: Arc<dyn AgentTransport> =
        Arc::new(McpTransport::new(settings.agent_program.clone(), settings.agent_args.clone(), None));
    let client_info = mcp_types::Implementation {
        name: "hub".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let permission_pipeline = Arc::new(PermissionPipeline::new());
    let remote = Arc::new(RemoteLauncher::new(
        app_server,
        mcp,
        cli.force_mcp || settings.transport_preference == hub_common::settings::TransportPreference::Mcp,
        client_info,
        cli.cwd.clone(),
        permission_pipeline,
    ));

    let sink: Arc<dyn SessionEventSink> = Arc::new(StdoutSink);
    let session = Arc::new(SessionLoop::new(queue.clone(), local, remote, sink));

    let stdin_task = tokio::spawn(pump_stdin(queue, turn_mode(&cli)));

    let shutdown_session = session.clone();
    let ctrl_c_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, requesting shutdown");
            shutdown_session.request_shutdown();
        }
    });

    session.run().await;

    stdin_task.abort();
    ctrl_c_task.abort();
    Ok(())
}
