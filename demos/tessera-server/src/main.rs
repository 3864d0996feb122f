use std::path::PathBuf;

use clap::Parser;
use tessera::prelude::*;
use tessera_rules::AzulRules;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "tessera-server")]
#[command(about = "Authoritative server for the Tessera tile-drafting game")]
struct Cli {
    /// Configuration file; missing means defaults
    #[arg(short, long, default_value = "tessera.toml")]
    config: PathBuf,

    /// Overrides `server.bind_address`
    #[arg(short, long, value_name = "ADDRESS")]
    bind: Option<String>,

    /// Overrides `logging.level`
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// One JSON object per log line
    #[arg(long)]
    json_logs: bool,

    /// Resume unfinished sessions from the snapshot store
    #[arg(long)]
    restore: bool,

    /// Fixed tile-bag seed, for reproducible games
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    /// Command-line flags win over the file.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
        if self.restore {
            config.snapshots.restore_on_start = true;
        }
    }

    fn rules(&self) -> AzulRules {
        match self.seed {
            Some(seed) => AzulRules::seeded(seed),
            None => AzulRules::new(),
        }
    }
}

async fn serve(cli: Cli, config: ServerConfig) -> Result<(), TesseraError> {
    let server = TesseraServerBuilder::new()
        .config(config)
        .build_default(cli.rules())
        .await?;
    info!(addr = ?server.local_addr().ok(), "listening");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, shutting down");
        })
        .await
}

#[tokio::main]
async fn main() -> Result<(), TesseraError> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(&cli.config).await?;
    cli.apply(&mut config);

    if let Err(e) = tessera::logging::init(&config.logging) {
        eprintln!("logging disabled: {e}");
    }

    let result = serve(cli, config).await;
    if let Err(e) = &result {
        error!(error = %e, "server stopped");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tessera_protocol::{Codec, Envelope, JsonCodec, PROTOCOL_VERSION, Payload, SystemMessage};
    use tessera_rules::AzulState;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_file_settings() {
        let cli = Cli::parse_from([
            "tessera-server",
            "--bind",
            "127.0.0.1:9100",
            "--log-level",
            "debug",
            "--json-logs",
            "--restore",
        ]);
        let mut config = ServerConfig::from_toml(
            r#"
            [server]
            bind_address = "0.0.0.0:8080"

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        cli.apply(&mut config);

        assert_eq!(config.server.bind_address, "127.0.0.1:9100");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.snapshots.restore_on_start);
    }

    #[test]
    fn absent_flags_keep_file_settings() {
        let cli = Cli::parse_from(["tessera-server"]);
        let mut config = ServerConfig::default();
        let before = config.server.bind_address.clone();

        cli.apply(&mut config);

        assert_eq!(cli.config, PathBuf::from("tessera.toml"));
        assert_eq!(config.server.bind_address, before);
        assert!(!config.logging.json);
    }

    #[tokio::test]
    async fn served_server_answers_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from(["tessera-server", "--bind", "127.0.0.1:0", "--seed", "7"]);
        let mut config = ServerConfig::default();
        config.snapshots.save_dir = dir.path().join("game_saves");
        config.snapshots.temp_dir = dir.path().join("temp_saves");
        cli.apply(&mut config);

        let server = TesseraServerBuilder::new()
            .config(config)
            .build_default(cli.rules())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let hello: Envelope<AzulState> = Envelope {
            seq: 0,
            timestamp: 0,
            payload: Payload::System(SystemMessage::Handshake {
                version: PROTOCOL_VERSION,
                player_id: PlayerId::from("ana"),
                name: "Ana".into(),
            }),
        };
        ws.send(Message::Binary(JsonCodec.encode(&hello).unwrap().into()))
            .await
            .unwrap();

        let reply = loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Binary(data) = msg {
                let env: Envelope<AzulState> = JsonCodec.decode(&data).unwrap();
                break env.payload;
            }
        };
        assert!(matches!(
            reply,
            Payload::System(SystemMessage::HandshakeAck { ref player_id, .. }) if player_id.as_str() == "ana"
        ));
    }
}
