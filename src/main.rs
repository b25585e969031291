//! # huddle
//!
//! Chat hub binary: wires the store, the hub and the HTTP/WebSocket server
//! together, and offers a few operator commands against the same database.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use huddle_core::{Role, RoomId, UserId};
use huddle_hub::Hub;
use huddle_server::{
    HuddleServer, JwtVerifier, ServerConfig, ShutdownCoordinator, hub_config, wait_for_signal,
};
use huddle_settings::{DEV_JWT_SECRET, HuddleSettings};
use huddle_store::{ConnectionConfig, ConnectionPool, RoomRepo, SqliteStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Real-time chat hub.
#[derive(Parser, Debug)]
#[command(name = "huddle", version, about = "Real-time chat hub server")]
struct Cli {
    /// Settings file (defaults to `~/.huddle/settings.json`).
    #[arg(long, global = true, env = "HUDDLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the chat server.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Mint a bearer token for a user.
    Token {
        /// User UUID.
        #[arg(long)]
        user: UserId,
        /// Grant the admin role.
        #[arg(long)]
        admin: bool,
        /// Informational email claim.
        #[arg(long)]
        email: Option<String>,
    },
    /// Manage rooms and their members.
    Room {
        #[command(subcommand)]
        command: RoomCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RoomCommand {
    /// Create a room.
    Create {
        /// Unique room name.
        #[arg(long)]
        name: String,
    },
    /// Add a user to a room.
    AddMember {
        /// Room id.
        #[arg(long)]
        room: RoomId,
        /// User UUID.
        #[arg(long)]
        user: UserId,
    },
    /// Remove a user from a room.
    RemoveMember {
        /// Room id.
        #[arg(long)]
        room: RoomId,
        /// User UUID.
        #[arg(long)]
        user: UserId,
    },
    /// List rooms.
    List,
}

fn load_settings(path: Option<&Path>) -> Result<HuddleSettings> {
    match path {
        Some(path) => huddle_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => huddle_settings::load_settings().context("Failed to load settings"),
    }
}

/// Resolve the database path; relative paths live under `~/.huddle`.
fn database_path(settings: &HuddleSettings) -> PathBuf {
    let path = PathBuf::from(&settings.database.path);
    if path.is_absolute() {
        path
    } else {
        huddle_settings::huddle_home().join(path)
    }
}

fn open_database(path: &Path, pool_size: u32) -> Result<ConnectionPool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let config = ConnectionConfig {
        pool_size,
        ..ConnectionConfig::default()
    };
    let pool = huddle_store::new_file(&path.to_string_lossy(), &config)
        .context("Failed to open database")?;
    {
        let conn = pool.get().context("Failed to get DB connection")?;
        let _ = huddle_store::run_migrations(&conn).context("Failed to run migrations")?;
    }
    Ok(pool)
}

async fn serve(settings: HuddleSettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    huddle_server::logging::init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics_handle = huddle_server::metrics::install_recorder();

    if settings.auth.jwt_secret == DEV_JWT_SECRET {
        warn!("using the development JWT secret; set JWT_SECRET in production");
    }

    let db_path = database_path(&settings);
    let pool = open_database(&db_path, settings.database.pool_size)?;
    info!(path = %db_path.display(), "database ready");
    let store = Arc::new(SqliteStore::new(pool));

    let hub_cancel = CancellationToken::new();
    let (hub, hub_tasks) = Hub::start(
        hub_config(&settings.hub),
        store.clone(),
        store.clone(),
        hub_cancel.clone(),
    );

    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    let shutdown_timeout = config.shutdown_timeout();

    let verifier = Arc::new(JwtVerifier::new(
        &settings.auth.jwt_secret,
        settings.auth.token_ttl_hours,
    ));
    let server = HuddleServer::new(config, hub, verifier, store, metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("huddle listening on http://{addr}");

    wait_for_signal().await;

    info!("shutting down");
    let finished = drain(
        server.shutdown(),
        handle,
        &hub_cancel,
        hub_tasks.into_handles(),
        shutdown_timeout,
    )
    .await;
    if !finished {
        warn!("shutdown finished with tasks still running");
    }
    info!("shutdown complete");
    Ok(())
}

/// Stop the listener and every session first, then the hub's workers and
/// sweeper. Each phase gets up to `timeout`.
async fn drain(
    server: &ShutdownCoordinator,
    server_handle: JoinHandle<()>,
    hub_cancel: &CancellationToken,
    hub_handles: Vec<JoinHandle<()>>,
    timeout: Duration,
) -> bool {
    let sessions_done = server.graceful_shutdown(vec![server_handle], Some(timeout)).await;
    hub_cancel.cancel();
    let hub_done = server.graceful_shutdown(hub_handles, Some(timeout)).await;
    sessions_done && hub_done
}

fn issue_token(settings: &HuddleSettings, user: UserId, admin: bool, email: Option<&str>) -> Result<String> {
    if user.is_nil() {
        bail!("user must not be the nil UUID");
    }
    let role = if admin { Role::Admin } else { Role::User };
    JwtVerifier::new(&settings.auth.jwt_secret, settings.auth.token_ttl_hours)
        .issue(user, role, email)
        .context("Failed to sign token")
}

fn run_room_command(pool: &ConnectionPool, command: RoomCommand) -> Result<serde_json::Value> {
    let conn = pool.get().context("Failed to get DB connection")?;
    let value = match command {
        RoomCommand::Create { name } => {
            let room = RoomRepo::create(&conn, &name)
                .with_context(|| format!("Failed to create room {name:?}"))?;
            serde_json::json!({ "id": room.id, "name": room.name, "created_at": room.created_at })
        }
        RoomCommand::AddMember { room, user } => {
            let added = RoomRepo::add_member(&conn, room, user).context("Failed to add member")?;
            serde_json::json!({ "room_id": room, "user_uuid": user, "added": added })
        }
        RoomCommand::RemoveMember { room, user } => {
            let removed =
                RoomRepo::remove_member(&conn, room, user).context("Failed to remove member")?;
            serde_json::json!({ "room_id": room, "user_uuid": user, "removed": removed })
        }
        RoomCommand::List => {
            let rooms = RoomRepo::list(&conn).context("Failed to list rooms")?;
            serde_json::Value::Array(
                rooms
                    .into_iter()
                    .map(|r| serde_json::json!({ "id": r.id, "name": r.name, "created_at": r.created_at }))
                    .collect(),
            )
        }
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => serve(settings, host, port).await,
        Command::Token { user, admin, email } => {
            println!("{}", issue_token(&settings, user, admin, email.as_deref())?);
            Ok(())
        }
        Command::Room { command } => {
            let pool = open_database(&database_path(&settings), 1)?;
            let value = run_room_command(&pool, command)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use huddle_core::IdentityVerifier;

    use super::*;

    #[test]
    fn cli_parses_serve_overrides() {
        let cli = Cli::parse_from(["huddle", "serve", "--port", "9000"]);
        assert!(cli.config.is_none());
        match cli.command {
            Command::Serve { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_room_commands() {
        let user = "7f1b2c3d-0000-4000-8000-000000000001";
        let cli = Cli::parse_from(["huddle", "room", "add-member", "--room", "3", "--user", user]);
        match cli.command {
            Command::Room {
                command: RoomCommand::AddMember { room, user: parsed },
            } => {
                assert_eq!(room, RoomId::new(3));
                assert_eq!(parsed.to_string(), user);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_malformed_user() {
        assert!(Cli::try_parse_from(["huddle", "token", "--user", "bob"]).is_err());
    }

    #[test]
    fn relative_database_path_resolves_under_home() {
        let mut settings = HuddleSettings::default();
        settings.database.path = "chat.db".into();
        assert_eq!(database_path(&settings), huddle_settings::huddle_home().join("chat.db"));

        settings.database.path = "/var/lib/huddle/chat.db".into();
        assert_eq!(database_path(&settings), PathBuf::from("/var/lib/huddle/chat.db"));
    }

    #[test]
    fn issued_token_verifies_with_same_settings() {
        let settings = HuddleSettings::default();
        let user = UserId::random();
        let token = issue_token(&settings, user, true, None).unwrap();

        let verifier = JwtVerifier::new(&settings.auth.jwt_secret, 1);
        let identity = verifier.authenticate(&token).unwrap();
        assert_eq!(identity.user_id, user);
        assert_eq!(identity.role, Role::Admin);

        assert!(issue_token(&settings, UserId::default(), false, None).is_err());
    }

    #[test]
    fn room_commands_round_trip_through_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_database(&dir.path().join("nested").join("huddle.db"), 2).unwrap();

        let created = run_room_command(&pool, RoomCommand::Create { name: "general".into() }).unwrap();
        let room = RoomId::new(created["id"].as_i64().unwrap());

        let user = UserId::random();
        let added = run_room_command(&pool, RoomCommand::AddMember { room, user }).unwrap();
        assert_eq!(added["added"], true);
        let again = run_room_command(&pool, RoomCommand::AddMember { room, user }).unwrap();
        assert_eq!(again["added"], false);

        let listed = run_room_command(&pool, RoomCommand::List).unwrap();
        assert_eq!(listed[0]["name"], "general");

        let removed = run_room_command(&pool, RoomCommand::RemoveMember { room, user }).unwrap();
        assert_eq!(removed["removed"], true);
    }

    #[tokio::test]
    async fn sessions_stop_before_hub() {
        let coordinator = ShutdownCoordinator::new();
        let hub_cancel = CancellationToken::new();
        let hub_was_running = Arc::new(AtomicBool::new(false));

        let server_task = {
            let token = coordinator.token();
            let hub_cancel = hub_cancel.clone();
            let hub_was_running = Arc::clone(&hub_was_running);
            tokio::spawn(async move {
                token.cancelled().await;
                hub_was_running.store(!hub_cancel.is_cancelled(), Ordering::SeqCst);
            })
        };
        let hub_task = {
            let hub_cancel = hub_cancel.clone();
            tokio::spawn(async move { hub_cancel.cancelled().await })
        };

        let finished = drain(
            &coordinator,
            server_task,
            &hub_cancel,
            vec![hub_task],
            Duration::from_secs(5),
        )
        .await;
        assert!(finished);
        assert!(hub_was_running.load(Ordering::SeqCst));
        assert!(hub_cancel.is_cancelled());
    }
}
