use std::{env, fs, path};

use craftprobe::{
    config::{Config, ExchangeKind, TargetConfig},
    latency_ping, legacy_ping, query_full, status_query,
    status::StatusResponse,
    tracing::init_tracing,
};
use dotenv::dotenv;
use futures_util::future::join_all;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv().ok();

    // first command line argument is the location of the config file
    let args = env::args().collect::<Box<[String]>>();
    let config_file = args.get(1).cloned().unwrap_or("config.toml".to_string());

    let config_file_path = path::Path::new(&config_file).canonicalize()?;
    let config: Config = toml::from_str(&fs::read_to_string(&config_file_path)?)?;

    init_tracing(&config);
    info!(
        "loaded {} targets from {}",
        config.targets.len(),
        config_file_path.display()
    );

    let mut exchanges = Vec::new();
    for target in &config.targets {
        for kind in target.kinds() {
            exchanges.push(run(target, kind, &config));
        }
    }

    for line in join_all(exchanges).await {
        println!("{line}");
    }

    Ok(())
}

async fn run(target: &TargetConfig, kind: ExchangeKind, config: &Config) -> String {
    let options = target.options(config);
    let addr = target.addr.as_str();
    let port = target.port();

    match kind {
        ExchangeKind::Status => match status_query(addr, port, &options).await {
            Ok(json) => match StatusResponse::parse(&json) {
                Ok(status) => {
                    let (online, max) = status
                        .players
                        .as_ref()
                        .map(|p| (p.online, p.max))
                        .unwrap_or_default();
                    format!(
                        "status  {addr}:{port}  {} (protocol {})  {online}/{max}  {:?}",
                        status.version.name,
                        status.version.protocol,
                        status.motd()
                    )
                }
                Err(err) => {
                    warn!("{addr}:{port} sent status json we couldn't read: {err}");
                    format!("status  {addr}:{port}  {json}")
                }
            },
            Err(err) => format!("status  {addr}:{port}  {err}"),
        },
        ExchangeKind::Latency => match latency_ping(addr, port, &options).await {
            Ok(latency) => format!("latency {addr}:{port}  {}ms", latency.as_millis()),
            Err(err) => format!("latency {addr}:{port}  {err}"),
        },
        ExchangeKind::Legacy => match legacy_ping(addr, port, &options).await {
            Ok(status) => format!(
                "legacy  {addr}:{port}  {} (protocol {})  {}/{}  {:?}",
                status.version.as_deref().unwrap_or("?"),
                status.protocol.as_deref().unwrap_or("?"),
                status.online.as_deref().unwrap_or("?"),
                status.max.as_deref().unwrap_or("?"),
                status.motd.as_deref().unwrap_or_default()
            ),
            Err(err) => format!("legacy  {addr}:{port}  {err}"),
        },
        ExchangeKind::Query => {
            let port = target.query_port();
            match query_full(addr, port, &options).await {
                Ok(stat) => format!(
                    "query   {addr}:{port}  {}  {}/{}  players {:?}  {:?}",
                    stat.version().unwrap_or("?"),
                    stat.get("numplayers").unwrap_or("?"),
                    stat.get("maxplayers").unwrap_or("?"),
                    stat.players,
                    stat.motd().unwrap_or_default()
                ),
                Err(err) => format!("query   {addr}:{port}  {err}"),
            }
        }
    }
}
