use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process;
use std::sync::Arc;

use log::{error, info, warn};
use roomchat::config::Config;
use roomchat::coordinator::Coordinator;
use roomchat::server;

/// Checks that both PEM files exist and hold at least one certificate and one
/// PKCS#8 key, so a bad setup falls back to plain HTTP instead of panicking
/// inside the TLS acceptor.
fn load_tls_config(cert_path: &Path, key_path: &Path) -> bool {
    let cert_file = match File::open(cert_path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open certificate file {}: {e}", cert_path.display());
            return false;
        }
    };
    let key_file = match File::open(key_path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open private key file {}: {e}", key_path.display());
            return false;
        }
    };

    let certs = match rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(certs) => certs,
        Err(e) => {
            warn!("Failed to parse certificate: {e}");
            return false;
        }
    };
    let keys = match rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(keys) => keys,
        Err(e) => {
            warn!("Failed to parse private key: {e}");
            return false;
        }
    };

    if certs.is_empty() || keys.is_empty() {
        warn!("TLS files contain no certificate or no PKCS#8 key");
        return false;
    }
    true
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    let words = match config.word_list() {
        Ok(words) => words,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    info!("Loaded {} offensive words", words.len());

    let coordinator = Coordinator::start(config.settings(), Arc::new(words));
    let routes = server::routes(coordinator, config.public_dir.clone());
    let addr = config.socket_addr();

    match config
        .tls_paths()
        .filter(|(cert, key)| load_tls_config(cert, key))
    {
        Some((cert, key)) => {
            info!("Starting secure server (HTTPS/WSS) on {addr}");
            warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .run(addr)
                .await;
        }
        None => {
            if config.tls_paths().is_some() {
                warn!("Failed to load TLS config, falling back to HTTP/WS");
            }
            info!("Starting server (HTTP/WS) on {addr}");
            warp::serve(routes).run(addr).await;
        }
    }
}
