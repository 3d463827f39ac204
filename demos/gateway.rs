//! Example: Minimal login gateway
//!
//! Accepts clients, sends `Init`, answers the game-guard check and rejects
//! every login after decrypting the credentials block.
//!
//! Run with: `cargo run --example gateway [config.toml]`

use std::sync::Arc;

use auth_gateway::config::GatewayConfig;
use auth_gateway::protocol::dispatcher::{handler_fn, Dispatcher};
use auth_gateway::protocol::handshake::MODULUS_LEN;
use auth_gateway::protocol::message::OutgoingMessage;
use auth_gateway::utils::logging::init_logging;
use auth_gateway::{Gateway, Server};
use tracing::info;

const REQUEST_AUTH_LOGIN: u8 = 0x00;
const AUTH_GAME_GUARD: u8 = 0x07;
const LOGIN_FAIL: u8 = 0x01;
const GG_AUTH: u8 = 0x0B;

const REASON_ACCESS_FAILED: u32 = 0x04;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::from_env()?,
    };
    init_logging(&config.logging);

    let mut dispatcher = Dispatcher::new();
    dispatcher
        .register(
            AUTH_GAME_GUARD,
            handler_fn(|ctx, _msg| {
                let mut body = ctx.session().session_id().to_le_bytes().to_vec();
                body.extend_from_slice(&[0u8; 16]);
                Ok(Some(OutgoingMessage::generic(GG_AUTH, body)))
            }),
        )
        .register(
            REQUEST_AUTH_LOGIN,
            handler_fn(|ctx, msg| {
                let block = msg.reader().read_bytes(MODULUS_LEN)?;
                let credentials = ctx.session().keys().decrypt_block(&block)?;
                let user = String::from_utf8_lossy(&credentials[0x5E..0x5E + 14]);
                info!(
                    connection = %ctx.connection(),
                    user = %user.trim_end_matches('\0'),
                    "Login attempt"
                );
                Ok(Some(OutgoingMessage::generic(
                    LOGIN_FAIL,
                    REASON_ACCESS_FAILED.to_le_bytes().to_vec(),
                )))
            }),
        );

    let gateway = Arc::new(Gateway::new(config, Arc::new(dispatcher))?);
    Server::bind(gateway).await?.run().await?;
    Ok(())
}
