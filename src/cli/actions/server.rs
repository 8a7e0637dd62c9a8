use crate::{
    auth::{Credentials, LoginConfig, LoginDriver},
    browser::{WebDriverConfig, WebDriverFactory},
    gateway::{GatewayClient, GatewayConfig},
    health::{self, HealthConfig},
    session::{MaintainerConfig, SessionMaintainer},
    two_fa::{AckMailbox, TwoFaConfig, TwoFaStrategy, TwoFactorResolver},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct Args {
    pub credentials: Credentials,
    pub gateway: GatewayConfig,
    pub webdriver: WebDriverConfig,
    pub login: LoginConfig,
    pub two_fa: TwoFaConfig,
    pub strategy: TwoFaStrategy,
    pub mailbox: AckMailbox,
    pub maintainer: MaintainerConfig,
    pub health: HealthConfig,
    pub logout_on_shutdown: bool,
}

/// Execute the server action: run the maintenance loop and the health server until a
/// shutdown signal arrives.
/// # Errors
/// Returns an error if a client cannot be built or the health server fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let gateway = Arc::new(
        GatewayClient::new(args.gateway).context("Failed to build the gateway client")?,
    );
    let browsers = Arc::new(
        WebDriverFactory::new(args.webdriver).context("Failed to build the WebDriver client")?,
    );

    let resolver = TwoFactorResolver::new(args.strategy, args.two_fa);
    let driver = LoginDriver::new(
        args.credentials,
        gateway.clone(),
        browsers,
        resolver,
        args.login,
    );
    let maintainer = SessionMaintainer::new(Arc::new(driver), gateway.clone(), args.maintainer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = maintainer.spawn(shutdown_rx.clone());

    let health_config = args.health;
    let mailbox = args.mailbox;
    let mut server = tokio::spawn({
        let maintainer = maintainer.clone();
        async move { health::serve(&health_config, maintainer, mailbox, shutdown_rx).await }
    });

    let served = tokio::select! {
        result = &mut server => result,
        () = shutdown_signal() => {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
            server.await
        }
    };
    let _ = shutdown_tx.send(true);

    if let Err(e) = maintenance.await {
        error!("Maintenance task failed: {e}");
    }

    if args.logout_on_shutdown {
        match gateway.logout().await {
            Ok(()) => info!("Logged out of the gateway"),
            Err(e) => warn!("Gateway logout failed: {e:#}"),
        }
    }

    served.context("Health server task failed")?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("account", args.credentials.account.clone()),
        ("gateway", args.gateway.url("")),
        ("login_url", args.gateway.login_url()),
        ("webdriver", args.webdriver.url().to_string()),
        ("two_fa", args.strategy.kind().to_string()),
        ("two_fa_timeout", format!("{}s", args.two_fa.timeout().as_secs())),
        ("health_port", args.health.port().to_string()),
        ("logout_on_shutdown", args.logout_on_shutdown.to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ = std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit(" abc "), "abc");
    }
}
