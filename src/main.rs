mod cli;
mod client;
mod crypto;
mod framing;
mod input;
mod protocol;
mod screen;
mod server;
mod transfer;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use client::ControlClient;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Serve {
            addr,
            password,
            quality,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();
            let password = read_password(password, true)?;
            serve(addr, password, quality).await?;
        }
        Commands::Shot {
            to,
            password,
            output,
        } => {
            let password = read_password(password, false)?;
            let mut client = ControlClient::connect(&to, &password).await?;
            let shot = client.screen().await?;
            tokio::fs::write(&output, &shot.jpeg)
                .await
                .with_context(|| format!("failed to write {output}"))?;
            println!("📸 {}x{} frame saved to {}", shot.width, shot.height, output);
        }
        Commands::Watch {
            to,
            password,
            dir,
            interval_ms,
            count,
        } => {
            let password = read_password(password, false)?;
            watch(&to, &password, &dir, interval_ms, count).await?;
        }
        Commands::Push {
            to,
            password,
            local,
            remote,
        } => {
            let password = read_password(password, false)?;
            let mut client = ControlClient::connect(&to, &password).await?;
            let size = client.upload(&local, &remote).await?;
            println!("⬆️  Sent {local} → {remote} ({size} bytes)");
        }
        Commands::Pull {
            to,
            password,
            remote,
            local,
        } => {
            let password = read_password(password, false)?;
            let mut client = ControlClient::connect(&to, &password).await?;
            let size = client.download(&remote, &local).await?;
            println!("⬇️  Fetched {remote} → {local} ({size} bytes)");
        }
    }

    Ok(())
}

async fn serve(addr: String, password: String, quality: u8) -> Result<()> {
    let grabber = screen::capture::ScreenGrabber::primary_display(quality)?;
    let injector: Box<dyn input::InputInjector> = Box::new(input::simulate::Simulator::new()?);
    let server = server::ControlServer::new(
        server::ServerConfig { addr, password },
        grabber,
        injector,
    );
    let registry = server.registry();

    // Sessions block on reads, so shutdown is delivered by closing their
    // sockets: dropping the accept loop closes the listener, and
    // disconnect_all force-closes every live session.
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            let active = registry.list_active().await;
            tracing::info!(sessions = active.len(), "shutting down");
            registry.disconnect_all().await;
            Ok(())
        }
    }
}

async fn watch(to: &str, password: &str, dir: &str, interval_ms: u64, count: u64) -> Result<()> {
    let mut client = ControlClient::connect(to, password).await?;
    tokio::fs::create_dir_all(dir).await?;

    let mut taken = 0u64;
    loop {
        let shot = client.screen().await?;
        let path = format!("{dir}/frame-{taken:06}.jpg");
        tokio::fs::write(&path, &shot.jpeg).await?;
        taken += 1;
        println!("📸 {path} ({}x{})", shot.width, shot.height);

        if count != 0 && taken >= count {
            break;
        }
        // Pacing is entirely client-driven; the server answers exactly as
        // often as it is asked
        tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await;
    }

    Ok(())
}

fn read_password(flag: Option<String>, confirm: bool) -> Result<String> {
    if let Some(password) = flag {
        return Ok(password);
    }

    println!("Enter password:");
    let password = rpassword::read_password()?;

    if confirm {
        println!("Confirm password:");
        if rpassword::read_password()? != password {
            anyhow::bail!("Passwords do not match");
        }
    }

    Ok(password)
}
