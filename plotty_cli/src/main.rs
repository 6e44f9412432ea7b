use anyhow::Context;
use clap::{Parser, Subcommand};
use plottybot_ext::session::{self, SessionHandle};
use plottybot_ext::{
    extension_info, ActorId, BlockArgs, BlockOutput, DeviceDirectory, DirectoryClient, Opcode,
    PlottyConfig, Shape, SvgPreview,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "plotty_cli", about = "Drive a Plottybot pen plotter from the command line")]
struct Args {
    /// Discovery origin serving /api/devices (overrides PLOTTY_DISCOVERY_URL).
    #[arg(long, global = true)]
    discovery_url: Option<Url>,

    /// Plotter WebSocket port (overrides PLOTTY_DEVICE_PORT).
    #[arg(long, global = true)]
    device_port: Option<u16>,

    /// Delay between reconnect attempts in milliseconds (overrides PLOTTY_RETRY_MS).
    #[arg(long, global = true)]
    retry_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the plotters the discovery endpoint knows about.
    Devices,

    /// Print the block and menu metadata as JSON.
    Blocks {
        /// Fill the device menu from the discovery endpoint first.
        #[arg(long, default_value_t = false)]
        fetch: bool,
    },

    /// Connect to a plotter and draw one shape.
    Draw {
        /// Device name, or its 1-based position in the device list.
        #[arg(long)]
        device: Option<String>,

        #[arg(long, default_value = "square")]
        shape: Shape,

        #[arg(long, default_value_t = 100.0)]
        size: f64,

        /// Write the local preview as SVG.
        #[arg(long, value_name = "PATH")]
        svg: Option<PathBuf>,

        #[arg(long, default_value_t = 15)]
        connect_timeout_secs: u64,

        /// Only render the preview; never contact a plotter.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    plottybot_ext::init_tracing("info");
    let args = Args::parse();

    let mut config = PlottyConfig::from_env();
    if let Some(url) = args.discovery_url.clone() {
        config.discovery_origin = url;
    }
    if let Some(port) = args.device_port {
        config.device_port = port;
    }
    if let Some(ms) = args.retry_ms {
        config.retry_delay = Duration::from_millis(ms);
    }

    match args.command {
        Command::Devices => list_devices(&config).await,
        Command::Blocks { fetch } => print_blocks(&config, fetch).await,
        Command::Draw {
            device,
            shape,
            size,
            svg,
            connect_timeout_secs,
            offline,
        } => {
            let device = if offline { None } else { device };
            draw(
                &config,
                device.as_deref(),
                shape,
                size,
                svg,
                Duration::from_secs(connect_timeout_secs),
            )
            .await
        }
    }
}

async fn list_devices(config: &PlottyConfig) -> anyhow::Result<()> {
    let client = DirectoryClient::new(&config.discovery_origin, config.http_timeout)?;
    let entries = client
        .fetch()
        .await
        .with_context(|| format!("fetching {}", client.endpoint()))?;
    if entries.is_empty() {
        eprintln!("no devices found");
    }
    for (i, entry) in entries.iter().enumerate() {
        println!("{:>3}  {:<24} {}", i + 1, entry.name, entry.address);
    }
    Ok(())
}

async fn print_blocks(config: &PlottyConfig, fetch: bool) -> anyhow::Result<()> {
    let mut directory = DeviceDirectory::new();
    if fetch {
        let client = DirectoryClient::new(&config.discovery_origin, config.http_timeout)?;
        match client.fetch().await {
            Ok(entries) => directory.replace(entries),
            Err(e) => warn!(error = %e, "device list unavailable"),
        }
    }
    let info = extension_info(&directory);
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn draw(
    config: &PlottyConfig,
    device: Option<&str>,
    shape: Shape,
    size: f64,
    svg: Option<PathBuf>,
    connect_timeout: Duration,
) -> anyhow::Result<()> {
    let (session, task) = session::spawn(config, Some(SvgPreview::new()))?;
    let turtle = ActorId::new("cli-turtle");

    if let Some(device) = device {
        connect(&session, &turtle, device).await?;
        let address = session
            .wait_open(connect_timeout)
            .await
            .with_context(|| format!("waiting for {device} to accept the connection"))?;
        info!(%address, "plotter connected");
    }

    session.execute(Opcode::PenDown, &turtle, BlockArgs::new()).await?;
    session
        .execute(
            Opcode::DrawShape,
            &turtle,
            BlockArgs::new().with("SHAPE", shape.as_str()).with("SIZE", size),
        )
        .await?;
    session.execute(Opcode::PenUp, &turtle, BlockArgs::new()).await?;

    let snapshot = session.snapshot().await?;
    println!(
        "drew {shape} (size {size}) on {} [{}]",
        snapshot.selected_device, snapshot.status
    );

    session.shutdown().await?;
    let ext = task.await.context("session task failed")?;

    if let Some(path) = svg {
        let preview = ext
            .into_renderer()
            .ok_or_else(|| anyhow::anyhow!("preview renderer missing"))?;
        std::fs::write(&path, preview.to_svg())
            .with_context(|| format!("writing {}", path.display()))?;
        println!("preview written to {}", path.display());
    }
    Ok(())
}

async fn connect(session: &SessionHandle, turtle: &ActorId, device: &str) -> anyhow::Result<()> {
    session.refresh_devices().await?;
    let devices = session.snapshot().await?.devices;
    let name = match device.trim().parse::<usize>() {
        Ok(index) => index
            .checked_sub(1)
            .and_then(|i| devices.get(i))
            .map(|entry| entry.name.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no device at position {index} ({} known); run `plotty_cli devices` to list them",
                    devices.len()
                )
            })?,
        Err(_) => device.to_string(),
    };

    session
        .execute(
            Opcode::ConnectToPlottyNamed,
            turtle,
            BlockArgs::new().with("DEVICE", name.as_str()),
        )
        .await?;

    let selected = match session
        .execute(Opcode::GetDeviceName, turtle, BlockArgs::new())
        .await?
    {
        BlockOutput::Report(name) => name,
        other => anyhow::bail!("unexpected reply to getDeviceName: {other:?}"),
    };
    if selected == plottybot_ext::NO_DEVICE {
        anyhow::bail!("no device matches {device:?}; run `plotty_cli devices` to list them");
    }
    info!(name = %selected, "device selected");
    Ok(())
}
