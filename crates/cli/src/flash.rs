//! The `bmckit flash` command: drives the flash pipeline and renders its
//! event stream as an indicatif progress bar.

use bmckit_client::BmcClient;
use bmckit_flash::{FlashEvent, FlashOptions, Flasher};
use eyre::{Result, WrapErr};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::{FirmwareArgs, FlashArgs};

pub async fn run(client: &BmcClient, args: &FlashArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, stopping...");
            ctrlc.cancel();
        }
    });

    if args.local {
        let path = args
            .image
            .to_str()
            .ok_or_else(|| eyre::eyre!("image path is not valid UTF-8"))?;
        println!("Flashing node {} from {} on the BMC...", args.node, path);
        Flasher::new(client)
            .with_cancel(cancel)
            .flash_node_local(args.node, path)
            .await
            .wrap_err("local flash failed")?;
        println!("Flash operation completed");
        return Ok(());
    }

    let mut opts = FlashOptions::new(&args.image).skip_crc(args.skip_crc);
    if let Some(digest) = &args.sha256 {
        opts = opts.sha256(digest);
    }

    let (tx, rx) = mpsc::channel(64);
    let renderer = tokio::spawn(render_events(rx));

    let result = Flasher::new(client)
        .with_events(tx)
        .with_cancel(cancel)
        .flash_node(args.node, &opts)
        .await;
    // The sender inside the flasher is gone; the renderer drains and exits.
    let _ = renderer.await;

    result.wrap_err("flash failed")?;
    println!("Flash operation completed");
    Ok(())
}

pub async fn run_firmware(client: &BmcClient, args: &FirmwareArgs) -> Result<()> {
    let mut opts = FlashOptions::new(&args.image);
    if let Some(digest) = &args.sha256 {
        opts = opts.sha256(digest);
    }

    println!("Uploading firmware {}...", args.image.display());
    Flasher::new(client)
        .upgrade_firmware(&opts)
        .await
        .wrap_err("firmware upgrade failed")?;
    println!("Firmware upload accepted; the BMC will apply it");
    Ok(())
}

async fn render_events(mut rx: mpsc::Receiver<FlashEvent>) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = rx.recv().await {
        match event {
            FlashEvent::Initiated { handle, total } => {
                println!(
                    "Transfer accepted (handle {handle}), uploading {}...",
                    HumanBytes(total)
                );
            }
            FlashEvent::Uploaded => {
                println!("Upload complete, writing image to node...");
            }
            FlashEvent::Progress {
                bytes_written,
                total,
                speed_bps,
                eta,
                ..
            } => {
                let pb = bar.get_or_insert_with(|| progress_bar(total));
                pb.set_position(bytes_written);
                let eta = match eta {
                    Some(eta) => HumanDuration(eta).to_string(),
                    None => "calculating".into(),
                };
                pb.set_message(format!("{}/s, eta {eta}", HumanBytes(speed_bps as u64)));
            }
            FlashEvent::Verifying => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message("done");
                }
                println!("All bytes written, verifying...");
            }
            FlashEvent::Recovered { errors } => {
                tracing::info!(errors, "progress polling recovered");
            }
        }
    }

    if let Some(pb) = bar.take() {
        pb.finish_and_clear();
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}
