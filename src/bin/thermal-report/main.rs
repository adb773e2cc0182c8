mod args;

use anyhow::Result;
use log::info;
use thermal_report::{
    cli::{locate_executable, progress_bar},
    report::probe_command,
    Generator, InputSet, Mode, PdfBackend, ThermalTool,
};

use crate::args::Args;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::from_cmd_line()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let Args {
        mode,
        request,
        inputs,
        dji,
        weasyprint,
    } = args;

    let tool = ThermalTool::new(locate_executable(dji.as_deref(), "dji_irp")?);
    info!("{}", tool.probe().await?);

    let renderer = match mode {
        Mode::Report => {
            let exe = locate_executable(weasyprint.as_deref(), "weasyprint")?;
            info!("{}", probe_command(&exe).await?);
            exe
        }
        _ => weasyprint.unwrap_or_else(|| "weasyprint".into()),
    };

    let sources = inputs.resolve()?;
    if sources.is_empty() {
        eprintln!("No images to process");
        return Ok(());
    }
    let bar = progress_bar(sources.len());
    let generator = Generator::new(request, tool, PdfBackend::Command(renderer))?;
    let summary = generator
        .run(mode, InputSet::Files(sources), |event| {
            bar.println(&event.message);
            bar.inc(1);
        })
        .await?;
    bar.finish_and_clear();

    for output in &summary.outputs {
        eprintln!("Wrote {}", output.display());
    }
    eprintln!(
        "Processed {} images: {} succeeded, {} failed",
        summary.total, summary.succeeded, summary.failed
    );
    Ok(())
}
