mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use audiovis::config::{load_job, Job};
use audiovis::{
    scratch, FontDescriptor, FrameStyle, PreviewPipeline, PreviewRequest, RenderEvent, RenderLane, RenderOptions,
    RenderRequest, Rgb, Toolchain,
};
use cli::Cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let result = run(&cli);
    scratch::cleanup_all();
    result
}

fn run(cli: &Cli) -> Result<()> {
    let tools = Toolchain::locate();
    log::info!("Using {}", tools.binary().display());

    if let Some(png) = &cli.preview {
        return write_preview(cli, tools, png);
    }

    let Job { request, options } = match &cli.job {
        Some(path) => load_job(path)?,
        None => job_from_flags(cli)?,
    };

    log::info!("audiovis - audio spectrum visualizer");
    log::info!("Input: {}", request.input.display());
    log::info!("Output: {}", request.output.display());
    log::info!(
        "Resolution: {}x{} @ {}fps",
        request.style.width,
        request.style.height,
        request.fps
    );

    let lane = RenderLane::new(tools);
    let handle = lane.submit(request, options).context("Failed to start render")?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}% {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );

    for event in handle.events().iter() {
        match event {
            RenderEvent::State(state) => log::debug!("State: {state:?}"),
            RenderEvent::Progress { percent, status } => {
                pb.set_position(percent as u64);
                pb.set_message(status);
            }
            RenderEvent::Completed { output } => {
                pb.finish_with_message(format!("Rendering complete: {}", output.display()));
            }
            RenderEvent::Failed { status, .. } => pb.abandon_with_message(status),
        }
    }

    let output = handle.join().context("Render failed")?;
    log::info!("Done! Output: {}", output.display());
    Ok(())
}

fn style_from_flags(cli: &Cli) -> FrameStyle {
    FrameStyle {
        title: cli.text.clone(),
        font: font_from_flag(cli.font.as_deref(), cli.font_size),
        alignment: cli.alignment.into(),
        x_offset: cli.x_offset,
        y_offset: cli.y_offset,
        width: cli.width,
        height: cli.height,
        text_color: Rgb::parse_or_white(&cli.text_color),
        bar_color: Rgb::parse_or_white(&cli.vis_color),
    }
}

/// `-f` takes either a font file or a family name.
fn font_from_flag(font: Option<&str>, size: Option<f32>) -> FontDescriptor {
    let mut descriptor = FontDescriptor {
        size,
        ..FontDescriptor::default()
    };
    match font {
        Some(f) if PathBuf::from(f).is_file() => descriptor.path = Some(PathBuf::from(f)),
        Some(f) => descriptor.family = Some(f.to_string()),
        None => {}
    }
    descriptor
}

fn job_from_flags(cli: &Cli) -> Result<Job> {
    let input = cli.input.clone().context("Input audio file is required (-i)")?;
    let output = cli.output.clone().context("Output video file is required (-o)")?;

    let mut options = RenderOptions::default();
    options.background_loop = cli.background_loop.into();
    options.encode.video_codec = cli.codec.clone();
    options.encode.pix_fmt = cli.pix_fmt.clone();
    options.encode.crf = cli.crf;

    Ok(Job {
        request: RenderRequest {
            background: cli.background.clone(),
            style: style_from_flags(cli),
            fps: cli.fps,
            input,
            output,
        },
        options,
    })
}

fn write_preview(cli: &Cli, tools: Toolchain, png: &Path) -> Result<()> {
    let request = PreviewRequest {
        background: cli.background.clone(),
        style: style_from_flags(cli),
        preview_width: cli.preview_width,
        preview_height: cli.preview_height,
    };
    let mut preview = PreviewPipeline::new(tools, RenderOptions::default().bars);
    let image = preview.render(&request);
    image
        .save(png)
        .with_context(|| format!("Failed to write preview {}", png.display()))?;
    log::info!("Preview written: {} ({}x{})", png.display(), image.width(), image.height());
    Ok(())
}
